//! Lead records and their qualification details.

use tracing::debug;

use super::{BantDimension, Confidence, FunnelStage, ServiceCategory, Store, StoreError};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A sales lead, keyed by contact handle.
#[derive(Debug, Clone)]
pub struct Lead {
    /// Row id.
    pub id: i64,
    /// Contact handle (phone number or web visitor id).
    pub phone: String,
    /// Display name, when known.
    pub name: Option<String>,
    /// E-mail address, when known.
    pub email: Option<String>,
    /// Company name, when known.
    pub company: Option<String>,
    /// Detected service category of interest.
    pub need: Option<ServiceCategory>,
    /// Current funnel stage.
    pub stage: FunnelStage,
    /// Qualification score, 0 to 100.
    pub bant_score: i64,
    /// Creation timestamp (UTC, database format).
    pub created_at: String,
    /// Last mutation timestamp (UTC, database format).
    pub updated_at: String,
}

/// Fields accepted when creating a lead.
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    /// Display name.
    pub name: Option<String>,
    /// E-mail address.
    pub email: Option<String>,
    /// Company name.
    pub company: Option<String>,
    /// Detected service category.
    pub need: Option<ServiceCategory>,
}

/// Partial update of lead contact fields; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct LeadUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New e-mail address.
    pub email: Option<String>,
    /// New company name.
    pub company: Option<String>,
    /// New service category.
    pub need: Option<ServiceCategory>,
}

/// One registered qualification dimension.
#[derive(Debug, Clone)]
pub struct BantDetail {
    /// Lead the detail belongs to.
    pub lead_id: i64,
    /// Which dimension.
    pub dimension: BantDimension,
    /// What the lead said or implied.
    pub value: String,
    /// How certain the extraction was.
    pub confidence: Confidence,
}

type LeadRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    i64,
    String,
    String,
);

impl Lead {
    fn from_row(row: LeadRow) -> Result<Self, StoreError> {
        let need = row.5.as_deref().map(ServiceCategory::parse).transpose()?;
        Ok(Self {
            id: row.0,
            phone: row.1,
            name: row.2,
            email: row.3,
            company: row.4,
            need,
            stage: FunnelStage::parse(&row.6)?,
            bant_score: row.7,
            created_at: row.8,
            updated_at: row.9,
        })
    }
}

const LEAD_COLUMNS: &str = "id, phone, name, email, company, need, stage, bant_score, \
                            created_at, updated_at";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Store {
    /// Looks up a lead by contact handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_lead_by_phone(&self, phone: &str) -> Result<Option<Lead>, StoreError> {
        let row: Option<LeadRow> =
            sqlx::query_as(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE phone = ?1"))
                .bind(phone)
                .fetch_optional(self.pool())
                .await?;
        row.map(Lead::from_row).transpose()
    }

    /// Looks up a lead by e-mail address, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_lead_by_email(&self, email: &str) -> Result<Option<Lead>, StoreError> {
        let row: Option<LeadRow> = sqlx::query_as(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE email = ?1 COLLATE NOCASE"
        ))
        .bind(email)
        .fetch_optional(self.pool())
        .await?;
        row.map(Lead::from_row).transpose()
    }

    /// Looks up a lead by row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_lead_by_id(&self, id: i64) -> Result<Option<Lead>, StoreError> {
        let row: Option<LeadRow> =
            sqlx::query_as(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(Lead::from_row).transpose()
    }

    /// Creates a lead in stage `new` and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails, including on a duplicate
    /// contact handle.
    pub async fn create_lead(&self, phone: &str, fields: NewLead) -> Result<Lead, StoreError> {
        let result = sqlx::query(
            "INSERT INTO leads (phone, name, email, company, need, stage) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(phone)
        .bind(&fields.name)
        .bind(&fields.email)
        .bind(&fields.company)
        .bind(fields.need.map(|n| n.as_str()))
        .bind(FunnelStage::New.as_str())
        .execute(self.pool())
        .await?;
        let id = result.last_insert_rowid();
        debug!(lead_id = id, phone = %phone, "lead created");
        self.find_lead_by_id(id)
            .await?
            .ok_or_else(|| StoreError::InvalidEnum {
                field: "lead_id",
                value: id.to_string(),
            })
    }

    /// Updates contact fields on a lead; unset fields keep their value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn update_lead_fields(&self, id: i64, update: LeadUpdate) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE leads SET name = COALESCE(?2, name), email = COALESCE(?3, email), \
             company = COALESCE(?4, company), need = COALESCE(?5, need), \
             updated_at = datetime('now') WHERE id = ?1",
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.email)
        .bind(&update.company)
        .bind(update.need.map(|n| n.as_str()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Moves a lead to a new funnel stage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn update_lead_stage(&self, id: i64, stage: FunnelStage) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET stage = ?2, updated_at = datetime('now') WHERE id = ?1")
            .bind(id)
            .bind(stage.as_str())
            .execute(self.pool())
            .await?;
        debug!(lead_id = id, stage = stage.as_str(), "lead stage updated");
        Ok(())
    }

    /// Stores a freshly computed qualification score.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn set_bant_score(&self, id: i64, score: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET bant_score = ?2, updated_at = datetime('now') WHERE id = ?1")
            .bind(id)
            .bind(score)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Registers one qualification dimension, replacing any earlier value for
    /// the same dimension.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the upsert fails.
    pub async fn register_bant_dimension(
        &self,
        lead_id: i64,
        dimension: BantDimension,
        value: &str,
        confidence: Confidence,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bant_details (lead_id, dimension, value, confidence) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (lead_id, dimension) DO UPDATE SET \
             value = excluded.value, confidence = excluded.confidence, \
             updated_at = datetime('now')",
        )
        .bind(lead_id)
        .bind(dimension.as_str())
        .bind(value)
        .bind(confidence.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Loads all registered qualification dimensions for a lead.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn bant_details(&self, lead_id: i64) -> Result<Vec<BantDetail>, StoreError> {
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            "SELECT lead_id, dimension, value, confidence FROM bant_details \
             WHERE lead_id = ?1 ORDER BY dimension",
        )
        .bind(lead_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(lead_id, dimension, value, confidence)| {
                Ok(BantDetail {
                    lead_id,
                    dimension: BantDimension::parse(&dimension)?,
                    value,
                    confidence: Confidence::parse(&confidence)?,
                })
            })
            .collect()
    }
}
