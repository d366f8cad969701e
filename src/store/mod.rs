//! Persistence layer backed by SQLite.
//!
//! All state lives in a single database file. Reads and consistency-critical
//! writes (slot flips, meeting inserts, lead mutations) go straight to the
//! pool and return errors to the caller. Best-effort writes (message history,
//! derived context, audit trails) are funneled through a single background
//! writer task; failures there are logged and never fail a turn.

pub mod audit;
pub mod conversations;
pub mod followups;
pub mod leads;
pub mod meetings;
pub mod slots;
pub mod writer;

pub use conversations::{Conversation, DerivedContext, StoredMessage};
pub use followups::FollowUp;
pub use leads::{BantDetail, Lead, LeadUpdate, NewLead};
pub use meetings::{Meeting, NewMeeting};
pub use slots::{CalendarSlot, BUSINESS_HOURS};

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use writer::WriteOp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Capacity of the background writer channel.
const WRITER_CHANNEL_CAPACITY: usize = 1024;

/// Maximum size of a single stored message body in bytes.
const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Maximum connections held by the SQLite pool.
const MAX_POOL_CONNECTIONS: u32 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A JSON column could not be parsed or serialized.
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TEXT column held a value outside the expected enum.
    #[error("invalid {field}: '{value}'")]
    InvalidEnum {
        /// Which field failed to parse.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// Message content exceeded the storage ceiling.
    #[error("content too large: {size} bytes exceeds {max}")]
    ContentTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// The background writer has shut down.
    #[error("background writer is no longer running")]
    WriterClosed,
}

impl StoreError {
    /// Whether this error is a UNIQUE constraint violation, used by the
    /// booking path to detect a concurrent duplicate meeting insert.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Domain enums
// ---------------------------------------------------------------------------

/// Messaging channel a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// WhatsApp via the gateway sidecar.
    Whatsapp,
    /// Embedded web chat widget.
    Webchat,
}

impl Channel {
    /// Stable string form used in the database and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Webchat => "webchat",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "whatsapp" => Ok(Self::Whatsapp),
            "webchat" => Ok(Self::Webchat),
            other => Err(StoreError::InvalidEnum {
                field: "channel",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sales funnel stage of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelStage {
    /// Fresh lead, no material sent yet.
    New,
    /// Company presentation has been sent.
    PresentationSent,
    /// Lead re-engaged after the presentation.
    SecondContact,
    /// A meeting is on the calendar.
    MeetingScheduled,
    /// Commercial proposal delivered.
    ProposalSent,
    /// Deal won.
    Closed,
    /// Lead lost or withdrawn.
    Cancelled,
}

impl FunnelStage {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PresentationSent => "presentation_sent",
            Self::SecondContact => "second_contact",
            Self::MeetingScheduled => "meeting_scheduled",
            Self::ProposalSent => "proposal_sent",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Human-facing label in the deployment locale (pt-BR).
    #[must_use]
    pub fn display_label(&self) -> &'static str {
        match self {
            Self::New => "Novo",
            Self::PresentationSent => "Apresentação Enviada",
            Self::SecondContact => "Segundo Contato",
            Self::MeetingScheduled => "Reunião Agendada",
            Self::ProposalSent => "Proposta Enviada",
            Self::Closed => "Fechado",
            Self::Cancelled => "Cancelado",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "new" => Ok(Self::New),
            "presentation_sent" => Ok(Self::PresentationSent),
            "second_contact" => Ok(Self::SecondContact),
            "meeting_scheduled" => Ok(Self::MeetingScheduled),
            "proposal_sent" => Ok(Self::ProposalSent),
            "closed" => Ok(Self::Closed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::InvalidEnum {
                field: "stage",
                value: other.to_string(),
            }),
        }
    }

    /// Resolves either the stable form or the pt-BR label, case-insensitively.
    /// Tool arguments arrive in whichever form the model chose to echo.
    #[must_use]
    pub fn from_label(s: &str) -> Option<Self> {
        if let Ok(stage) = Self::parse(&s.to_lowercase()) {
            return Some(stage);
        }
        let normalized = s.trim().to_lowercase();
        [
            Self::New,
            Self::PresentationSent,
            Self::SecondContact,
            Self::MeetingScheduled,
            Self::ProposalSent,
            Self::Closed,
            Self::Cancelled,
        ]
        .into_iter()
        .find(|stage| stage.display_label().to_lowercase() == normalized)
    }
}

impl std::fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service category a lead is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCategory {
    /// Institutional and landing-page websites.
    Websites,
    /// Online stores.
    Ecommerce,
    /// Native or hybrid mobile apps.
    MobileApps,
    /// Digital marketing and paid traffic.
    Marketing,
    /// Bespoke systems and integrations.
    Systems,
}

impl ServiceCategory {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Websites => "websites",
            Self::Ecommerce => "ecommerce",
            Self::MobileApps => "mobile_apps",
            Self::Marketing => "marketing",
            Self::Systems => "systems",
        }
    }

    /// Human-facing label in the deployment locale.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Websites => "Websites",
            Self::Ecommerce => "E-commerce",
            Self::MobileApps => "Aplicativos",
            Self::Marketing => "Marketing Digital",
            Self::Systems => "Sistemas Sob Medida",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "websites" => Ok(Self::Websites),
            "ecommerce" => Ok(Self::Ecommerce),
            "mobile_apps" => Ok(Self::MobileApps),
            "marketing" => Ok(Self::Marketing),
            "systems" => Ok(Self::Systems),
            other => Err(StoreError::InvalidEnum {
                field: "need",
                value: other.to_string(),
            }),
        }
    }

    /// Resolves either the stable form or the display label, case-insensitively.
    #[must_use]
    pub fn from_label(s: &str) -> Option<Self> {
        if let Ok(cat) = Self::parse(&s.to_lowercase()) {
            return Some(cat);
        }
        let normalized = s.trim().to_lowercase();
        [
            Self::Websites,
            Self::Ecommerce,
            Self::MobileApps,
            Self::Marketing,
            Self::Systems,
        ]
        .into_iter()
        .find(|cat| cat.label().to_lowercase() == normalized)
    }
}

impl std::fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    /// Inbound message from the contact.
    User,
    /// Outbound reply from the agent.
    Assistant,
}

impl MessageRole {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(StoreError::InvalidEnum {
                field: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingStatus {
    /// Booked, not yet confirmed by the lead.
    Scheduled,
    /// Confirmed by the lead.
    Confirmed,
    /// Took place.
    Completed,
    /// Called off before it happened.
    Cancelled,
    /// Lead did not show up.
    NoShow,
}

impl MeetingStatus {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "no_show" => Ok(Self::NoShow),
            other => Err(StoreError::InvalidEnum {
                field: "status",
                value: other.to_string(),
            }),
        }
    }

    /// Whether this status counts as an active booking.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }
}

impl std::fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualification dimension tracked per lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BantDimension {
    /// Whether the lead has budget for the project.
    Budget,
    /// Whether the contact can decide.
    Authority,
    /// How concrete the stated need is.
    Need,
    /// How soon the lead wants to start.
    Timeline,
}

impl BantDimension {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Authority => "authority",
            Self::Need => "need",
            Self::Timeline => "timeline",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "budget" => Ok(Self::Budget),
            "authority" => Ok(Self::Authority),
            "need" => Ok(Self::Need),
            "timeline" => Ok(Self::Timeline),
            other => Err(StoreError::InvalidEnum {
                field: "dimension",
                value: other.to_string(),
            }),
        }
    }
}

/// Confidence attached to a registered qualification dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Explicitly stated by the lead.
    High,
    /// Strongly implied.
    Medium,
    /// Guessed from weak signals.
    Low,
}

impl Confidence {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Parses the stable string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(StoreError::InvalidEnum {
                field: "confidence",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the SQLite-backed store and its background writer.
#[derive(Debug)]
pub struct Store {
    db: SqlitePool,
    writer_tx: mpsc::Sender<WriteOp>,
    writer_handle: JoinHandle<()>,
}

impl Store {
    /// Wraps an existing pool and spawns the background writer.
    #[must_use]
    pub fn new(db: SqlitePool) -> Self {
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(writer::run_writer(db.clone(), writer_rx));
        Self {
            db,
            writer_tx,
            writer_handle,
        }
    }

    /// Opens (or creates) the database file at `path` and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the file cannot be opened or the
    /// schema cannot be applied.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let db = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;
        apply_migrations(&db).await?;
        info!(path = %path.display(), "store opened");
        Ok(Self::new(db))
    }

    /// Direct access to the connection pool, used by tests and maintenance
    /// commands.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Enqueues a best-effort write for the background writer.
    pub(crate) fn enqueue(&self, op: WriteOp) -> Result<(), StoreError> {
        self.writer_tx
            .try_send(op)
            .map_err(|_| StoreError::WriterClosed)
    }

    /// Stops the background writer after draining queued operations.
    pub async fn shutdown(self) {
        drop(self.writer_tx);
        if let Err(e) = self.writer_handle.await {
            tracing::warn!(error = %e, "store writer did not shut down cleanly");
        }
    }
}

/// Applies the bundled schema to a fresh or existing database.
///
/// # Errors
///
/// Returns [`StoreError::Database`] when a statement fails.
pub async fn apply_migrations(db: &SqlitePool) -> Result<(), StoreError> {
    sqlx::raw_sql(include_str!("../../migrations/001_schema.sql"))
        .execute(db)
        .await?;
    Ok(())
}
