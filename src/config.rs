//! Configuration loading and validation.
//!
//! All settings live in a single TOML file and every field carries a default,
//! so an empty file (or no file) yields a working development setup. Secrets
//! are never stored in the file itself, only the names of environment
//! variables holding them.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Turn-level limits and thresholds.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Degraded-mode breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Slot booking policy.
    #[serde(default)]
    pub booking: BookingConfig,

    /// Qualification score weights.
    #[serde(default)]
    pub bant: BantConfig,

    /// Messaging gateway sidecar.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Calendar sidecar.
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Knowledge base sidecar.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Background job schedules.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Business identity used in prompts and templates.
    #[serde(default)]
    pub business: BusinessConfig,
}

/// HTTP service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Bind address for the inbound HTTP endpoint.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database file path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding rolling log files.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Directory holding channel instruction files.
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Hard ceiling on a single turn, in seconds.
    #[serde(default = "default_turn_deadline_secs")]
    pub turn_deadline_secs: u64,

    /// How long shutdown waits for in-flight turns, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            logs_dir: default_logs_dir(),
            prompts_dir: default_prompts_dir(),
            turn_deadline_secs: default_turn_deadline_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Provider and model in `provider/model` form, e.g. `openai/gpt-4o-mini`.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable name holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Turn-level limits and thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Inbound messages accepted per rolling hour, across all contacts.
    #[serde(default = "default_hourly_message_limit")]
    pub hourly_message_limit: u32,

    /// How many history messages are loaded for the model.
    #[serde(default = "default_history_messages")]
    pub history_messages: u32,

    /// Confidence required before a canned quick reply bypasses the model.
    #[serde(default = "default_quick_reply_threshold")]
    pub quick_reply_threshold: f32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hourly_message_limit: default_hourly_message_limit(),
            history_messages: default_history_messages(),
            quick_reply_threshold: default_quick_reply_threshold(),
        }
    }
}

/// Degraded-mode breaker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// LLM failures tolerated inside the window before degrading.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Trailing window length in seconds.
    #[serde(default = "default_breaker_window_secs")]
    pub window_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_breaker_window_secs(),
        }
    }
}

/// Slot booking policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// Minimum minutes between now and a bookable slot.
    #[serde(default = "default_min_lead_minutes")]
    pub min_lead_minutes: i64,

    /// Maximum days ahead a slot can be booked.
    #[serde(default = "default_max_horizon_days")]
    pub max_horizon_days: i64,

    /// Default meeting length in minutes.
    #[serde(default = "default_slot_duration_minutes")]
    pub slot_duration_minutes: i64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            min_lead_minutes: default_min_lead_minutes(),
            max_horizon_days: default_max_horizon_days(),
            slot_duration_minutes: default_slot_duration_minutes(),
        }
    }
}

/// Qualification score weights, in points. The four weights should sum to
/// 100; scores are clamped there regardless.
#[derive(Debug, Clone, Deserialize)]
pub struct BantConfig {
    /// Weight of the budget dimension.
    #[serde(default = "default_budget_weight")]
    pub budget_weight: u32,

    /// Weight of the authority dimension.
    #[serde(default = "default_authority_weight")]
    pub authority_weight: u32,

    /// Weight of the need dimension.
    #[serde(default = "default_need_weight")]
    pub need_weight: u32,

    /// Weight of the timeline dimension.
    #[serde(default = "default_timeline_weight")]
    pub timeline_weight: u32,
}

impl Default for BantConfig {
    fn default() -> Self {
        Self {
            budget_weight: default_budget_weight(),
            authority_weight: default_authority_weight(),
            need_weight: default_need_weight(),
            timeline_weight: default_timeline_weight(),
        }
    }
}

/// Messaging gateway sidecar settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Whether the WhatsApp gateway loop runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the gateway sidecar.
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Contact handle notified on human handoff requests, when set.
    #[serde(default)]
    pub handoff_contact: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            base_url: default_gateway_url(),
            handoff_contact: None,
        }
    }
}

/// Calendar sidecar settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// Base URL of the calendar sidecar.
    #[serde(default = "default_calendar_url")]
    pub base_url: String,

    /// How many days ahead the reconciler inspects.
    #[serde(default = "default_reconcile_window_days")]
    pub reconcile_window_days: i64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: default_calendar_url(),
            reconcile_window_days: default_reconcile_window_days(),
        }
    }
}

/// Knowledge base sidecar settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    /// Base URL of the knowledge sidecar.
    #[serde(default = "default_knowledge_url")]
    pub base_url: String,

    /// Passages requested per search.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Minimum relevance score for returned passages.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_knowledge_url(),
            top_k: default_top_k(),
            relevance_threshold: default_relevance_threshold(),
        }
    }
}

/// Background job schedules, in six-field cron syntax.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// How often the job runner wakes up, in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Calendar reconciliation schedule.
    #[serde(default = "default_reconcile_cron")]
    pub reconcile_cron: String,

    /// Follow-up dispatch schedule.
    #[serde(default = "default_followup_cron")]
    pub followup_cron: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            reconcile_cron: default_reconcile_cron(),
            followup_cron: default_followup_cron(),
        }
    }
}

/// Business identity used in prompts and templates.
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessConfig {
    /// Company name the agent speaks for.
    #[serde(default = "default_company_name")]
    pub company_name: String,

    /// Agent persona name.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// URL of the company presentation document.
    #[serde(default = "default_presentation_url")]
    pub presentation_url: String,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            company_name: default_company_name(),
            agent_name: default_agent_name(),
            presentation_url: default_presentation_url(),
        }
    }
}

// Default value functions for serde

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_db_path() -> PathBuf {
    PathBuf::from("armitage.db")
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_turn_deadline_secs() -> u64 {
    75
}
fn default_shutdown_grace_secs() -> u64 {
    20
}
fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "ARMITAGE_LLM_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_hourly_message_limit() -> u32 {
    250
}
fn default_history_messages() -> u32 {
    30
}
fn default_quick_reply_threshold() -> f32 {
    0.85
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_breaker_window_secs() -> u64 {
    300
}
fn default_min_lead_minutes() -> i64 {
    30
}
fn default_max_horizon_days() -> i64 {
    90
}
fn default_slot_duration_minutes() -> i64 {
    60
}
fn default_budget_weight() -> u32 {
    30
}
fn default_authority_weight() -> u32 {
    20
}
fn default_need_weight() -> u32 {
    30
}
fn default_timeline_weight() -> u32 {
    20
}
fn default_true() -> bool {
    true
}
fn default_gateway_url() -> String {
    "http://127.0.0.1:3001".to_string()
}
fn default_calendar_url() -> String {
    "http://127.0.0.1:3002".to_string()
}
fn default_knowledge_url() -> String {
    "http://127.0.0.1:3003".to_string()
}
fn default_reconcile_window_days() -> i64 {
    30
}
fn default_top_k() -> u32 {
    4
}
fn default_relevance_threshold() -> f32 {
    0.35
}
fn default_tick_secs() -> u64 {
    30
}
fn default_reconcile_cron() -> String {
    "0 */10 * * * *".to_string()
}
fn default_followup_cron() -> String {
    "0 */5 * * * *".to_string()
}
fn default_company_name() -> String {
    "Straylight Digital".to_string()
}
fn default_agent_name() -> String {
    "Marina".to_string()
}
fn default_presentation_url() -> String {
    "https://straylight.example/apresentacao.pdf".to_string()
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Load configuration from `path` when given, falling back to
/// `armitage.toml` in the working directory, then `~/.armitage/armitage.toml`,
/// then to built-in defaults.
///
/// # Errors
///
/// Returns an error only when an existing file cannot be read or parsed; a
/// missing file is not an error.
pub fn load_config_or_default(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(explicit) = path {
        return load_config(explicit);
    }
    let local = PathBuf::from("armitage.toml");
    if local.exists() {
        return load_config(&local);
    }
    if let Ok(dir) = data_dir() {
        let home = dir.join("armitage.toml");
        if home.exists() {
            return load_config(&home);
        }
    }
    Ok(Config::default())
}

/// Resolve the default data directory (`~/.armitage/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".armitage"))
}
