//! Runtime configuration, built from `SENTINEL_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Everything one triage run needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    /// IMAP server host.
    pub imap_host: String,
    /// IMAP server port (implicit TLS).
    pub imap_port: u16,
    /// IMAP login name.
    pub username: String,
    /// IMAP password; only exposed at the LOGIN call.
    pub password: SecretString,
    /// Display name of the person the report is written for.
    pub identity_name: String,
    /// The person's own address, used for self-sent and addressing checks.
    pub identity_addr: String,
    /// Free-text role description folded into the analysis prompt.
    pub roles: String,
    /// Source mailbox to triage.
    pub mailbox: String,
    /// How many days back the fetch window reaches.
    pub days_back: u32,
    /// Search by Date header (SENTSINCE) instead of server arrival time.
    pub use_sentdate: bool,
    /// Drop messages sent from the identity's own address during fetch.
    pub skip_own_sent: bool,
    /// Reasoning-service endpoint (Ollama-compatible `/api/generate`).
    pub oracle_url: String,
    /// Model name passed to the reasoning service.
    pub oracle_model: String,
    /// Upper bound for a single oracle round trip.
    pub oracle_timeout: Duration,
    /// Optional analysis prompt template file; embedded default otherwise.
    pub prompt_file: Option<PathBuf>,
    /// Optional draft prompt template file; embedded default otherwise.
    pub draft_prompt_file: Option<PathBuf>,
    /// Directory for report files and the request trace.
    pub report_dir: PathBuf,
    /// Append every oracle exchange to a JSONL trace file.
    pub trace: bool,
    /// Apply mailbox mutations after analysis.
    pub auto_triage: bool,
    /// Generate reply drafts for actionable threads.
    pub auto_draft: bool,
    /// Folder drafts are appended to.
    pub drafts_folder: String,
    /// Optional signature file appended to generated drafts.
    pub signature_file: Option<PathBuf>,
    /// Destination for messages classified as spam.
    pub spam_folder: String,
    /// Destination for messages classified as phishing.
    pub quarantine_folder: String,
}

impl Config {
    /// Build the configuration from the environment.
    ///
    /// `SENTINEL_IMAP_HOST`, `SENTINEL_IMAP_USER` and `SENTINEL_IMAP_PASSWORD`
    /// are required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = require("SENTINEL_IMAP_HOST")?;
        let username = require("SENTINEL_IMAP_USER")?;
        let password = SecretString::from(require("SENTINEL_IMAP_PASSWORD")?);

        let imap_port: u16 = env_parsed("SENTINEL_IMAP_PORT", 993)?;

        let identity_addr = std::env::var("SENTINEL_IDENTITY_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| username.clone());
        let identity_name = std::env::var("SENTINEL_IDENTITY_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| local_part(&identity_addr));

        Ok(Self {
            imap_host,
            imap_port,
            username,
            password,
            identity_name,
            identity_addr,
            roles: std::env::var("SENTINEL_ROLES").unwrap_or_default(),
            mailbox: env_or("SENTINEL_MAILBOX", "INBOX"),
            days_back: env_parsed("SENTINEL_DAYS_BACK", 1)?,
            use_sentdate: env_bool("SENTINEL_USE_SENTDATE", true),
            skip_own_sent: env_bool("SENTINEL_SKIP_OWN_SENT", true),
            oracle_url: env_or("SENTINEL_ORACLE_URL", "http://localhost:11434/api/generate"),
            oracle_model: env_or("SENTINEL_ORACLE_MODEL", "qwen3:8b"),
            oracle_timeout: Duration::from_secs(env_parsed("SENTINEL_ORACLE_TIMEOUT_SECS", 180)?),
            prompt_file: std::env::var("SENTINEL_PROMPT_FILE").ok().map(PathBuf::from),
            draft_prompt_file: std::env::var("SENTINEL_DRAFT_PROMPT_FILE")
                .ok()
                .map(PathBuf::from),
            report_dir: PathBuf::from(env_or("SENTINEL_REPORT_DIR", "reports")),
            trace: env_bool("SENTINEL_TRACE", false),
            auto_triage: env_bool("SENTINEL_AUTO_TRIAGE", true),
            auto_draft: env_bool("SENTINEL_AUTO_DRAFT", true),
            drafts_folder: env_or("SENTINEL_DRAFTS_FOLDER", "Drafts"),
            signature_file: std::env::var("SENTINEL_SIGNATURE_FILE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            spam_folder: env_or("SENTINEL_SPAM_FOLDER", "Spam"),
            quarantine_folder: env_or("SENTINEL_QUARANTINE_FOLDER", "Quarantine"),
        })
    }

}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse an optional variable. Absent or blank means the default; a
/// value that is present but unparseable is a hard error rather than a
/// silent fallback.
fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("cannot parse '{}'", raw.trim()),
            })
        }
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn local_part(addr: &str) -> String {
    addr.split('@').next().unwrap_or(addr).to_string()
}
