//! Environment configuration
//!
//! All secrets come from environment variables; there is no config file.
//! Startup fails loudly when a required variable is missing or malformed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is missing or empty")]
    Missing(&'static str),

    #[error("environment variable {0} is malformed: {1}")]
    Malformed(&'static str, String),
}

/// SSL mode for the Postgres connection, from PGSSLMODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Require,
    Disable,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Admin chat ids; receive monitor copies, escalations, error reports.
    pub admins: Vec<i64>,
    /// Postgres URI, normalized to the postgresql:// scheme.
    pub database_url: String,
    pub ssl_mode: SslMode,
    /// Shared conversation store; in-process map when unset.
    pub redis_url: Option<String>,
    /// Unlocks the destructive schema reset. Anything but "true" blocks it.
    pub allow_db_reset: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = require("BOT_TOKEN")?;
        let admins = parse_admins(&require("ADMINS")?)?;
        let database_url = normalize_database_url(&require("DATABASE_URL")?);
        let ssl_mode = parse_ssl_mode(optional("PGSSLMODE").as_deref());
        let redis_url = optional("REDIS_URL");
        let allow_db_reset = optional("ALLOW_DB_RESET").as_deref() == Some("true");

        Ok(Self {
            bot_token,
            admins,
            database_url,
            ssl_mode,
            redis_url,
            allow_db_reset,
        })
    }

    pub fn is_admin(&self, chat_id: i64) -> bool {
        self.admins.contains(&chat_id)
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the comma-separated admin list. Must be non-empty.
fn parse_admins(raw: &str) -> Result<Vec<i64>, ConfigError> {
    let mut admins = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id = part
            .parse::<i64>()
            .map_err(|_| ConfigError::Malformed("ADMINS", format!("not an integer: {part}")))?;
        admins.push(id);
    }
    if admins.is_empty() {
        return Err(ConfigError::Malformed("ADMINS", "no chat ids".into()));
    }
    Ok(admins)
}

/// Some providers hand out postgres:// URIs; normalize to postgresql://.
fn normalize_database_url(url: &str) -> String {
    match url.strip_prefix("postgres://") {
        Some(rest) => format!("postgresql://{rest}"),
        None => url.to_string(),
    }
}

fn parse_ssl_mode(raw: Option<&str>) -> SslMode {
    match raw.map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("disable") => SslMode::Disable,
        _ => SslMode::Require,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admins_parse() {
        assert_eq!(parse_admins("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_admins(" 42 , 7 ").unwrap(), vec![42, 7]);
        assert!(parse_admins("").is_err());
        assert!(parse_admins("1,abc").is_err());
    }

    #[test]
    fn database_url_rewrite() {
        assert_eq!(
            normalize_database_url("postgres://u:p@h:5432/db"),
            "postgresql://u:p@h:5432/db"
        );
        assert_eq!(
            normalize_database_url("postgresql://u@h/db"),
            "postgresql://u@h/db"
        );
    }

    #[test]
    fn ssl_mode_default_is_require() {
        assert_eq!(parse_ssl_mode(None), SslMode::Require);
        assert_eq!(parse_ssl_mode(Some("require")), SslMode::Require);
        assert_eq!(parse_ssl_mode(Some("disable")), SslMode::Disable);
        // Unknown values fall back to the safe default.
        assert_eq!(parse_ssl_mode(Some("prefer")), SslMode::Require);
    }
}
