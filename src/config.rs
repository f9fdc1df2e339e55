//! Configuration types.
//!
//! Everything is read from the process environment once at startup. Each
//! section has its own loader so `import` does not require SMTP settings
//! and `dispatch` does not require ERP credentials.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Path segment of the WebSalesShipment page service, appended to each store URL.
pub const WEB_SALES_SHIPMENT_PAGE: &str = "/Page/WebSalesShipment";

/// Default sender address for survey emails.
pub const DEFAULT_FROM_ADDRESS: &str = "rsvp@hem.com";

/// Default cron schedule for `schedule`: every day at 06:00 UTC.
pub const DEFAULT_SCHEDULE: &str = "0 0 6 * * *";

/// Remote ERP (NAV) connection settings.
#[derive(Debug, Clone)]
pub struct NavConfig {
    pub username: String,
    pub password: SecretString,
    pub base_url: String,
    /// Path segment of the EU company/store, e.g. `/Hem%20EU`.
    pub eu_store: String,
    /// Path segment of the US company/store.
    pub us_store: String,
    pub timeout: Duration,
}

impl NavConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let timeout_secs: u64 = parse_or(&lookup, "NAV_TIMEOUT_SECS", 60)?;
        Ok(Self {
            username: required(&lookup, "NAV_USERNAME")?,
            password: SecretString::from(required(&lookup, "NAV_PASSWORD")?),
            base_url: required(&lookup, "NAV_BASE_URL")?,
            eu_store: required(&lookup, "NAV_EU_STORE")?,
            us_store: required(&lookup, "NAV_US_STORE")?,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn eu_url(&self) -> String {
        format!("{}{}{}", self.base_url, self.eu_store, WEB_SALES_SHIPMENT_PAGE)
    }

    pub fn us_url(&self) -> String {
        format!("{}{}{}", self.base_url, self.us_store, WEB_SALES_SHIPMENT_PAGE)
    }
}

/// Port of implicit-TLS SMTP (SMTPS).
pub const SMTPS_PORT: u16 = 465;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// Plaintext greeting, then `STARTTLS`.
    StartTls,
}

/// SMTP settings for the survey mailer.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl MailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            smtp_host: required(&lookup, "SMTP_HOST")?,
            smtp_port: parse_or(&lookup, "SMTP_PORT", 587)?,
            username: lookup("SMTP_USERNAME").unwrap_or_default(),
            password: SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default()),
            from_address: lookup("NPS_FROM_ADDRESS")
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
        })
    }

    /// Implicit TLS on 465, STARTTLS on every other port (587 by default).
    pub fn tls(&self) -> SmtpTls {
        if self.smtp_port == SMTPS_PORT {
            SmtpTls::Implicit
        } else {
            SmtpTls::StartTls
        }
    }
}

/// Survey link settings.
#[derive(Debug, Clone)]
pub struct SurveyConfig {
    /// Base URL of the survey site; score links are built below it.
    pub base_url: String,
}

impl SurveyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = required(&lookup, "NPS_BASE_URL")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub schedule: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            db_path: lookup("NPS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/shipment-nps.db")),
            schedule: lookup("NPS_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
        }
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn nav_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("NAV_USERNAME", "svc"),
            ("NAV_PASSWORD", "hunter2"),
            ("NAV_BASE_URL", "https://nav.example.com:7047/DynamicsNAV/WS"),
            ("NAV_EU_STORE", "/Hem%20EU"),
            ("NAV_US_STORE", "/Hem%20US"),
        ]
    }

    #[test]
    fn nav_config_builds_region_urls() {
        let cfg = NavConfig::from_lookup(lookup_from(&nav_vars())).unwrap();
        assert_eq!(
            cfg.eu_url(),
            "https://nav.example.com:7047/DynamicsNAV/WS/Hem%20EU/Page/WebSalesShipment"
        );
        assert_eq!(
            cfg.us_url(),
            "https://nav.example.com:7047/DynamicsNAV/WS/Hem%20US/Page/WebSalesShipment"
        );
        assert_eq!(cfg.password.expose_secret(), "hunter2");
        assert_eq!(cfg.timeout, Duration::from_secs(60));
    }

    #[test]
    fn nav_config_requires_credentials() {
        let vars: Vec<_> = nav_vars()
            .into_iter()
            .filter(|(k, _)| *k != "NAV_PASSWORD")
            .collect();
        let err = NavConfig::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "NAV_PASSWORD"));
    }

    #[test]
    fn nav_config_rejects_bad_timeout() {
        let mut vars = nav_vars();
        vars.push(("NAV_TIMEOUT_SECS", "soon"));
        let err = NavConfig::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "NAV_TIMEOUT_SECS"));
    }

    #[test]
    fn mail_config_defaults() {
        let cfg = MailConfig::from_lookup(lookup_from(&[("SMTP_HOST", "smtp.example.com")])).unwrap();
        assert_eq!(cfg.smtp_port, 587);
        assert_eq!(cfg.from_address, DEFAULT_FROM_ADDRESS);
        assert!(cfg.username.is_empty());
        assert_eq!(cfg.tls(), SmtpTls::StartTls);
    }

    #[test]
    fn smtps_port_uses_implicit_tls() {
        let cfg = MailConfig::from_lookup(lookup_from(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "465"),
        ]))
        .unwrap();
        assert_eq!(cfg.tls(), SmtpTls::Implicit);
    }

    #[test]
    fn survey_config_strips_trailing_slash() {
        let cfg =
            SurveyConfig::from_lookup(lookup_from(&[("NPS_BASE_URL", "https://nps.hem.com/")])).unwrap();
        assert_eq!(cfg.base_url, "https://nps.hem.com");
    }

    #[test]
    fn app_config_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[]));
        assert_eq!(cfg.db_path, PathBuf::from("./data/shipment-nps.db"));
        assert_eq!(cfg.schedule, DEFAULT_SCHEDULE);
    }
}
