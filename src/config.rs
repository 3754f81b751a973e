//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default maximum sends per second (matches a typical SendGrid plan).
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default number of messages drained from the queue per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Dispatch throttling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum messages per second.
    pub rate_limit: u32,
    /// Messages drained per chunk.
    pub batch_size: usize,
}

impl DispatchConfig {
    /// Build a validated config. Both values must be non-zero.
    pub fn new(rate_limit: u32, batch_size: usize) -> Result<Self, ConfigError> {
        if rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LEADGEN_RATE_LIMIT".into(),
                message: "must be greater than zero".into(),
            });
        }
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LEADGEN_BATCH_SIZE".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(Self {
            rate_limit,
            batch_size,
        })
    }

    /// Minimum gap between two sends.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_limit
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Which mail API campaigns are sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailProvider {
    /// Gmail REST API with the campaign owner's OAuth token.
    Gmail,
    /// SendGrid v3 API with a service API key.
    SendGrid,
    /// Plain SMTP relay.
    Smtp,
}

impl std::str::FromStr for MailProvider {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "sendgrid" => Ok(Self::SendGrid),
            "smtp" => Ok(Self::Smtp),
            other => Err(ConfigError::InvalidValue {
                key: "LEADGEN_MAIL_PROVIDER".into(),
                message: format!("unknown provider '{other}' (expected gmail, sendgrid or smtp)"),
            }),
        }
    }
}

/// Google OAuth client credentials.
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// SendGrid credentials.
#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: SecretString,
    pub from_address: String,
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub dispatch: DispatchConfig,
    pub mail_provider: MailProvider,
    pub places_api_key: Option<SecretString>,
    pub google_oauth: Option<GoogleOAuthConfig>,
    pub sendgrid: Option<SendGridConfig>,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&lookup, "LEADGEN_PORT", 8080u16)?;
        let db_path = lookup("LEADGEN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/leadgen.db"));
        let log_dir = lookup("LEADGEN_LOG_DIR").map(PathBuf::from);

        let dispatch = DispatchConfig::new(
            parse_or(&lookup, "LEADGEN_RATE_LIMIT", DEFAULT_RATE_LIMIT)?,
            parse_or(&lookup, "LEADGEN_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
        )?;

        let mail_provider = match lookup("LEADGEN_MAIL_PROVIDER") {
            Some(s) => s.parse()?,
            None => MailProvider::Gmail,
        };

        let places_api_key = non_empty(&lookup, "GOOGLE_PLACES_API_KEY").map(SecretString::from);

        let google_oauth = match (
            non_empty(&lookup, "GOOGLE_CLIENT_ID"),
            non_empty(&lookup, "GOOGLE_CLIENT_SECRET"),
        ) {
            (Some(client_id), Some(secret)) => Some(GoogleOAuthConfig {
                client_id,
                client_secret: SecretString::from(secret),
                redirect_uri: lookup("GOOGLE_REDIRECT_URI").unwrap_or_else(|| {
                    format!("http://localhost:{port}/api/auth/gmail")
                }),
            }),
            _ => None,
        };

        let sendgrid = non_empty(&lookup, "SENDGRID_API_KEY").map(|key| SendGridConfig {
            api_key: SecretString::from(key),
            from_address: lookup("SENDGRID_FROM").unwrap_or_default(),
        });

        let smtp = match non_empty(&lookup, "SMTP_HOST") {
            Some(host) => {
                let username = lookup("SMTP_USERNAME").unwrap_or_default();
                Some(SmtpConfig {
                    host,
                    port: parse_or(&lookup, "SMTP_PORT", 587u16)?,
                    password: SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default()),
                    from_address: lookup("SMTP_FROM").unwrap_or_else(|| username.clone()),
                    username,
                })
            }
            None => None,
        };

        let config = Self {
            port,
            db_path,
            log_dir,
            dispatch,
            mail_provider,
            places_api_key,
            google_oauth,
            sendgrid,
            smtp,
        };
        config.check_provider()?;
        Ok(config)
    }

    /// The selected mail provider must have its credentials present.
    fn check_provider(&self) -> Result<(), ConfigError> {
        let missing = match self.mail_provider {
            MailProvider::Gmail if self.google_oauth.is_none() => Some("GOOGLE_CLIENT_ID"),
            MailProvider::SendGrid if self.sendgrid.is_none() => Some("SENDGRID_API_KEY"),
            MailProvider::Smtp if self.smtp.is_none() => Some("SMTP_HOST"),
            _ => None,
        };
        match missing {
            Some(var) => Err(ConfigError::MissingEnvVar(var.to_string())),
            None => Ok(()),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
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
