//! Error enums, one per concern, plus the crate-wide [`Error`].

use uuid::Uuid;

/// Any failure the service can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Database(#[from] DatabaseError),

    #[error("mail: {0}")]
    Mail(#[from] MailError),

    #[error("places: {0}")]
    Places(#[from] PlacesError),

    #[error("oauth: {0}")]
    OAuth(#[from] OAuthError),

    #[error("campaign: {0}")]
    Campaign(#[from] CampaignError),
}

/// Bad or missing environment settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingEnvVar(String),

    #[error("{key} is invalid: {message}")]
    InvalidValue { key: String, message: String },
}

/// Store failures. `Constraint` covers unique and foreign-key violations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Cannot open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("{entity} {id} does not exist")]
    NotFound { entity: String, id: String },

    #[error("Rejected by constraint: {0}")]
    Constraint(String),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Bad stored value: {0}")]
    Serialization(String),
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Provider {provider} rejected message: {reason}")]
    SendFailed { provider: String, reason: String },

    #[error("Provider {provider} rejected credentials")]
    Unauthenticated { provider: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Places search errors.
#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("Places API key is not configured")]
    MissingApiKey,

    #[error("Places API returned {status}: {message}")]
    Api { status: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// OAuth token exchange errors.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth client is not configured: {0}")]
    NotConfigured(String),

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Campaign-level errors. These abort a whole operation; per-recipient
/// failures are recorded on the recipient row instead.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Campaign {id} not found")]
    NotFound { id: Uuid },

    #[error("List {id} not found")]
    ListNotFound { id: Uuid },

    #[error("Recipient {id} not found")]
    RecipientNotFound { id: Uuid },

    #[error("User {user_id} is not authenticated with {provider}")]
    Unauthenticated { user_id: String, provider: String },

    #[error("Campaign {id} is {state}: {reason}")]
    InvalidState {
        id: Uuid,
        state: String,
        reason: String,
    },

    #[error("Invalid campaign: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Send failed: {0}")]
    SendFailed(#[from] MailError),
}

pub type Result<T> = std::result::Result<T, Error>;
