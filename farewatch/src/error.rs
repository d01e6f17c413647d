use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Stats fields whose validation failures trigger the clear-and-retry recovery.
pub const STATS_FIELDS: [&str; 3] = ["average_price", "lowest_price", "highest_price"];

/// Failures of the external flight-search collaborator.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rejected query: {0}")]
    Provider(String),
}

/// Failures of the outbound notification channel.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification channel not configured")]
    NotConfigured,
}

/// Failures of the persistent store, classified so the orchestrator can
/// tell schema validation apart from connectivity problems.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("store transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for validation failures that reference a numeric stats field.
    ///
    /// Field names are matched loosely (`stats.averagePrice`,
    /// `stats_average_price`, …) since they come from the store's own wording.
    pub fn is_stats_validation(&self) -> bool {
        let StoreError::Validation { field, message } = self else {
            return false;
        };
        let haystack = format!("{field} {message}").to_ascii_lowercase().replace('_', "");
        STATS_FIELDS
            .iter()
            .any(|f| haystack.contains(&f.replace('_', "")))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match message.strip_prefix("CHECK constraint failed: ") {
                    Some(constraint) => StoreError::Validation {
                        field: constraint.trim().to_string(),
                        message,
                    },
                    None => StoreError::Permanent(message),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Transport(e.to_string()),
            other => StoreError::Permanent(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Permanent(format!("serialization: {e}"))
    }
}

/// Errors surfaced by the orchestrator's public operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("watch not found: {0}")]
    WatchNotFound(Uuid),

    #[error("owner not found: {0}")]
    OwnerNotFound(Uuid),

    #[error("a monitoring cycle is already in flight")]
    Busy,

    #[error("invalid watch: {0}")]
    InvalidWatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_validation_matches_camel_and_snake_case() {
        assert!(StoreError::validation("stats.averagePrice", "must be < 10000").is_stats_validation());
        assert!(StoreError::validation("stats_lowest_price", "CHECK constraint failed").is_stats_validation());
        assert!(StoreError::validation("doc", "stats.highestPrice: Cast to Number failed").is_stats_validation());
    }

    #[test]
    fn other_errors_are_not_stats_validation() {
        assert!(!StoreError::validation("price_threshold", "must be > 0").is_stats_validation());
        assert!(!StoreError::Transport("averagePrice".into()).is_stats_validation());
        assert!(!StoreError::Permanent("boom".into()).is_stats_validation());
    }

    #[test]
    fn pool_timeouts_classify_as_transport() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Transport(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Permanent(_)
        ));
    }
}
