//! Typed error hierarchy for the reaper engine.
//!
//! One enum per seam:
//! - `ChainError`: chain registry construction and lookup
//! - `StoreError` / `DeleteError`: record store queries and deletions
//! - `DiscoveryError`: pass-fatal discovery failures
//! - `SubmitError`: job scheduler rejections
//! - `EngineError`: everything surfaced to a caller of the engine

use thiserror::Error;

/// Errors from the chain registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain '{name}' not found")]
    NotFound { name: String },

    #[error("Chain '{name}' is declared more than once")]
    Duplicate { name: String },

    #[error("Chain '{name}' has no stages")]
    Empty { name: String },

    #[error("Invalid {what} '{value}' in chain '{chain}': only letters, digits and '_' are allowed")]
    InvalidIdentifier {
        chain: String,
        what: &'static str,
        value: String,
    },
}

/// Errors from a record store query.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Query against '{source_name}' failed: {message}")]
    Query {
        source_name: String,
        message: String,
    },

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of a failed delete, as reported by the store.
///
/// `NotFound` and `ConcurrentModification` are expected races during a
/// multi-pass sweep and are classified as skipped, never as failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeleteError {
    #[error("Record does not exist")]
    NotFound,

    #[error("Record was changed or is already being deleted")]
    ConcurrentModification,

    #[error("{0}")]
    Other(String),
}

/// Discovery failures that abort the current pass.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Could not query record type '{category}': {source}")]
    DeleteAllQuery {
        category: String,
        #[source]
        source: StoreError,
    },

    #[error("Record type '{0}' is not a valid table name")]
    InvalidCategory(String),
}

/// Errors from the job scheduler boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Job queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Concurrency limit reached for job '{definition}'")]
    ConcurrencyLimit { definition: String },

    #[error("Job queue is closed")]
    Closed,

    #[error("Scheduler rejected job: {0}")]
    Rejected(String),
}

/// Errors surfaced by the engine to its callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Missing run parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid run parameters: {0}")]
    InvalidParameters(String),

    #[error("Loop {loop_index} exceeds the loop budget of {budget}")]
    LoopBudgetExceeded { loop_index: u32, budget: u32 },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to submit pass: {0}")]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_error_not_found_carries_name() {
        let err = ChainError::NotFound {
            name: "O2C".to_string(),
        };
        assert!(err.to_string().contains("O2C"));
    }

    #[test]
    fn discovery_error_keeps_store_source() {
        let err = DiscoveryError::DeleteAllQuery {
            category: "vendorbill".to_string(),
            source: StoreError::Query {
                source_name: "vendorbill".to_string(),
                message: "no such table".to_string(),
            },
        };
        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("no such table"));
        assert!(err.to_string().contains("vendorbill"));
    }

    #[test]
    fn engine_error_converts_from_submit_error() {
        let err: EngineError = SubmitError::QueueFull { capacity: 4 }.into();
        match &err {
            EngineError::Submit(SubmitError::QueueFull { capacity }) => assert_eq!(*capacity, 4),
            _ => panic!("Expected EngineError::Submit(QueueFull)"),
        }
        assert!(err.to_string().contains("queue is full"));
    }

    #[test]
    fn engine_error_converts_from_discovery_error() {
        let err: EngineError = DiscoveryError::InvalidCategory("!!".to_string()).into();
        assert!(matches!(
            err,
            EngineError::Discovery(DiscoveryError::InvalidCategory(_))
        ));
    }

    #[test]
    fn loop_budget_exceeded_mentions_both_numbers() {
        let err = EngineError::LoopBudgetExceeded {
            loop_index: 6,
            budget: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains('6'));
        assert!(msg.contains('5'));
    }

    #[test]
    fn delete_errors_are_distinct() {
        assert_ne!(DeleteError::NotFound, DeleteError::ConcurrentModification);
        assert_eq!(
            DeleteError::Other("locked".into()).to_string(),
            "locked".to_string()
        );
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ChainError::Empty { name: "x".into() });
        assert_std_error(&StoreError::Unavailable("x".into()));
        assert_std_error(&DeleteError::NotFound);
        assert_std_error(&DiscoveryError::InvalidCategory("x".into()));
        assert_std_error(&SubmitError::Closed);
        assert_std_error(&EngineError::MissingParameter("reaper_chain"));
    }
}
