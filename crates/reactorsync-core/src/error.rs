//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Error type shared by the pipeline and simulation control."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use reactorsync_common::ReactorId;
use reactorsync_msg::MessagingError;
use reactorsync_persistence::StoreError;
use reactorsync_sim::{AnomalyError, RangeViolation};

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown reactor {0}")]
    UnknownReactor(ReactorId),
    #[error("invalid anomaly request: {0}")]
    InvalidAnomalySpec(String),
    #[error("reading out of range: {0}")]
    RangeViolation(#[from] RangeViolation),
    #[error("publish failed after {attempts} attempts: {source}")]
    TransientPublishFailure {
        attempts: usize,
        #[source]
        source: MessagingError,
    },
    #[error("persist failed after {attempts} attempts: {source}")]
    TransientPersistFailure {
        attempts: usize,
        #[source]
        source: StoreError,
    },
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownReactor(id) => CoreError::UnknownReactor(id),
            other => CoreError::Store(other),
        }
    }
}

impl From<AnomalyError> for CoreError {
    fn from(err: AnomalyError) -> Self {
        CoreError::InvalidAnomalySpec(err.to_string())
    }
}
