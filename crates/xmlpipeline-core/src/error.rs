//! The pump's error taxonomy.
//!
//! Stages never bubble these up as `Err` through the pipeline — they record
//! a `PumpError` onto the in-flight `MessageState` and let the error-filter
//! stage short-circuit it before dispatch (see `pump::Pipeline`). `Result`
//! is still the right shape for the functions *inside* a stage; it's only
//! the stage-to-stage contract that accumulates instead of propagating.

use thiserror::Error;

/// One entry per kind in spec §7. Each carries enough context to log
/// `thread_id`, the kind, and a short message, and nothing more — these are
/// not meant to be matched on by callers beyond their discriminant.
#[derive(Debug, Error, Clone)]
pub enum PumpError {
    #[error("malformed: {0}")]
    Malformed(String),

    #[error("envelope invalid: {0}")]
    EnvelopeInvalid(String),

    #[error("payload shape invalid: {0}")]
    PayloadShapeInvalid(String),

    #[error("no route for '{0}'")]
    NoRoute(String),

    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("deserialisation failed: {0}")]
    DeserialisationFailed(String),

    #[error("handler fault: {0}")]
    HandlerFault(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl PumpError {
    /// The taxonomy tag, for structured logging (`tracing` fields, metrics).
    pub fn kind(&self) -> &'static str {
        match self {
            PumpError::Malformed(_) => "MALFORMED",
            PumpError::EnvelopeInvalid(_) => "ENVELOPE_INVALID",
            PumpError::PayloadShapeInvalid(_) => "PAYLOAD_SHAPE_INVALID",
            PumpError::NoRoute(_) => "NO_ROUTE",
            PumpError::SchemaInvalid(_) => "SCHEMA_INVALID",
            PumpError::DeserialisationFailed(_) => "DESERIALISATION_FAILED",
            PumpError::HandlerFault(_) => "HANDLER_FAULT",
            PumpError::Internal(_) => "INTERNAL",
        }
    }
}
