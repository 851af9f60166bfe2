/**
 * Error types for the STUN codec and the ICE gatherer
 */
use thiserror::Error;

/**
 * Failures raised while building or serializing STUN messages.
 *
 * Decoding never produces one of these, a buffer that is not a STUN
 * message simply decodes to `None`.
 */
#[derive(Debug, Error)]
pub enum StunError {
    #[error("message does not fit in {0} bytes")]
    BufferOverflow(usize),

    #[error("unknown attribute {0}")]
    UnknownAttribute(String),

    #[error("invalid value for attribute {attribute}: {reason}")]
    InvalidValue {
        attribute: &'static str,
        reason: &'static str,
    },

    #[error("i/o error while writing message: {0}")]
    Io(#[from] std::io::Error),
}

/**
 * Failures raised by the ICE gatherer.
 *
 * The first five variants map one to one onto the DOM exception names an
 * ORTC caller expects (InvalidStateError, SyntaxError, ...).
 */
#[derive(Debug, Error)]
pub enum IceError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid access: {0}")]
    InvalidAccess(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stun(#[from] StunError),

    #[error("gathering task failed: {0}")]
    Task(String),

    #[error("gathering needs a running tokio runtime")]
    NoRuntime,
}
