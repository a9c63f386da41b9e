use crate::result::ClientError;

/// Plumbing errors: bad arguments, disposed stores, misuse and transport failures.
///
/// GraphQL-level failures are not errors of this kind; they travel as
/// [`ClientError`] entries inside an otherwise valid result.
#[derive(Debug, thiserror::Error)]
pub enum ShakeError {
    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),
    #[error("invalid argument `{name}`: {reason}")]
    Argument { name: &'static str, reason: String },
    #[error("{0} has been disposed")]
    Disposed(&'static str),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("stored operation `{operation}` holds a different result type")]
    ResultTypeMismatch { operation: String },
    #[error("transport: {0:#}")]
    Transport(anyhow::Error),
    #[error("{} client error(s): {}", .0.len(), join_messages(.0))]
    Client(Vec<ClientError>),
}

pub type ShakeResult<T> = Result<T, ShakeError>;

fn join_messages(errors: &[ClientError]) -> String {
    errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
}
