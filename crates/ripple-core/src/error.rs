//! Error kinds generated and propagated by the engine.
//!
//! Every client-visible failure is a [`CommandError`]: a kind tag plus
//! the exact message that goes on the wire as a single error frame.
//! The first token of the message doubles as the wire-level error code,
//! matching the convention existing clients already parse.

use thiserror::Error;

/// Classification of an engine error. Recoverable kinds keep the
/// connection open; the rest have connection- or process-level
/// consequences handled by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed wire input or unparseable request.
    Parse,
    /// Operation applied to a key holding the wrong value type.
    TypeMismatch,
    /// Wrong argument count or malformed argument.
    Args,
    /// A command that requires an existing key didn't find one.
    KeyNotFound,
    /// Numeric argument or stored value out of range.
    Range,
    /// Authentication required or failed.
    Auth,
    /// The connection registry is full.
    TooManyClients,
    /// The engine is draining; the command was rejected.
    ShuttingDown,
    /// The write-ahead log refused the append; the mutation was aborted.
    DurabilityFailed,
    /// Advisory: durability is impaired but the write was admitted.
    Degraded,
    /// A watch subscriber's notification inbox overflowed.
    SubscriberOverflow,
    /// Unexpected internal failure, logged with context server-side.
    Internal,
}

impl ErrorKind {
    /// Whether the connection survives after this error is returned.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Parse
                | ErrorKind::TypeMismatch
                | ErrorKind::Args
                | ErrorKind::KeyNotFound
                | ErrorKind::Range
                | ErrorKind::Auth
                | ErrorKind::Degraded
                | ErrorKind::Internal
        )
    }
}

/// A client-visible error: kind tag plus wire message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Parse, format!("ERR Protocol error: {detail}"))
    }

    pub fn wrong_type() -> Self {
        Self::new(
            ErrorKind::TypeMismatch,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )
    }

    pub fn wrong_args(command: &str) -> Self {
        Self::new(
            ErrorKind::Args,
            format!(
                "ERR wrong number of arguments for '{}' command",
                command.to_ascii_lowercase()
            ),
        )
    }

    pub fn syntax() -> Self {
        Self::new(ErrorKind::Args, "ERR syntax error")
    }

    pub fn unknown_command(name: &str) -> Self {
        Self::new(ErrorKind::Args, format!("ERR unknown command '{name}'"))
    }

    pub fn no_such_key() -> Self {
        Self::new(ErrorKind::KeyNotFound, "ERR no such key")
    }

    pub fn not_an_integer() -> Self {
        Self::new(
            ErrorKind::Range,
            "ERR value is not an integer or out of range",
        )
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::Range, "ERR increment or decrement would overflow")
    }

    pub fn not_a_float() -> Self {
        Self::new(ErrorKind::Range, "ERR value is not a valid float")
    }

    pub fn auth_required() -> Self {
        Self::new(ErrorKind::Auth, "NOAUTH Authentication required.")
    }

    pub fn invalid_password() -> Self {
        Self::new(ErrorKind::Auth, "ERR invalid password")
    }

    pub fn auth_not_enabled() -> Self {
        Self::new(
            ErrorKind::Auth,
            "ERR Client sent AUTH, but no password is set",
        )
    }

    pub fn too_many_clients() -> Self {
        Self::new(ErrorKind::TooManyClients, "ERR max number of clients reached")
    }

    pub fn shutting_down() -> Self {
        Self::new(ErrorKind::ShuttingDown, "SHUTDOWN server is shutting down")
    }

    pub fn durability_failed() -> Self {
        Self::new(
            ErrorKind::DurabilityFailed,
            "DURABILITY write-ahead log append failed, command aborted",
        )
    }

    pub fn subscriber_overflow() -> Self {
        Self::new(
            ErrorKind::SubscriberOverflow,
            "OVERFLOW watch notification inbox overflowed",
        )
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, format!("ERR internal error: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_leads_with_code() {
        assert!(CommandError::wrong_type().message.starts_with("WRONGTYPE"));
        assert!(CommandError::auth_required().message.starts_with("NOAUTH"));
        assert!(CommandError::shutting_down().message.starts_with("SHUTDOWN"));
        assert!(CommandError::durability_failed()
            .message
            .starts_with("DURABILITY"));
    }

    #[test]
    fn recoverable_classification() {
        assert!(ErrorKind::TypeMismatch.is_recoverable());
        assert!(ErrorKind::Auth.is_recoverable());
        assert!(!ErrorKind::TooManyClients.is_recoverable());
        assert!(!ErrorKind::ShuttingDown.is_recoverable());
    }

    #[test]
    fn arity_message_matches_convention() {
        assert_eq!(
            CommandError::wrong_args("GET").message,
            "ERR wrong number of arguments for 'get' command"
        );
    }
}
