use std::fmt;

/// Error taxonomy for the reminder core. Values, not exceptions — every
/// component returns one of these instead of panicking or throwing.
#[derive(Debug)]
pub enum RemindError {
    /// C1/C2 could not interpret user input. Surfaced as a clarification, not a failure.
    Parse(String),
    /// Inputs violate a contract (empty message, invalid channel, unconfirmed past time).
    Validation(String),
    /// Requested status transition is illegal.
    State { from: String, to: String },
    /// Missing or wrong bearer token on a protected callback.
    Auth(String),
    /// Unknown id.
    NotFound(String),
    /// Network/5xx from a notification provider. Retried by the scheduler.
    TransientDelivery(String),
    /// 4xx from a provider, or an unknown channel. Logged, not retried.
    PermanentDelivery(String),
    /// Underlying persistent store I/O failure.
    Store(String),
    /// Runaway-output guard, token-loop detector, or oversized message refused the input.
    Policy(String),
    /// Config file or environment could not be loaded/parsed.
    Config(String),
}

impl fmt::Display for RemindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::State { from, to } => write!(f, "invalid transition: {from} -> {to}"),
            Self::Auth(msg) => write!(f, "auth error: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::TransientDelivery(msg) => write!(f, "transient delivery error: {msg}"),
            Self::PermanentDelivery(msg) => write!(f, "permanent delivery error: {msg}"),
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::Policy(msg) => write!(f, "policy error: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for RemindError {}

pub type Result<T> = std::result::Result<T, RemindError>;
