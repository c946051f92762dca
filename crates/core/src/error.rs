use crate::{
    log::LogCategory,
    model::{Address, ModuleIdentifier, Priority},
};

/// Result alias that carries the custom [`TesterError`] type.
pub type Result<T> = std::result::Result<T, TesterError>;

/// Common error type for fallible setup work in the core crate (loading
/// configuration, spawning the engine and notifier threads).
#[derive(Debug, thiserror::Error)]
pub enum TesterError {
    /// Free-form failure with a readable message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration file.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl TesterError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

/// Rejected point or module mutation. Never fatal: the model logs it and
/// leaves its state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("system number {0} is outside 1-200")]
    InvalidSystemNumber(u8),
    #[error("group number {0} is outside 1-60000")]
    InvalidGroupNumber(u16),
    #[error("point number {0} is outside 1-4000000000")]
    InvalidPointNumber(u32),
    #[error("priority {0} is outside 0-200")]
    InvalidPriority(Priority),
    #[error("a point already exists at {address} priority {priority}")]
    PointExists { address: Address, priority: Priority },
    #[error("no point exists at {address} priority {priority}")]
    PointNotFound { address: Address, priority: Priority },
    #[error("no point exists at {0}")]
    AddressNotFound(Address),
    #[error("{identifier} module already exists on {address} priority {priority}")]
    ModuleExists {
        identifier: ModuleIdentifier,
        address: Address,
        priority: Priority,
    },
    #[error("{identifier} module does not exist on {address} priority {priority}")]
    ModuleNotFound {
        identifier: ModuleIdentifier,
        address: Address,
        priority: Priority,
    },
    #[error("{identifier} module requires a {base} module on {address} priority {priority}")]
    MissingBaseModule {
        identifier: ModuleIdentifier,
        base: ModuleIdentifier,
        address: Address,
        priority: Priority,
    },
}

/// Errors raised by the external protocol component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Transport failure, typically while binding sockets on start.
    #[error("socket error: {0}")]
    Socket(String),
    /// Malformed or unexpected protocol layer data.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ComponentError {
    /// Category under which the error is reported in the log.
    pub fn log_category(&self) -> LogCategory {
        match self {
            Self::Validation(_) => LogCategory::Validation,
            Self::Socket(_) => LogCategory::SocketError,
            Self::Protocol(_) => LogCategory::ProtocolError,
            Self::Unknown(_) => LogCategory::UnknownError,
        }
    }
}
