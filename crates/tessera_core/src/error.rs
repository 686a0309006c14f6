//! Error types for the tessera binding core.

use tessera_codec::CodecError;
use tessera_engine::{EngineError, ErrorCategories, ErrorCode};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the binding core.
///
/// Engine failures are translated once, at the call site closest to the
/// engine, through the closed table in [`CoreError::from_engine`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Requested type, collection kind or nullability does not match the schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Names the property with expected and actual types.
        message: String,
    },

    /// The object, collection or generation was deleted or closed.
    #[error("invalidated object: {message}")]
    InvalidatedObject {
        /// Description of the invalid handle.
        message: String,
    },

    /// A storage constraint was violated.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Names the offending class, property and value.
        message: String,
    },

    /// A mutation was attempted outside an active write scope.
    #[error("transaction state: {message}")]
    TransactionState {
        /// Description of the state problem.
        message: String,
    },

    /// The engine reported an error the core does not recognize.
    #[error("unknown engine error {code} (categories {categories:#x}): {message}")]
    EngineUnknown {
        /// Raw engine code.
        code: i32,
        /// Raw category bitmask.
        categories: u32,
        /// Engine message.
        message: String,
    },

    /// An argument was rejected.
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// Description of the argument problem.
        message: String,
    },

    /// The requested operator or configuration is not supported.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A stored integer does not fit the requested user type.
    #[error("value {value} is out of range for {type_name}")]
    ValueOutOfRange {
        /// The requested user type.
        type_name: &'static str,
        /// The stored value.
        value: i64,
    },

    /// A notification consumer fell behind its delivery buffer.
    #[error(
        "notification buffer of {capacity} events overflowed; consume events faster, \
         buffer them upstream or use a scheduler with more dispatch capacity"
    )]
    NotificationOverflow {
        /// Capacity of the delivery channel.
        capacity: usize,
    },

    /// A raw change batch could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CoreError {
    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalidated object error.
    pub fn invalidated(message: impl Into<String>) -> Self {
        Self::InvalidatedObject {
            message: message.into(),
        }
    }

    /// Creates the error for operations on a deleted or stale object.
    pub fn invalid_object() -> Self {
        Self::invalidated("Cannot perform this operation on an invalid/deleted object")
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a transaction state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    /// Creates the error for mutations outside a write scope.
    pub fn not_in_write() -> Self {
        Self::transaction_state("Cannot modify managed objects outside of a write transaction.")
    }

    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a value out of range error.
    pub fn out_of_range(type_name: &'static str, value: i64) -> Self {
        Self::ValueOutOfRange { type_name, value }
    }

    /// Translates an engine error into the core taxonomy.
    ///
    /// Codes are matched first. Codes without an entry fall back to the
    /// category bitmask, and anything left is preserved as
    /// [`CoreError::EngineUnknown`] with its raw numbers.
    pub fn from_engine(error: EngineError) -> Self {
        let EngineError {
            code,
            categories,
            message,
        } = error;
        match code {
            ErrorCode::WrongTransactionState | ErrorCode::ReadOnlyDb => {
                Self::TransactionState { message }
            }
            ErrorCode::InvalidatedObject
            | ErrorCode::StaleAccessor
            | ErrorCode::ClosedRealm
            | ErrorCode::NoSuchObject => Self::InvalidatedObject { message },
            ErrorCode::SchemaMismatch
            | ErrorCode::SchemaValidationFailed
            | ErrorCode::InvalidProperty
            | ErrorCode::NoSuchTable => Self::SchemaMismatch { message },
            ErrorCode::PropertyTypeMismatch
            | ErrorCode::ObjectTypeMismatch
            | ErrorCode::PropertyNotNullable
            | ErrorCode::ReadOnlyProperty
            | ErrorCode::MissingPrimaryKey
            | ErrorCode::UnexpectedPrimaryKey
            | ErrorCode::ModifyPrimaryKey
            | ErrorCode::ObjectAlreadyExists
            | ErrorCode::KeyAlreadyUsed
            | ErrorCode::TopLevelObject
            | ErrorCode::CrossTableLinkTarget
            | ErrorCode::IllegalOperation
            | ErrorCode::InvalidDictionaryKey
            | ErrorCode::InvalidDictionaryValue => Self::ConstraintViolation { message },
            ErrorCode::InvalidArgument
            | ErrorCode::IndexOutOfBounds
            | ErrorCode::RangeError
            | ErrorCode::NotSupported => Self::IllegalArgument { message },
            ErrorCode::Unknown(_) => Self::unknown(code, categories, message),
            _ if categories.contains(ErrorCategories::INVALID_ARG) => {
                Self::IllegalArgument { message }
            }
            _ => Self::unknown(code, categories, message),
        }
    }

    fn unknown(code: ErrorCode, categories: ErrorCategories, message: String) -> Self {
        Self::EngineUnknown {
            code: code.as_i32(),
            categories: categories.bits(),
            message,
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(error: EngineError) -> Self {
        Self::from_engine(error)
    }
}
