//! The engine error signal.
//!
//! Every fallible engine call reports an [`EngineError`]: a numeric
//! [`ErrorCode`], a [`ErrorCategories`] bitmask and a message. The code
//! table below is closed and versioned with this crate. Numbers outside it
//! decode to [`ErrorCode::Unknown`] instead of failing, so a binding built
//! against an older table still receives a usable error.

use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error codes raised by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic runtime failure.
    Runtime,
    /// A value was outside its permitted range.
    RangeError,
    /// The engine ran out of memory.
    OutOfMemory,
    /// An object with the same primary key already exists.
    ObjectAlreadyExists,
    /// Generic logic error.
    Logic,
    /// The operation is not supported.
    NotSupported,
    /// A link points at an object in the wrong table.
    CrossTableLinkTarget,
    /// A key is already used.
    KeyAlreadyUsed,
    /// The operation requires a different transaction state.
    WrongTransactionState,
    /// The handle was used from a thread it is not bound to.
    WrongThread,
    /// The operation is illegal on this target.
    IllegalOperation,
    /// The accessor belongs to a generation that is no longer current.
    StaleAccessor,
    /// The object or collection was deleted.
    InvalidatedObject,
    /// The realm is read-only.
    ReadOnlyDb,
    /// The realm was closed.
    ClosedRealm,
    /// The schema failed validation.
    SchemaValidationFailed,
    /// The schema does not match.
    SchemaMismatch,
    /// Embedded objects cannot be created at top level.
    TopLevelObject,
    /// Generic invalid argument.
    InvalidArgument,
    /// The value has the wrong type for the property.
    PropertyTypeMismatch,
    /// Null was assigned to a required property.
    PropertyNotNullable,
    /// The property is computed and cannot be written.
    ReadOnlyProperty,
    /// A primary key value is missing.
    MissingPrimaryKey,
    /// A primary key was given for a class without one.
    UnexpectedPrimaryKey,
    /// Primary keys cannot change after creation.
    ModifyPrimaryKey,
    /// The property does not exist or has the wrong shape.
    InvalidProperty,
    /// The dictionary key is invalid.
    InvalidDictionaryKey,
    /// The dictionary value is invalid.
    InvalidDictionaryValue,
    /// The referenced object does not exist.
    NoSuchObject,
    /// An index was out of bounds.
    IndexOutOfBounds,
    /// The link target has the wrong class.
    ObjectTypeMismatch,
    /// The class does not exist.
    NoSuchTable,
    /// A code this table does not know.
    Unknown(i32),
}

impl ErrorCode {
    /// Returns the numeric wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Runtime => 1000,
            ErrorCode::RangeError => 1001,
            ErrorCode::OutOfMemory => 1003,
            ErrorCode::ObjectAlreadyExists => 1013,
            ErrorCode::Logic => 2000,
            ErrorCode::NotSupported => 2001,
            ErrorCode::CrossTableLinkTarget => 2003,
            ErrorCode::KeyAlreadyUsed => 2004,
            ErrorCode::WrongTransactionState => 2005,
            ErrorCode::WrongThread => 2006,
            ErrorCode::IllegalOperation => 2007,
            ErrorCode::StaleAccessor => 2009,
            ErrorCode::InvalidatedObject => 2010,
            ErrorCode::ReadOnlyDb => 2011,
            ErrorCode::ClosedRealm => 2014,
            ErrorCode::SchemaValidationFailed => 2016,
            ErrorCode::SchemaMismatch => 2017,
            ErrorCode::TopLevelObject => 2022,
            ErrorCode::InvalidArgument => 3000,
            ErrorCode::PropertyTypeMismatch => 3001,
            ErrorCode::PropertyNotNullable => 3002,
            ErrorCode::ReadOnlyProperty => 3003,
            ErrorCode::MissingPrimaryKey => 3005,
            ErrorCode::UnexpectedPrimaryKey => 3006,
            ErrorCode::ModifyPrimaryKey => 3007,
            ErrorCode::InvalidProperty => 3009,
            ErrorCode::InvalidDictionaryKey => 3011,
            ErrorCode::InvalidDictionaryValue => 3012,
            ErrorCode::NoSuchObject => 3015,
            ErrorCode::IndexOutOfBounds => 3016,
            ErrorCode::ObjectTypeMismatch => 3018,
            ErrorCode::NoSuchTable => 3020,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Returns the categories an engine attaches to this code by default.
    #[must_use]
    pub const fn default_categories(self) -> ErrorCategories {
        match self.as_i32() {
            1000..=1999 => ErrorCategories::RUNTIME,
            2000..=2999 => ErrorCategories::LOGIC,
            3000..=3999 => ErrorCategories::LOGIC.union(ErrorCategories::INVALID_ARG),
            _ => ErrorCategories::empty(),
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(value: i32) -> Self {
        match value {
            1000 => ErrorCode::Runtime,
            1001 => ErrorCode::RangeError,
            1003 => ErrorCode::OutOfMemory,
            1013 => ErrorCode::ObjectAlreadyExists,
            2000 => ErrorCode::Logic,
            2001 => ErrorCode::NotSupported,
            2003 => ErrorCode::CrossTableLinkTarget,
            2004 => ErrorCode::KeyAlreadyUsed,
            2005 => ErrorCode::WrongTransactionState,
            2006 => ErrorCode::WrongThread,
            2007 => ErrorCode::IllegalOperation,
            2009 => ErrorCode::StaleAccessor,
            2010 => ErrorCode::InvalidatedObject,
            2011 => ErrorCode::ReadOnlyDb,
            2014 => ErrorCode::ClosedRealm,
            2016 => ErrorCode::SchemaValidationFailed,
            2017 => ErrorCode::SchemaMismatch,
            2022 => ErrorCode::TopLevelObject,
            3000 => ErrorCode::InvalidArgument,
            3001 => ErrorCode::PropertyTypeMismatch,
            3002 => ErrorCode::PropertyNotNullable,
            3003 => ErrorCode::ReadOnlyProperty,
            3005 => ErrorCode::MissingPrimaryKey,
            3006 => ErrorCode::UnexpectedPrimaryKey,
            3007 => ErrorCode::ModifyPrimaryKey,
            3009 => ErrorCode::InvalidProperty,
            3011 => ErrorCode::InvalidDictionaryKey,
            3012 => ErrorCode::InvalidDictionaryValue,
            3015 => ErrorCode::NoSuchObject,
            3016 => ErrorCode::IndexOutOfBounds,
            3018 => ErrorCode::ObjectTypeMismatch,
            3020 => ErrorCode::NoSuchTable,
            other => ErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unknown(code) => write!(f, "Unknown({code})"),
            known => write!(f, "{known:?}"),
        }
    }
}

bitflags::bitflags! {
    /// Bitmask of error categories.
    ///
    /// Bits outside the named flags are retained, so a mask received from a
    /// newer engine survives the round trip into [`EngineError`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrorCategories: u32 {
        /// Programming errors.
        const LOGIC = 0x0002;
        /// Environmental failures.
        const RUNTIME = 0x0004;
        /// Invalid arguments.
        const INVALID_ARG = 0x0008;
        /// File access failures.
        const FILE_ACCESS = 0x0010;
        /// Operating system errors.
        const SYSTEM_ERROR = 0x0020;
        /// Application service errors.
        const APP_ERROR = 0x0040;
        /// Client errors.
        const CLIENT_ERROR = 0x0080;
        /// JSON errors.
        const JSON_ERROR = 0x0100;
        /// Service errors.
        const SERVICE_ERROR = 0x0200;
        /// HTTP errors.
        const HTTP_ERROR = 0x0400;
        /// Errors raised by user callbacks.
        const CUSTOM_ERROR = 0x0800;
        /// Websocket errors.
        const WEBSOCKET_ERROR = 0x1000;
        /// Sync errors.
        const SYNC_ERROR = 0x2000;

        const _ = !0;
    }
}

impl fmt::Display for ErrorCategories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.bits())
    }
}

/// An error reported by an engine call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}]: {message}")]
pub struct EngineError {
    /// The error code.
    pub code: ErrorCode,
    /// The category bitmask.
    pub categories: ErrorCategories,
    /// Human-readable description.
    pub message: String,
}

impl EngineError {
    /// Creates an error with the code's default categories.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            categories: code.default_categories(),
            message: message.into(),
        }
    }

    /// Creates an error from raw numbers as received over an FFI boundary.
    pub fn from_raw(code: i32, categories: u32, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from(code),
            categories: ErrorCategories::from_bits_retain(categories),
            message: message.into(),
        }
    }

    /// Creates a wrong transaction state error.
    pub fn not_in_write() -> Self {
        Self::new(
            ErrorCode::WrongTransactionState,
            "Cannot modify managed objects outside of a write transaction.",
        )
    }

    /// Creates an invalidated object error.
    pub fn invalidated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidatedObject, message)
    }

    /// Creates an illegal operation error.
    pub fn illegal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalOperation, message)
    }
}
