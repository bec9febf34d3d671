use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Error kinds for versa operations
///
/// Every failure carries one kind. Kinds are the unit of classification for
/// rollback rules and retry policies, so they are `Hash + Eq` and can be
/// collected into sets.
///
/// # Examples
///
/// ```rust,ignore
/// use versa::errors::{VersaError, ErrorKind, VersaResult};
///
/// fn example() -> VersaResult<()> {
///     Err(VersaError::new("version mismatch", ErrorKind::Conflict))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorKind {
    // Concurrency Errors
    /// Submitted version does not match the stored version (optimistic locking failure)
    Conflict,
    /// A mutating operation was attempted in a read-only context
    ReadOnlyViolation,
    /// The context exceeded its time budget and was rolled back
    Timeout,

    // Lookup Errors
    /// The referenced record id is absent
    NotFound,

    // Lifecycle Errors
    /// The operation targeted a context that already committed or rolled back
    InactiveContext,
    /// A context was rolled back because a joined participant marked it rollback-only
    UnexpectedRollback,
    /// The operation is not valid in the current state
    InvalidOperation,
    /// A transaction, coordinator or retry configuration is invalid
    InvalidConfiguration,

    // Listener Errors
    /// Error raised by a transaction event listener
    EventError,

    // Validation Errors
    /// Domain validation failure raised by caller code
    ValidationError,

    // Caller-defined kinds. The String names the kind (e.g. "IllegalArgument").
    /// Error kind defined by application code running inside a context
    Domain(String),

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Shorthand for a caller-defined kind.
    pub fn domain(name: &str) -> Self {
        ErrorKind::Domain(name.to_string())
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Conflict => write!(f, "Optimistic locking conflict"),
            ErrorKind::ReadOnlyViolation => write!(f, "Read-only violation"),
            ErrorKind::Timeout => write!(f, "Transaction timeout"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::InactiveContext => write!(f, "Inactive context"),
            ErrorKind::UnexpectedRollback => write!(f, "Unexpected rollback"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::InvalidConfiguration => write!(f, "Invalid configuration"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::Domain(name) => write!(f, "{} error", name),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom versa error type.
///
/// `VersaError` carries the message, the kind and an optional cause. A
/// backtrace is captured at construction and printed by `Debug` for the
/// innermost error of a chain.
///
/// # Examples
///
/// ```rust,ignore
/// use versa::errors::{VersaError, ErrorKind};
///
/// let err = VersaError::new("record 7 not found", ErrorKind::NotFound);
///
/// let cause = VersaError::new("record 7 changed", ErrorKind::Conflict);
/// let err = VersaError::new_with_cause("commit failed", ErrorKind::Conflict, cause);
/// ```
#[derive(Clone)]
pub struct VersaError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<VersaError>>,
    backtrace: Atomic<Backtrace>,
}

impl VersaError {
    /// Creates a new `VersaError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        VersaError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `VersaError` wrapping a cause.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: VersaError) -> Self {
        VersaError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates an error of a caller-defined kind.
    ///
    /// ```rust,ignore
    /// let err = VersaError::domain("IllegalArgument", "email must not be empty");
    /// assert_eq!(err.kind(), &ErrorKind::Domain("IllegalArgument".into()));
    /// ```
    pub fn domain(kind: &str, message: &str) -> Self {
        VersaError::new(message, ErrorKind::domain(kind))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&VersaError> {
        self.cause.as_deref()
    }

    /// Returns true if this error or any error in its cause chain has `kind`.
    pub fn has_kind(&self, kind: &ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(err) = current {
            if &err.error_kind == kind {
                return true;
            }
            current = err.cause();
        }
        false
    }
}

impl Display for VersaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for VersaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(
                f,
                "[{}] {}\nCaused by: {:?}",
                self.error_kind, self.message, cause
            ),
            None => write!(
                f,
                "[{}] {}\n{:?}",
                self.error_kind,
                self.message,
                self.backtrace.read()
            ),
        }
    }
}

impl Error for VersaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for versa operations.
pub type VersaResult<T> = Result<T, VersaError>;

impl From<std::fmt::Error> for VersaError {
    fn from(err: std::fmt::Error) -> Self {
        VersaError::new(
            &format!("Formatting error: {}", err),
            ErrorKind::InternalError,
        )
    }
}

impl From<String> for VersaError {
    fn from(msg: String) -> Self {
        VersaError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for VersaError {
    fn from(msg: &str) -> Self {
        VersaError::new(msg, ErrorKind::InternalError)
    }
}
