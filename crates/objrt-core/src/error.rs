//! Error types for type construction and message dispatch
//!
//! Misuse of the construction APIs (mutating a sealed type, malformed type
//! descriptors, re-attaching a consumed closure) is a programming error and
//! panics at the offending call. The types here cover the conditions a caller
//! is expected to handle.

/// Result type for message dispatch
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors raised while creating a type draft
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A type with this name is already registered or being built
    #[error("Type '{0}' already exists")]
    DuplicateName(String),

    /// The base type is not registered with this runtime
    #[error("Invalid base type '{name}' for '{derived}'")]
    InvalidBase {
        /// Name of the rejected base type
        name: String,
        /// Name of the type being created
        derived: String,
    },
}

/// Errors raised while adding fields to a type draft
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// A field with this name already exists on the draft or a base type
    #[error("Field '{field}' conflicts with an existing field of '{declared_in}'")]
    Conflict {
        /// Conflicting field name
        field: String,
        /// Type that already declares the field
        declared_in: String,
    },

    /// The value does not conform to the field's type
    #[error("Field '{field}' expects {expected}, got {got}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Encoded field type
        expected: String,
        /// Kind of the rejected value
        got: String,
    },

    /// Adding the field would grow the instance layout past its size limit
    #[error("Field '{field}' does not fit in the instance layout of '{type_name}'")]
    LayoutOverflow {
        /// Rejected field name
        field: String,
        /// Type being built
        type_name: String,
    },

    /// No field with this name exists
    #[error("Unknown field '{0}'")]
    Unknown(String),
}

/// Errors raised while parsing a type descriptor or signature string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// Input ended in the middle of a descriptor
    #[error("Unexpected end of type encoding '{0}'")]
    UnexpectedEnd(String),

    /// A character that does not start any descriptor
    #[error("Unexpected '{ch}' at offset {offset} in '{input}'")]
    UnexpectedChar {
        /// Offending character
        ch: char,
        /// Byte offset in the input
        offset: usize,
        /// The full input
        input: String,
    },

    /// Extra characters after a complete descriptor
    #[error("Trailing characters after type encoding '{0}'")]
    TrailingInput(String),

    /// Array or bitfield with a missing or zero length
    #[error("Invalid length in type encoding '{0}'")]
    InvalidLength(String),

    /// A type whose size exceeds the largest supported layout
    #[error("Type encoding '{0}' is too large")]
    SizeOverflow(String),

    /// A signature string whose implicit receiver/message slots are missing
    #[error("Malformed method signature '{0}'")]
    MalformedSignature(String),
}

/// Errors raised while dispatching a message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// The receiver has no method for the message and nothing intercepts it
    #[error("{receiver} does not respond to '{message}'")]
    UnknownMessage {
        /// Description of the receiver
        receiver: String,
        /// The unhandled message
        message: String,
    },

    /// Wrong number of arguments for the message's signature
    #[error("'{message}' expects {expected} arguments, got {got}")]
    ArgumentCount {
        /// Message being dispatched
        message: String,
        /// Arity from the signature
        expected: usize,
        /// Number of arguments supplied
        got: usize,
    },

    /// An argument or return value does not conform to the signature
    #[error("'{message}' {position} expects {expected}, got {got}")]
    TypeMismatch {
        /// Message being dispatched
        message: String,
        /// "argument N" or "return value"
        position: String,
        /// Encoded expected type
        expected: String,
        /// Kind of the rejected value
        got: String,
    },

    /// Failure reported by a method implementation
    #[error("{0}")]
    Failed(String),
}

impl From<String> for DispatchError {
    fn from(s: String) -> Self {
        DispatchError::Failed(s)
    }
}

impl From<&str> for DispatchError {
    fn from(s: &str) -> Self {
        DispatchError::Failed(s.to_string())
    }
}

impl From<FieldError> for DispatchError {
    fn from(e: FieldError) -> Self {
        DispatchError::Failed(e.to_string())
    }
}
