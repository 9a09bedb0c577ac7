//! Message identifiers

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Name of one callable member of a type
///
/// Each `:` in the name marks one explicit parameter, so `increment` takes no
/// arguments and `addX:toY:` takes two. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Arc<str>);

impl MessageId {
    /// Create a message id
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn new(name: &str) -> Self {
        assert!(!name.is_empty(), "message id may not be empty");
        MessageId(Arc::from(name))
    }

    /// The message name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of explicit parameters implied by the name
    pub fn arity(&self) -> usize {
        self.0.bytes().filter(|&b| b == b':').count()
    }
}

impl From<&str> for MessageId {
    fn from(name: &str) -> Self {
        MessageId::new(name)
    }
}

impl From<String> for MessageId {
    fn from(name: String) -> Self {
        MessageId::new(&name)
    }
}

impl From<&MessageId> for MessageId {
    fn from(id: &MessageId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
