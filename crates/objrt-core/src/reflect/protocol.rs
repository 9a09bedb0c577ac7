//! Protocol signature tables
//!
//! A protocol names a set of messages, each with a signature and a required
//! or optional marker. Types never declare adoption; [`Type::conforms_to`]
//! checks that every required method resolves.
//!
//! [`Type::conforms_to`]: crate::object::Type::conforms_to

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::EncodingError;
use crate::message::MessageId;
use crate::object::Scope;

use super::signature::Signature;

#[derive(Debug, Clone)]
struct ProtocolMethod {
    signature: Arc<Signature>,
    required: bool,
}

/// A named set of method signatures
#[derive(Debug, Clone)]
pub struct Protocol {
    name: String,
    methods: FxHashMap<(Scope, MessageId), ProtocolMethod>,
}

impl Protocol {
    /// Create an empty protocol
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn new(name: &str) -> Self {
        assert!(!name.is_empty(), "protocol name may not be empty");
        Self {
            name: name.to_string(),
            methods: FxHashMap::default(),
        }
    }

    /// Protocol name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a method from its encoded signature
    pub fn add_method(
        &mut self,
        scope: Scope,
        message: impl Into<MessageId>,
        types: &str,
        required: bool,
    ) -> Result<(), EncodingError> {
        let signature = Signature::from_encoded(types)?;
        let message = message.into();
        if signature.number_of_arguments() != message.arity() {
            return Err(EncodingError::MalformedSignature(types.to_string()));
        }
        self.methods.insert(
            (scope, message),
            ProtocolMethod {
                signature: Arc::new(signature),
                required,
            },
        );
        Ok(())
    }

    /// Signature of a declared method with the given required marker
    pub fn signature_for(&self, message: &MessageId, scope: Scope, required: bool) -> Option<Arc<Signature>> {
        self.methods
            .get(&(scope, message.clone()))
            .filter(|m| m.required == required)
            .map(|m| Arc::clone(&m.signature))
    }

    /// Required methods as (scope, message) pairs
    pub fn required_methods(&self) -> impl Iterator<Item = (Scope, &MessageId)> {
        self.methods
            .iter()
            .filter(|(_, m)| m.required)
            .map(|((scope, message), _)| (*scope, message))
    }

    /// Number of declared methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if no methods are declared
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting() -> Protocol {
        let mut protocol = Protocol::new("Counting");
        protocol.add_method(Scope::Instance, "increment", "v16@0:8", true).unwrap();
        protocol.add_method(Scope::Instance, "count", "i16@0:8", true).unwrap();
        protocol.add_method(Scope::Instance, "reset", "v16@0:8", false).unwrap();
        protocol.add_method(Scope::Class, "counterWithValue:", "@24@0:8i16", false).unwrap();
        protocol
    }

    #[test]
    fn test_signature_lookup() {
        let protocol = counting();
        let count = MessageId::new("count");
        assert_eq!(
            protocol.signature_for(&count, Scope::Instance, true).unwrap().encoded(),
            "i16@0:8"
        );
        assert!(protocol.signature_for(&count, Scope::Instance, false).is_none());
        assert!(protocol.signature_for(&count, Scope::Class, true).is_none());

        let factory = MessageId::new("counterWithValue:");
        let signature = protocol.signature_for(&factory, Scope::Class, false).unwrap();
        assert_eq!(signature.number_of_arguments(), 1);
    }

    #[test]
    fn test_required_methods() {
        let protocol = counting();
        let mut required: Vec<_> = protocol
            .required_methods()
            .map(|(_, m)| m.as_str().to_string())
            .collect();
        required.sort();
        assert_eq!(required, vec!["count", "increment"]);
        assert_eq!(protocol.len(), 4);
    }

    #[test]
    fn test_rejects_bad_signatures() {
        let mut protocol = Protocol::new("Broken");
        assert!(protocol.add_method(Scope::Instance, "count", "i16", true).is_err());
        assert!(matches!(
            protocol.add_method(Scope::Instance, "setCount:", "v16@0:8", true),
            Err(EncodingError::MalformedSignature(_))
        ));
        assert!(protocol.is_empty());
    }
}
