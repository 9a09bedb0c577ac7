//! Reified message sends

use std::sync::Arc;

use crate::error::{DispatchError, DispatchResult};
use crate::message::MessageId;
use crate::runtime::dispatch;
use crate::value::Value;

use super::signature::Signature;

/// One pending call: target, message, arguments and return slot
///
/// The signature is fixed at creation; everything else may be changed before
/// the invocation is dispatched.
#[derive(Debug, Clone)]
pub struct Invocation {
    target: Value,
    message: MessageId,
    signature: Arc<Signature>,
    arguments: Vec<Value>,
    return_value: Value,
}

impl Invocation {
    /// Create an invocation with zero-valued argument and return slots
    pub fn new(signature: impl Into<Arc<Signature>>, target: Value, message: impl Into<MessageId>) -> Self {
        let signature = signature.into();
        let arguments = signature
            .parameters()
            .iter()
            .map(|p| Value::zero_for(p.type_desc()))
            .collect();
        let return_value = Value::zero_for(signature.return_type().type_desc());
        Self {
            target,
            message: message.into(),
            signature,
            arguments,
            return_value,
        }
    }

    /// Create an invocation carrying the arguments of an actual call
    pub(crate) fn with_arguments(
        signature: Arc<Signature>,
        target: Value,
        message: MessageId,
        arguments: &[Value],
    ) -> DispatchResult<Self> {
        let expected = signature.number_of_arguments();
        if arguments.len() != expected {
            return Err(DispatchError::ArgumentCount {
                message: message.to_string(),
                expected,
                got: arguments.len(),
            });
        }
        let return_value = Value::zero_for(signature.return_type().type_desc());
        Ok(Self {
            target,
            message,
            signature,
            arguments: arguments.to_vec(),
            return_value,
        })
    }

    /// The receiver the invocation will be sent to
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// Change the receiver
    pub fn set_target(&mut self, target: Value) {
        self.target = target;
    }

    /// The message id
    pub fn message_id(&self) -> &MessageId {
        &self.message
    }

    /// Change the message id
    pub fn set_message_id(&mut self, message: impl Into<MessageId>) {
        self.message = message.into();
    }

    /// The fixed signature
    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    /// Number of argument slots
    pub fn number_of_arguments(&self) -> usize {
        self.arguments.len()
    }

    /// Read an argument slot
    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// All argument slots
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Write an argument slot
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`number_of_arguments`](Self::number_of_arguments).
    pub fn set_argument(&mut self, index: usize, value: Value) {
        let count = self.arguments.len();
        match self.arguments.get_mut(index) {
            Some(slot) => *slot = value,
            None => panic!(
                "argument index {} out of range for '{}' ({} arguments)",
                index, self.message, count
            ),
        }
    }

    /// The return slot
    pub fn return_value(&self) -> &Value {
        &self.return_value
    }

    /// Write the return slot
    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = value;
    }

    /// Move the value out of the return slot, leaving null
    pub fn take_return_value(&mut self) -> Value {
        std::mem::take(&mut self.return_value)
    }

    /// Dispatch to the current target and store the result in the return slot
    pub fn invoke(&mut self) -> DispatchResult<Value> {
        let result = dispatch::invoke(&self.target, &self.message, &self.arguments)?;
        self.return_value = result.clone();
        Ok(result)
    }

    /// Set the target, then dispatch
    pub fn invoke_with_target(&mut self, target: Value) -> DispatchResult<Value> {
        self.target = target;
        self.invoke()
    }
}
