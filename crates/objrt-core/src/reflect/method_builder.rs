//! Method builder
//!
//! A [`MethodBuilder`] extends a [`SignatureBuilder`] with a message id and
//! the code backing the method. The implementation is only turned into a
//! callable [`EntryPoint`] at registration, once the signature is complete.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::encoding::ParameterFlags;
use crate::error::DispatchResult;
use crate::marshal;
use crate::message::MessageId;
use crate::value::Value;

use super::signature::{Signature, SignatureBuilder};

/// Native function implementation: receiver, message id, arguments
pub type NativeFn = fn(&Value, &MessageId, &[Value]) -> DispatchResult<Value>;

/// Closure implementation: receiver, arguments
pub type ClosureFn = dyn Fn(&Value, &[Value]) -> DispatchResult<Value> + Send + Sync;

/// The code backing a method
pub enum Implementation {
    /// A native function pointer, reusable across registrations
    Function(NativeFn),
    /// A closure, moved into the first registry that accepts it
    Closure(Box<ClosureFn>),
}

impl Implementation {
    /// Wrap a closure
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Implementation::Closure(Box::new(f))
    }

    /// Check if this is a closure
    pub fn is_closure(&self) -> bool {
        matches!(self, Implementation::Closure(_))
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Function(func) => write!(f, "Function({:p})", *func as *const ()),
            Implementation::Closure(_) => write!(f, "Closure"),
        }
    }
}

/// Checks performed around every call of an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallChecks {
    /// Check argument types against the signature
    pub arguments: bool,
    /// Check the return value against the signature
    pub return_values: bool,
}

impl Default for CallChecks {
    fn default() -> Self {
        Self {
            arguments: true,
            return_values: true,
        }
    }
}

#[derive(Clone)]
enum Callable {
    Function(NativeFn),
    Closure(Arc<ClosureFn>),
}

/// An implementation bound to a complete signature
///
/// Entry points are cheap to clone; clones share the same closure.
#[derive(Clone)]
pub struct EntryPoint {
    signature: Arc<Signature>,
    callable: Callable,
    checks: CallChecks,
}

impl EntryPoint {
    pub(crate) fn new(signature: Arc<Signature>, implementation: Implementation, checks: CallChecks) -> Self {
        let callable = match implementation {
            Implementation::Function(f) => Callable::Function(f),
            Implementation::Closure(c) => Callable::Closure(Arc::from(c)),
        };
        Self {
            signature,
            callable,
            checks,
        }
    }

    /// The signature calls are checked against
    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    /// Check if the entry point wraps a closure
    pub fn is_closure(&self) -> bool {
        matches!(self.callable, Callable::Closure(_))
    }

    /// Call the implementation
    ///
    /// The argument count is always checked; argument and return value types
    /// are checked as configured. A void method returns `Value::Null`.
    pub fn call(&self, receiver: &Value, message: &MessageId, args: &[Value]) -> DispatchResult<Value> {
        if self.checks.arguments {
            marshal::check_arguments(message, &self.signature, args)?;
        } else {
            marshal::check_argument_count(message, &self.signature, args)?;
        }

        let result = match &self.callable {
            Callable::Function(f) => f(receiver, message, args)?,
            Callable::Closure(c) => c(receiver, args)?,
        };
        if self.signature.return_type().type_desc().is_void() {
            return Ok(Value::Null);
        }
        if self.checks.return_values {
            marshal::check_return(message, &self.signature, &result)?;
        }
        Ok(result)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("signature", &self.signature.encoded())
            .field("closure", &self.is_closure())
            .finish()
    }
}

/// Builder for one method: message id, signature and implementation
///
/// Derefs to [`SignatureBuilder`] for every signature operation. The
/// signature is complete only once exactly as many parameters are typed as
/// the message id has `:` separators.
pub struct MethodBuilder {
    signature: SignatureBuilder,
    message: MessageId,
    implementation: Option<Implementation>,
}

impl MethodBuilder {
    fn create(message: MessageId, return_type: Option<&str>, implementation: Implementation) -> Self {
        let mut signature = SignatureBuilder::new();
        if let Some(return_type) = return_type {
            signature.set_return_type(return_type, ParameterFlags::empty());
        }
        Self {
            signature,
            message,
            implementation: Some(implementation),
        }
    }

    /// Method backed by a closure, returning void
    ///
    /// # Panics
    ///
    /// Panics if `message` is empty.
    pub fn with_closure<F>(message: impl Into<MessageId>, closure: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Self::create(message.into(), None, Implementation::closure(closure))
    }

    /// Method backed by a closure with the given return type
    pub fn with_closure_returning<F>(message: impl Into<MessageId>, return_type: &str, closure: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Self::create(message.into(), Some(return_type), Implementation::closure(closure))
    }

    /// Method backed by a native function, returning void
    pub fn with_function(message: impl Into<MessageId>, function: NativeFn) -> Self {
        Self::create(message.into(), None, Implementation::Function(function))
    }

    /// Method backed by a native function with the given return type
    pub fn with_function_returning(
        message: impl Into<MessageId>,
        return_type: &str,
        function: NativeFn,
    ) -> Self {
        Self::create(message.into(), Some(return_type), Implementation::Function(function))
    }

    /// The message id
    pub fn message_id(&self) -> &MessageId {
        &self.message
    }

    /// Number of parameters the message id implies
    pub fn arity(&self) -> usize {
        self.message.arity()
    }

    /// The implementation, `None` once a closure has been consumed
    pub fn implementation(&self) -> Option<&Implementation> {
        self.implementation.as_ref()
    }

    /// Check if a closure implementation has been moved into a registry
    pub fn is_consumed(&self) -> bool {
        self.implementation.is_none()
    }

    fn is_fully_typed(&self) -> bool {
        self.signature.number_of_parameters() == self.arity()
    }

    /// The encoded signature, `None` until every parameter is typed
    pub fn encoded_signature(&self) -> Option<&str> {
        if !self.is_fully_typed() {
            return None;
        }
        self.signature.encoded_signature()
    }

    /// An immutable copy of the signature, `None` until every parameter is typed
    pub fn snapshot(&self) -> Option<Signature> {
        if !self.is_fully_typed() {
            return None;
        }
        self.signature.snapshot()
    }

    /// Turn the implementation into an entry point
    ///
    /// Function pointers are copied and can be finalized again; a closure is
    /// moved out and the builder is marked consumed.
    ///
    /// # Panics
    ///
    /// Panics if the signature is incomplete or the closure was already
    /// consumed.
    pub(crate) fn finalize(&mut self, checks: CallChecks) -> EntryPoint {
        let signature = match self.snapshot() {
            Some(signature) => Arc::new(signature),
            None => panic!(
                "cannot finalize '{}': {} of {} parameters typed or parameters have gaps",
                self.message,
                self.signature.number_of_parameters(),
                self.arity()
            ),
        };
        let implementation = match self.implementation.take() {
            Some(Implementation::Function(f)) => {
                self.implementation = Some(Implementation::Function(f));
                Implementation::Function(f)
            }
            Some(closure) => closure,
            None => panic!("implementation of '{}' was already consumed by a registry", self.message),
        };
        EntryPoint::new(signature, implementation, checks)
    }
}

impl Deref for MethodBuilder {
    type Target = SignatureBuilder;

    fn deref(&self) -> &SignatureBuilder {
        &self.signature
    }
}

impl DerefMut for MethodBuilder {
    fn deref_mut(&mut self) -> &mut SignatureBuilder {
        &mut self.signature
    }
}

impl fmt::Debug for MethodBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBuilder")
            .field("message", &self.message)
            .field("signature", &self.signature)
            .field("implementation", &self.implementation)
            .finish()
    }
}
