//! Message interception proxy
//!
//! An [`InterceptionProxy`] stands in for a target object. Messages without an
//! interception pass straight through to the target. Intercepted messages are
//! reified as an [`Invocation`] and handed to the handler, which may rewrite
//! the target, message, arguments or return slot and then decides whether
//! the call is forwarded.
//!
//! ## Locking
//!
//! The interception table lock is held only long enough to clone the handler
//! out. Handlers run unlocked, so a handler may add or remove interceptions
//! (its own included) without deadlocking, and a removal never affects a
//! dispatch that has already looked its handler up.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::DispatchResult;
use crate::message::MessageId;
use crate::object::ObjectRef;
use crate::runtime::dispatch;
use crate::value::Value;

use super::invocation::Invocation;
use super::signature::Signature;

/// Handler for an intercepted message; returns true to forward the invocation
pub type InterceptHandler = dyn Fn(&InterceptionProxy, &mut Invocation) -> bool + Send + Sync;

#[derive(Clone)]
struct Interception {
    signature: Option<Arc<Signature>>,
    handler: Arc<InterceptHandler>,
}

/// A stand-in object that diverts selected messages to handlers
pub struct InterceptionProxy {
    target: Value,
    table: RwLock<FxHashMap<MessageId, Interception>>,
}

impl InterceptionProxy {
    /// Wrap `target`, which may be null
    ///
    /// The proxy owns its target; the target is released with the last proxy
    /// handle.
    pub fn new(target: Value) -> Arc<Self> {
        Arc::new(Self {
            target,
            table: RwLock::new(FxHashMap::default()),
        })
    }

    /// The proxy as a message receiver
    pub fn into_value(self: Arc<Self>) -> Value {
        Value::Object(ObjectRef::Proxy(self))
    }

    /// The wrapped target
    pub fn interception_target(&self) -> &Value {
        &self.target
    }

    /// Intercept `message`, replacing any earlier handler for it
    ///
    /// `signature` describes the message when the target cannot; without one
    /// the target's own signature is used at dispatch time.
    pub fn intercept<F>(&self, message: impl Into<MessageId>, signature: Option<Signature>, handler: F)
    where
        F: Fn(&InterceptionProxy, &mut Invocation) -> bool + Send + Sync + 'static,
    {
        let message = message.into();
        log::debug!("intercepting '{}' on {}", message, self.target);
        let interception = Interception {
            signature: signature.map(Arc::new),
            handler: Arc::new(handler),
        };
        self.table.write().insert(message, interception);
    }

    /// Stop intercepting `message`; returns false if it was not intercepted
    pub fn remove_interception(&self, message: &MessageId) -> bool {
        let removed = self.table.write().remove(message).is_some();
        if removed {
            log::debug!("removed interception of '{}'", message);
        }
        removed
    }

    /// Check if `message` is intercepted
    pub fn is_intercepting(&self, message: &MessageId) -> bool {
        self.table.read().contains_key(message)
    }

    /// Number of intercepted messages
    pub fn interception_count(&self) -> usize {
        self.table.read().len()
    }

    /// The signature used for `message`: the intercepted one, else the target's
    pub fn signature_for(&self, message: &MessageId) -> Option<Arc<Signature>> {
        let registered = self
            .table
            .read()
            .get(message)
            .and_then(|i| i.signature.clone());
        registered.or_else(|| dispatch::resolve_signature(&self.target, message))
    }

    /// Deliver a message to the proxy
    pub fn send(&self, message: &MessageId, args: &[Value]) -> DispatchResult<Value> {
        let interception = self.table.read().get(message).cloned();
        let Some(interception) = interception else {
            log::trace!("proxy passing '{}' through to {}", message, self.target);
            return dispatch::invoke(&self.target, message, args);
        };

        let signature = match interception.signature {
            Some(signature) => signature,
            None => dispatch::resolve_signature(&self.target, message)
                .ok_or_else(|| dispatch::unknown_message(&self.target, message))?,
        };
        let mut invocation =
            Invocation::with_arguments(signature, self.target.clone(), message.clone(), args)?;

        let forward = (interception.handler)(self, &mut invocation);
        log::trace!("handler for '{}' returned forward={}", message, forward);
        if forward && !invocation.target().is_null() {
            invocation.invoke()?;
        }
        Ok(invocation.take_return_value())
    }
}

impl fmt::Debug for InterceptionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut intercepted: Vec<_> = self.table.read().keys().cloned().collect();
        intercepted.sort();
        f.debug_struct("InterceptionProxy")
            .field("target", &self.target)
            .field("intercepted", &intercepted)
            .finish()
    }
}
