//! Message dispatch primitives
//!
//! Instances answer instance-scope methods, type objects answer class-scope
//! methods, and proxies route through their interception table.

use std::sync::Arc;

use crate::error::{DispatchError, DispatchResult};
use crate::message::MessageId;
use crate::object::{ObjectRef, Scope};
use crate::reflect::{EntryPoint, Signature};
use crate::value::Value;

fn lookup(target: &Value, message: &MessageId) -> Option<EntryPoint> {
    match target.as_object()? {
        ObjectRef::Instance(instance) => instance.type_of().lookup(message, Scope::Instance),
        ObjectRef::Type(ty) => ty.lookup(message, Scope::Class),
        ObjectRef::Proxy(_) => None,
    }
}

pub(crate) fn unknown_message(target: &Value, message: &MessageId) -> DispatchError {
    DispatchError::UnknownMessage {
        receiver: target.to_string(),
        message: message.to_string(),
    }
}

/// Find the signature `target` would use for `message`
pub fn resolve_signature(target: &Value, message: &MessageId) -> Option<Arc<Signature>> {
    match target.as_object()? {
        ObjectRef::Proxy(proxy) => proxy.signature_for(message),
        _ => lookup(target, message).map(|entry| Arc::clone(entry.signature())),
    }
}

/// Send `message` to `target`
pub fn invoke(target: &Value, message: &MessageId, args: &[Value]) -> DispatchResult<Value> {
    if let Some(ObjectRef::Proxy(proxy)) = target.as_object() {
        return proxy.send(message, args);
    }
    let entry = lookup(target, message).ok_or_else(|| unknown_message(target, message))?;
    log::trace!("dispatch {} -> {}", message, target);
    entry.call(target, message, args)
}
