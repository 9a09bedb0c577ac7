//! Dynamic messaging runtime
//!
//! The runtime owns the registry of sealed types and protocols. Dispatch
//! itself needs no runtime handle: every receiver reaches its methods through
//! its own type, see [`dispatch`].

pub mod dispatch;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{DispatchError, DispatchResult, RegistryError};
use crate::message::MessageId;
use crate::object::{ObjectRef, Scope, Type};
use crate::reflect::{CallChecks, EntryPoint, MethodBuilder, Protocol, TypeDraft};
use crate::value::Value;

pub use dispatch::{invoke, resolve_signature};

/// What to do with a field name that an unsealed draft already declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldRedefinition {
    /// Report a `FieldError::Conflict`
    #[default]
    Reject,
    /// Replace the earlier field's type, keeping its position
    Overwrite,
}

/// How a method patch treats an existing entry for the same message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPolicy {
    /// Install the new entry point unconditionally
    Replace,
    /// Leave an existing entry point in place
    KeepExisting,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Name of the root type registered at construction
    pub root_type_name: String,

    /// Duplicate field policy for type drafts
    pub field_redefinition: FieldRedefinition,

    /// Check argument types against the signature on every call
    pub check_arguments: bool,

    /// Check return values against the signature on every call
    pub check_return_values: bool,
}

impl RuntimeOptions {
    /// Use a different root type name
    pub fn with_root_type_name(mut self, name: impl Into<String>) -> Self {
        self.root_type_name = name.into();
        self
    }

    /// Use a different duplicate field policy
    pub fn with_field_redefinition(mut self, policy: FieldRedefinition) -> Self {
        self.field_redefinition = policy;
        self
    }

    /// Enable or disable argument and return value checks
    pub fn with_call_checks(mut self, arguments: bool, return_values: bool) -> Self {
        self.check_arguments = arguments;
        self.check_return_values = return_values;
        self
    }

    /// The checks every entry point built under these options performs
    pub fn call_checks(&self) -> CallChecks {
        CallChecks {
            arguments: self.check_arguments,
            return_values: self.check_return_values,
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            root_type_name: "Object".to_string(),
            field_redefinition: FieldRedefinition::Reject,
            check_arguments: true,
            check_return_values: true,
        }
    }
}

#[derive(Default)]
struct Registry {
    types: FxHashMap<String, Arc<Type>>,
    /// Names held by unsealed drafts
    reserved: FxHashSet<String>,
    protocols: FxHashMap<String, Arc<Protocol>>,
}

/// Registry of sealed types and protocols
pub struct Runtime {
    options: RuntimeOptions,
    registry: RwLock<Registry>,
    next_type_id: AtomicUsize,
    root: Arc<Type>,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Create a runtime with the given options
    ///
    /// # Panics
    ///
    /// Panics if the root type name is empty.
    pub fn with_options(options: RuntimeOptions) -> Self {
        assert!(!options.root_type_name.is_empty(), "root type name may not be empty");

        let checks = options.call_checks();
        let mut draft = TypeDraft::new(options.root_type_name.clone(), None);
        let mut new = MethodBuilder::with_function_returning("new", "@", root_new);
        draft.insert_method(Scope::Class, new.message_id().clone(), new.finalize(checks));
        let mut class = MethodBuilder::with_function_returning("class", "@", root_class);
        draft.insert_method(Scope::Instance, class.message_id().clone(), class.finalize(checks));

        let root = Arc::new(Type::from_draft(0, draft));
        let mut registry = Registry::default();
        registry.types.insert(root.name().to_string(), Arc::clone(&root));
        log::debug!("runtime created with root type '{}'", root.name());

        Self {
            options,
            registry: RwLock::new(registry),
            next_type_id: AtomicUsize::new(1),
            root,
        }
    }

    /// Runtime configuration
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// The root type every other type derives from
    pub fn root_type(&self) -> &Arc<Type> {
        &self.root
    }

    /// Look up a sealed type by name
    pub fn type_named(&self, name: &str) -> Option<Arc<Type>> {
        self.registry.read().types.get(name).cloned()
    }

    /// Check if a sealed type with this name exists
    pub fn contains_type(&self, name: &str) -> bool {
        self.registry.read().types.contains_key(name)
    }

    /// Number of sealed types, root included
    pub fn type_count(&self) -> usize {
        self.registry.read().types.len()
    }

    /// All sealed types ordered by id
    pub fn types(&self) -> Vec<Arc<Type>> {
        let mut types: Vec<_> = self.registry.read().types.values().cloned().collect();
        types.sort_by_key(|t| t.id());
        types
    }

    /// Check if `ty` is the type registered in this runtime under its name
    pub fn owns(&self, ty: &Arc<Type>) -> bool {
        self.registry
            .read()
            .types
            .get(ty.name())
            .is_some_and(|registered| Arc::ptr_eq(registered, ty))
    }

    /// Claim a name for a new draft
    pub(crate) fn reserve_name(&self, name: &str) -> Result<(), RegistryError> {
        let mut registry = self.registry.write();
        if registry.types.contains_key(name) || registry.reserved.contains(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        registry.reserved.insert(name.to_string());
        Ok(())
    }

    /// Give back a name claimed by a draft that was never sealed
    pub(crate) fn release_name(&self, name: &str) {
        if self.registry.write().reserved.remove(name) {
            log::debug!("released unsealed type name '{}'", name);
        }
    }

    /// Seal a draft into a type and register it
    pub(crate) fn register_type(&self, draft: TypeDraft) -> Arc<Type> {
        let id = self.next_type_id.fetch_add(1, Ordering::Relaxed);
        let ty = Arc::new(Type::from_draft(id, draft));

        let mut registry = self.registry.write();
        registry.reserved.remove(ty.name());
        registry.types.insert(ty.name().to_string(), Arc::clone(&ty));
        log::debug!(
            "registered type '{}' (id {}, {} fields, {} bytes)",
            ty.name(),
            id,
            ty.field_count(),
            ty.instance_size()
        );
        ty
    }

    /// Install an entry point in a sealed type's method table
    ///
    /// Returns false when `policy` kept an existing entry.
    pub fn patch_method_table(
        &self,
        ty: &Type,
        message: MessageId,
        scope: Scope,
        entry: EntryPoint,
        policy: PatchPolicy,
    ) -> bool {
        log::debug!("patching {} method '{}' on '{}' ({:?})", scope, message, ty.name(), policy);
        ty.method_table(scope).insert(message, entry, policy)
    }

    /// Register a protocol, replacing any protocol of the same name
    pub fn register_protocol(&self, protocol: Protocol) -> Arc<Protocol> {
        let protocol = Arc::new(protocol);
        log::debug!("registered protocol '{}'", protocol.name());
        self.registry
            .write()
            .protocols
            .insert(protocol.name().to_string(), Arc::clone(&protocol));
        protocol
    }

    /// Look up a protocol by name
    pub fn protocol_named(&self, name: &str) -> Option<Arc<Protocol>> {
        self.registry.read().protocols.get(name).cloned()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("Runtime")
            .field("root", &self.root.name())
            .field("types", &registry.types.len())
            .field("protocols", &registry.protocols.len())
            .finish()
    }
}

fn root_new(receiver: &Value, message: &MessageId, _args: &[Value]) -> DispatchResult<Value> {
    match receiver.as_object().and_then(ObjectRef::as_type) {
        Some(ty) => Ok(Value::Object(ObjectRef::Instance(ty.instantiate()))),
        None => Err(DispatchError::Failed(format!("'{}' sent to {}", message, receiver))),
    }
}

fn root_class(receiver: &Value, message: &MessageId, _args: &[Value]) -> DispatchResult<Value> {
    match receiver.as_object().and_then(ObjectRef::as_instance) {
        Some(instance) => Ok(Value::Object(ObjectRef::Type(Arc::clone(instance.type_of())))),
        None => Err(DispatchError::Failed(format!("'{}' sent to {}", message, receiver))),
    }
}
