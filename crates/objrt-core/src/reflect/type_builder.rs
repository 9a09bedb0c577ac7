//! Dynamic type builder
//!
//! A [`TypeBuilder`] reserves a name in a [`Runtime`], accumulates fields and
//! methods on a [`TypeDraft`] and seals it into an instantiable [`Type`].
//!
//! ## Rules
//!
//! - Fields fix the instance layout, so adding one after [`TypeBuilder::seal`]
//!   is a programming error and panics.
//! - Methods only patch a dispatch table and may be added at any time; after
//!   sealing they go straight into the sealed type's tables.
//! - Dropping a builder that was never sealed gives its name back.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::encoding::TypeDesc;
use crate::error::{FieldError, RegistryError};
use crate::message::MessageId;
use crate::object::{layout_fields, Scope, Type};
use crate::runtime::{FieldRedefinition, PatchPolicy, Runtime};

use super::method_builder::{EntryPoint, Implementation, MethodBuilder};
use super::signature::Signature;

/// A field declared on a draft
#[derive(Debug, Clone)]
pub(crate) struct FieldDef {
    pub(crate) name: String,
    pub(crate) encoding: String,
    pub(crate) desc: TypeDesc,
}

/// Mutable definition of a type that has not been sealed yet
#[derive(Debug)]
pub struct TypeDraft {
    pub(crate) name: String,
    pub(crate) base: Option<Arc<Type>>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) instance_methods: FxHashMap<MessageId, EntryPoint>,
    pub(crate) class_methods: FxHashMap<MessageId, EntryPoint>,
}

impl TypeDraft {
    pub(crate) fn new(name: String, base: Option<Arc<Type>>) -> Self {
        Self {
            name,
            base,
            fields: Vec::new(),
            instance_methods: FxHashMap::default(),
            class_methods: FxHashMap::default(),
        }
    }

    /// Draft name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base type
    pub fn base(&self) -> Option<&Arc<Type>> {
        self.base.as_ref()
    }

    /// Names of the fields declared on this draft, in order
    pub fn own_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    fn methods(&self, scope: Scope) -> &FxHashMap<MessageId, EntryPoint> {
        match scope {
            Scope::Instance => &self.instance_methods,
            Scope::Class => &self.class_methods,
        }
    }

    pub(crate) fn insert_method(&mut self, scope: Scope, message: MessageId, entry: EntryPoint) {
        let methods = match scope {
            Scope::Instance => &mut self.instance_methods,
            Scope::Class => &mut self.class_methods,
        };
        methods.insert(message, entry);
    }
}

/// Handle to a field added through a builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldHandle {
    name: String,
    encoding: String,
    index: usize,
}

impl FieldHandle {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded field type
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Slot index in instances of the sealed type
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Handle to a method added through a builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodHandle {
    message: MessageId,
    scope: Scope,
    encoded: String,
}

impl MethodHandle {
    fn new(message: MessageId, scope: Scope, entry: &EntryPoint) -> Self {
        Self {
            message,
            scope,
            encoded: entry.signature().encoded().to_string(),
        }
    }

    /// Message id
    pub fn message_id(&self) -> &MessageId {
        &self.message
    }

    /// Method table the method lives in
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Encoded signature of the installed method
    pub fn encoded_signature(&self) -> &str {
        &self.encoded
    }
}

/// Builder for a new type derived from a registered base
pub struct TypeBuilder<'rt> {
    runtime: &'rt Runtime,
    name: String,
    base: Arc<Type>,
    draft: Option<TypeDraft>,
    sealed: Option<Arc<Type>>,
}

impl<'rt> TypeBuilder<'rt> {
    /// Start a new type named `name` deriving from `base`
    ///
    /// # Errors
    ///
    /// `DuplicateName` if the name is registered or held by another unsealed
    /// builder; `InvalidBase` if `base` is not a type of this runtime.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn create(runtime: &'rt Runtime, name: &str, base: &Arc<Type>) -> Result<Self, RegistryError> {
        assert!(!name.is_empty(), "type name may not be empty");
        if !runtime.owns(base) {
            return Err(RegistryError::InvalidBase {
                name: base.name().to_string(),
                derived: name.to_string(),
            });
        }
        runtime.reserve_name(name)?;
        log::debug!("creating type '{}' : '{}'", name, base.name());

        Ok(Self {
            runtime,
            name: name.to_string(),
            base: Arc::clone(base),
            draft: Some(TypeDraft::new(name.to_string(), Some(Arc::clone(base)))),
            sealed: None,
        })
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base type
    pub fn base(&self) -> &Arc<Type> {
        &self.base
    }

    /// Check if the type has been sealed
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// The sealed type, once sealed
    pub fn sealed_type(&self) -> Option<&Arc<Type>> {
        self.sealed.as_ref()
    }

    /// The draft, while unsealed
    pub fn draft(&self) -> Option<&TypeDraft> {
        self.draft.as_ref()
    }

    /// Number of fields, inherited included
    pub fn field_count(&self) -> usize {
        match (&self.sealed, &self.draft) {
            (Some(ty), _) => ty.field_count(),
            (None, Some(draft)) => self.base.field_count() + draft.fields.len(),
            (None, None) => self.base.field_count(),
        }
    }

    /// Add a field
    ///
    /// # Errors
    ///
    /// `FieldError::Conflict` if a base type declares the name, or this draft
    /// does and the runtime rejects redefinitions. `FieldError::LayoutOverflow`
    /// if the instance would grow past [`MAX_TYPE_SIZE`](crate::encoding::MAX_TYPE_SIZE).
    ///
    /// # Panics
    ///
    /// Panics if the type is sealed, the name is empty or the descriptor is
    /// malformed or `v`.
    pub fn add_field(&mut self, name: &str, encoding: &str) -> Result<FieldHandle, FieldError> {
        let Some(draft) = self.draft.as_mut() else {
            panic!("cannot add field '{}' to sealed type '{}'", name, self.name);
        };
        assert!(!name.is_empty(), "field name may not be empty");
        let desc = TypeDesc::parse(encoding)
            .unwrap_or_else(|e| panic!("malformed type descriptor '{}' for field '{}': {}", encoding, name, e));
        assert!(!desc.is_void(), "field '{}' may not be void", name);

        if let Some(inherited) = self.base.field_named(name) {
            return Err(FieldError::Conflict {
                field: name.to_string(),
                declared_in: inherited.declared_in().to_string(),
            });
        }

        let inherited = self.base.field_count();
        let existing = draft.fields.iter().position(|f| f.name == name);
        if existing.is_some() && self.runtime.options().field_redefinition == FieldRedefinition::Reject {
            return Err(FieldError::Conflict {
                field: name.to_string(),
                declared_in: self.name.clone(),
            });
        }

        let descs = draft
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| if Some(i) == existing { &desc } else { &f.desc });
        let appended = existing.is_none().then_some(&desc);
        if layout_fields(self.base.instance_size(), descs.chain(appended)).is_none() {
            return Err(FieldError::LayoutOverflow {
                field: name.to_string(),
                type_name: self.name.clone(),
            });
        }

        if let Some(position) = existing {
            let field = &mut draft.fields[position];
            field.encoding = encoding.to_string();
            field.desc = desc;
            log::debug!("redefined field '{}.{}' as {}", self.name, name, encoding);
            return Ok(FieldHandle {
                name: name.to_string(),
                encoding: encoding.to_string(),
                index: inherited + position,
            });
        }

        draft.fields.push(FieldDef {
            name: name.to_string(),
            encoding: encoding.to_string(),
            desc,
        });
        log::debug!("added field '{}.{}' ({})", self.name, name, encoding);
        Ok(FieldHandle {
            name: name.to_string(),
            encoding: encoding.to_string(),
            index: inherited + draft.fields.len() - 1,
        })
    }

    /// Add an object reference field
    pub fn add_object_field(&mut self, name: &str) -> Result<FieldHandle, FieldError> {
        self.add_field(name, "@")
    }

    fn own_method(&self, message: &MessageId, scope: Scope) -> Option<EntryPoint> {
        match (&self.sealed, &self.draft) {
            (Some(ty), _) => ty.method_table(scope).get(message),
            (None, Some(draft)) => draft.methods(scope).get(message).cloned(),
            (None, None) => None,
        }
    }

    fn install(&mut self, message: MessageId, scope: Scope, entry: EntryPoint, policy: PatchPolicy) -> MethodHandle {
        let handle = MethodHandle::new(message.clone(), scope, &entry);
        match (&self.sealed, &mut self.draft) {
            (Some(ty), _) => {
                if !self.runtime.patch_method_table(ty, message.clone(), scope, entry, policy) {
                    // lost a race with another patch of the same message
                    if let Some(existing) = ty.method_table(scope).get(&message) {
                        return MethodHandle::new(message, scope, &existing);
                    }
                }
            }
            (None, Some(draft)) => {
                log::debug!("added {} method '{}' to '{}'", scope, message, self.name);
                draft.insert_method(scope, message, entry);
            }
            (None, None) => unreachable!("type builder is neither drafting nor sealed"),
        }
        handle
    }

    /// Add a method, replacing any method for the same message at this level
    ///
    /// # Panics
    ///
    /// Panics if the method's signature is incomplete or its closure was
    /// already consumed.
    pub fn add_method(&mut self, method: &mut MethodBuilder, scope: Scope) -> MethodHandle {
        let entry = method.finalize(self.runtime.options().call_checks());
        self.install(method.message_id().clone(), scope, entry, PatchPolicy::Replace)
    }

    /// Add a method unless this level already defines one for the message
    ///
    /// When a method exists its handle is returned and `method` is left
    /// untouched, closure included.
    pub fn add_method_if_absent(&mut self, method: &mut MethodBuilder, scope: Scope) -> MethodHandle {
        let message = method.message_id().clone();
        if let Some(existing) = self.own_method(&message, scope) {
            return MethodHandle::new(message, scope, &existing);
        }
        let entry = method.finalize(self.runtime.options().call_checks());
        self.install(message, scope, entry, PatchPolicy::KeepExisting)
    }

    /// Add a method from an encoded signature string, replacing any method for
    /// the same message at this level
    ///
    /// # Panics
    ///
    /// Panics if `types` is not a valid signature or its parameter count does
    /// not match the message id.
    pub fn add_method_with_types(
        &mut self,
        message: impl Into<MessageId>,
        types: &str,
        implementation: Implementation,
        scope: Scope,
    ) -> MethodHandle {
        let message = message.into();
        let signature = Signature::from_encoded(types)
            .unwrap_or_else(|e| panic!("invalid signature for '{}': {}", message, e));
        assert_eq!(
            signature.number_of_arguments(),
            message.arity(),
            "signature '{}' does not match the parameters of '{}'",
            types,
            message
        );
        let entry = EntryPoint::new(
            Arc::new(signature),
            implementation,
            self.runtime.options().call_checks(),
        );
        self.install(message, scope, entry, PatchPolicy::Replace)
    }

    /// Seal the draft and register the type
    ///
    /// Sealing twice returns the same type.
    pub fn seal(&mut self) -> Arc<Type> {
        if let Some(ty) = &self.sealed {
            return Arc::clone(ty);
        }
        let draft = self
            .draft
            .take()
            .unwrap_or_else(|| unreachable!("type builder is neither drafting nor sealed"));
        let ty = self.runtime.register_type(draft);
        self.sealed = Some(Arc::clone(&ty));
        ty
    }
}

impl Drop for TypeBuilder<'_> {
    fn drop(&mut self) {
        if self.draft.is_some() {
            self.runtime.release_name(&self.name);
        }
    }
}

impl std::fmt::Debug for TypeBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeBuilder")
            .field("name", &self.name)
            .field("base", &self.base.name())
            .field("sealed", &self.is_sealed())
            .field("fields", &self.field_count())
            .finish()
    }
}
