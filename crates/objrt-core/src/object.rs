//! Object model: sealed types, instances and receiver handles

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::encoding::{checked_align_up, TypeDesc, MAX_TYPE_SIZE, WORD_SIZE};
use crate::error::FieldError;
use crate::marshal;
use crate::message::MessageId;
use crate::reflect::{EntryPoint, InterceptionProxy, Protocol, TypeDraft};
use crate::runtime::PatchPolicy;
use crate::value::Value;

/// Offset of the first field; the hidden type pointer occupies the first word
/// of every instance
pub(crate) const FIRST_FIELD_OFFSET: usize = WORD_SIZE;

/// Lay fields out after `start`, each at its natural alignment
///
/// Returns the field offsets and the word-aligned end of the layout, or
/// `None` if the layout would grow past [`MAX_TYPE_SIZE`].
pub(crate) fn layout_fields<'a>(
    start: usize,
    descs: impl IntoIterator<Item = &'a TypeDesc>,
) -> Option<(Vec<usize>, usize)> {
    let mut offsets = Vec::new();
    let mut cursor = start;
    for desc in descs {
        let offset = checked_align_up(cursor, desc.align())?;
        cursor = offset.checked_add(desc.checked_size()?)?;
        offsets.push(offset);
    }
    let end = checked_align_up(cursor, WORD_SIZE)?;
    (end <= MAX_TYPE_SIZE).then_some((offsets, end))
}

/// Global counter for generating unique instance IDs
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Which method table a method lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Methods answered by instances
    Instance,
    /// Methods answered by the type object itself
    Class,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Instance => write!(f, "instance"),
            Scope::Class => write!(f, "class"),
        }
    }
}

/// Layout of one field of a sealed type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    name: String,
    encoding: String,
    desc: TypeDesc,
    index: usize,
    offset: usize,
    declared_in: String,
}

impl FieldInfo {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded field type
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Parsed field type
    pub fn type_desc(&self) -> &TypeDesc {
        &self.desc
    }

    /// Slot index in instance storage
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte offset in the instance layout
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Name of the type that declared the field
    pub fn declared_in(&self) -> &str {
        &self.declared_in
    }
}

/// Patchable message id to entry point table
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: RwLock<FxHashMap<MessageId, EntryPoint>>,
}

impl MethodTable {
    fn from_map(methods: FxHashMap<MessageId, EntryPoint>) -> Self {
        Self {
            methods: RwLock::new(methods),
        }
    }

    /// Clone the entry point for a message out of the table
    pub fn get(&self, message: &MessageId) -> Option<EntryPoint> {
        self.methods.read().get(message).cloned()
    }

    /// Check if the table has an entry for a message
    pub fn contains(&self, message: &MessageId) -> bool {
        self.methods.read().contains_key(message)
    }

    /// Install an entry point; returns false if the policy kept an existing one
    pub(crate) fn insert(&self, message: MessageId, entry: EntryPoint, policy: PatchPolicy) -> bool {
        let mut methods = self.methods.write();
        if policy == PatchPolicy::KeepExisting && methods.contains_key(&message) {
            return false;
        }
        methods.insert(message, entry);
        true
    }

    /// Number of methods
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    /// Message ids in the table, sorted by name
    pub fn messages(&self) -> Vec<MessageId> {
        let mut messages: Vec<_> = self.methods.read().keys().cloned().collect();
        messages.sort();
        messages
    }
}

/// A sealed, instantiable type
///
/// The field layout is fixed at seal time. Method tables stay patchable and
/// are consulted from the most derived type up through the base chain.
#[derive(Debug)]
pub struct Type {
    id: usize,
    name: String,
    base: Option<Arc<Type>>,
    fields: Vec<FieldInfo>,
    field_index: FxHashMap<String, usize>,
    instance_size: usize,
    instance_methods: MethodTable,
    class_methods: MethodTable,
}

impl Type {
    /// Lay out a draft: inherited fields keep their slots, own fields follow,
    /// each aligned to its natural alignment.
    pub(crate) fn from_draft(id: usize, draft: TypeDraft) -> Self {
        let TypeDraft {
            name,
            base,
            fields: own_fields,
            instance_methods,
            class_methods,
        } = draft;

        let (mut fields, start) = match &base {
            Some(base) => (base.fields.clone(), base.instance_size),
            None => (Vec::new(), FIRST_FIELD_OFFSET),
        };
        // `TypeBuilder::add_field` refuses any field that would break this
        let (offsets, instance_size) = layout_fields(start, own_fields.iter().map(|def| &def.desc))
            .unwrap_or_else(|| panic!("instance layout of '{}' exceeds {} bytes", name, MAX_TYPE_SIZE));
        for (def, offset) in own_fields.into_iter().zip(offsets) {
            fields.push(FieldInfo {
                index: fields.len(),
                name: def.name,
                encoding: def.encoding,
                desc: def.desc,
                offset,
                declared_in: name.clone(),
            });
        }
        let field_index = fields
            .iter()
            .map(|f| (f.name.clone(), f.index))
            .collect();

        Self {
            id,
            name,
            base,
            fields,
            field_index,
            instance_size,
            instance_methods: MethodTable::from_map(instance_methods),
            class_methods: MethodTable::from_map(class_methods),
        }
    }

    /// Registry id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base type, `None` for the root type
    pub fn base(&self) -> Option<&Arc<Type>> {
        self.base.as_ref()
    }

    /// All fields, inherited first
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Number of fields, inherited included
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Look up a field by name
    pub fn field_named(&self, name: &str) -> Option<&FieldInfo> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    /// Instance size in bytes, including the hidden type pointer
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// This type's own method table for a scope
    pub fn method_table(&self, scope: Scope) -> &MethodTable {
        match scope {
            Scope::Instance => &self.instance_methods,
            Scope::Class => &self.class_methods,
        }
    }

    /// Check if this type itself (not a base) defines a method
    pub fn has_own_method(&self, message: &MessageId, scope: Scope) -> bool {
        self.method_table(scope).contains(message)
    }

    /// Find the entry point for a message, walking up the base chain
    pub fn lookup(&self, message: &MessageId, scope: Scope) -> Option<EntryPoint> {
        let mut current = Some(self);
        while let Some(ty) = current {
            if let Some(entry) = ty.method_table(scope).get(message) {
                return Some(entry);
            }
            current = ty.base.as_deref();
        }
        None
    }

    /// Check if instances (or the type object, for class scope) answer a message
    pub fn responds_to(&self, message: &MessageId, scope: Scope) -> bool {
        self.lookup(message, scope).is_some()
    }

    /// Check if this type is `other` or derives from it
    pub fn is_subtype_of(&self, other: &Type) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if std::ptr::eq(ty, other) {
                return true;
            }
            current = ty.base.as_deref();
        }
        false
    }

    /// Check if every required method of a protocol resolves on this type
    pub fn conforms_to(&self, protocol: &Protocol) -> bool {
        protocol
            .required_methods()
            .all(|(scope, message)| self.responds_to(message, scope))
    }

    /// Create a new instance with every field zeroed
    pub fn instantiate(self: &Arc<Self>) -> Arc<Instance> {
        let fields = self
            .fields
            .iter()
            .map(|f| Value::zero_for(&f.desc))
            .collect();
        let instance = Instance {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            ty: Arc::clone(self),
            fields: RwLock::new(fields),
            teardown: Mutex::new(Vec::new()),
        };
        log::trace!("instantiated {} #{}", self.name, instance.id);
        Arc::new(instance)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Callback run when an instance is destroyed
pub type TeardownHook = Box<dyn FnOnce(&Instance) + Send>;

/// An instance of a sealed type
///
/// Field storage is a plain record indexed by field slot; the instance
/// reaches its methods through the shared type.
pub struct Instance {
    id: u64,
    ty: Arc<Type>,
    fields: RwLock<Vec<Value>>,
    teardown: Mutex<Vec<(String, TeardownHook)>>,
}

impl Instance {
    /// Unique instance id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The instance's type
    pub fn type_of(&self) -> &Arc<Type> {
        &self.ty
    }

    fn field_info(&self, name: &str) -> Result<&FieldInfo, FieldError> {
        self.ty
            .field_named(name)
            .ok_or_else(|| FieldError::Unknown(name.to_string()))
    }

    /// Read a field by name
    pub fn get_field(&self, name: &str) -> Result<Value, FieldError> {
        let info = self.field_info(name)?;
        Ok(self.fields.read()[info.index].clone())
    }

    /// Write a field by name, checking the value against the field type
    pub fn set_field(&self, name: &str, value: Value) -> Result<(), FieldError> {
        let info = self.field_info(name)?;
        if !marshal::conforms(&value, &info.desc) {
            return Err(FieldError::TypeMismatch {
                field: name.to_string(),
                expected: info.encoding.clone(),
                got: value.type_name().to_string(),
            });
        }
        self.fields.write()[info.index] = value;
        Ok(())
    }

    /// Read a field by slot index
    pub fn field_at(&self, index: usize) -> Option<Value> {
        self.fields.read().get(index).cloned()
    }

    /// Register a hook to run when this instance is destroyed
    ///
    /// Re-adding a key replaces the earlier hook in place.
    pub fn add_teardown<F>(&self, key: &str, hook: F)
    where
        F: FnOnce(&Instance) + Send + 'static,
    {
        let mut hooks = self.teardown.lock();
        match hooks.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = Box::new(hook),
            None => hooks.push((key.to_string(), Box::new(hook))),
        }
    }

    /// Remove a teardown hook; returns false if none was registered
    pub fn remove_teardown(&self, key: &str) -> bool {
        let mut hooks = self.teardown.lock();
        let before = hooks.len();
        hooks.retain(|(k, _)| k != key);
        hooks.len() != before
    }

    /// Number of registered teardown hooks
    pub fn teardown_count(&self) -> usize {
        self.teardown.lock().len()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let hooks = std::mem::take(self.teardown.get_mut());
        if !hooks.is_empty() {
            log::trace!("running {} teardown hooks for {} #{}", hooks.len(), self.ty.name, self.id);
        }
        for (_, hook) in hooks {
            hook(self);
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("type", &self.ty.name)
            .field("fields", &*self.fields.read())
            .finish()
    }
}

/// Handle to a message receiver
///
/// Equality is identity: two handles are equal when they point at the same
/// object.
#[derive(Clone)]
pub enum ObjectRef {
    /// An instance of a sealed type
    Instance(Arc<Instance>),
    /// A type object, receiving class-scope messages
    Type(Arc<Type>),
    /// An interception proxy
    Proxy(Arc<InterceptionProxy>),
}

impl ObjectRef {
    /// Borrow the instance
    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            ObjectRef::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Borrow the type object
    pub fn as_type(&self) -> Option<&Arc<Type>> {
        match self {
            ObjectRef::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Borrow the proxy
    pub fn as_proxy(&self) -> Option<&Arc<InterceptionProxy>> {
        match self {
            ObjectRef::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ObjectRef::Instance(a), ObjectRef::Instance(b)) => Arc::ptr_eq(a, b),
            (ObjectRef::Type(a), ObjectRef::Type(b)) => Arc::ptr_eq(a, b),
            (ObjectRef::Proxy(a), ObjectRef::Proxy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Instance(instance) => write!(f, "<{} #{}>", instance.ty.name, instance.id),
            ObjectRef::Type(ty) => write!(f, "<type {}>", ty.name),
            ObjectRef::Proxy(proxy) => write!(f, "<proxy for {}>", proxy.interception_target()),
        }
    }
}

impl From<Arc<Instance>> for ObjectRef {
    fn from(instance: Arc<Instance>) -> Self {
        ObjectRef::Instance(instance)
    }
}

impl From<Arc<Type>> for ObjectRef {
    fn from(ty: Arc<Type>) -> Self {
        ObjectRef::Type(ty)
    }
}

impl From<Arc<InterceptionProxy>> for ObjectRef {
    fn from(proxy: Arc<InterceptionProxy>) -> Self {
        ObjectRef::Proxy(proxy)
    }
}
