//! objrt Core Runtime
//!
//! This crate provides in-process construction of callable types and
//! interception of message dispatch:
//! - Method signatures built piece by piece, with qualifier flags and
//!   explicit frame sizes
//! - Types assembled at runtime from fields and methods, then sealed
//! - Methods backed by native functions or closures
//! - Proxies that divert selected messages to handler logic
//! - Protocol signature tables and instance teardown hooks

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod encoding;
pub mod error;
pub mod marshal;
pub mod message;
pub mod object;
pub mod reflect;
pub mod runtime;
pub mod value;

pub use encoding::{ParameterFlags, TypeDesc};
pub use error::{DispatchError, DispatchResult, EncodingError, FieldError, RegistryError};
pub use message::MessageId;
pub use object::{FieldInfo, Instance, MethodTable, ObjectRef, Scope, TeardownHook, Type};
pub use reflect::{
    CallChecks, EntryPoint, FieldHandle, Implementation, InterceptionProxy, Invocation, MethodBuilder,
    MethodHandle, NativeFn, ParameterDescriptor, Protocol, Signature, SignatureBuilder, TypeBuilder,
    TypeDraft,
};
pub use runtime::{invoke, resolve_signature, FieldRedefinition, PatchPolicy, Runtime, RuntimeOptions};
pub use value::Value;
