//! Building blocks for runtime-constructed types and interception
//!
//! - [`SignatureBuilder`] describes a call piece by piece
//! - [`MethodBuilder`] pairs a signature with a message id and implementation
//! - [`TypeBuilder`] assembles fields and methods into a sealed type
//! - [`Invocation`] reifies one pending call
//! - [`InterceptionProxy`] diverts selected messages to handlers
//! - [`Protocol`] groups method signatures under a name

mod invocation;
mod method_builder;
mod protocol;
mod proxy;
mod signature;
mod type_builder;

pub use invocation::Invocation;
pub use method_builder::{CallChecks, ClosureFn, EntryPoint, Implementation, MethodBuilder, NativeFn};
pub use protocol::Protocol;
pub use proxy::{InterceptHandler, InterceptionProxy};
pub use signature::{ParameterDescriptor, Signature, SignatureBuilder};
pub use type_builder::{FieldHandle, MethodHandle, TypeBuilder, TypeDraft};
