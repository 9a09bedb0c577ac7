//! Dynamic value representation
//!
//! Values flow through argument slots, return slots and instance fields.
//! Numeric values are widened to 64 bits; the declared width lives in the
//! signature or field descriptor and is enforced by [`crate::marshal`].

use std::fmt;

use crate::encoding::TypeDesc;
use crate::message::MessageId;
use crate::object::ObjectRef;

/// A dynamically typed value
#[derive(Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value, void result, or a null object reference
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer of any declared width
    Int(i64),
    /// Unsigned integer of any declared width
    UInt(u64),
    /// Floating-point number of any declared width
    Float(f64),
    /// Raw address for pointer-typed slots
    Pointer(usize),
    /// Message id
    Message(MessageId),
    /// Object reference (instance, type or proxy)
    Object(ObjectRef),
    /// Aggregate or array elements in declaration order
    Aggregate(Vec<Value>),
}

impl Value {
    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value::Null
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    /// Create a signed integer value from an i32
    #[inline]
    pub const fn i32(i: i32) -> Self {
        Value::Int(i as i64)
    }

    /// Create a signed integer value
    #[inline]
    pub const fn i64(i: i64) -> Self {
        Value::Int(i)
    }

    /// Create an unsigned integer value
    #[inline]
    pub const fn u64(u: u64) -> Self {
        Value::UInt(u)
    }

    /// Create a floating-point value
    #[inline]
    pub const fn f64(f: f64) -> Self {
        Value::Float(f)
    }

    /// Create a message id value
    pub fn message(id: impl Into<MessageId>) -> Self {
        Value::Message(id.into())
    }

    /// Check if this value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract boolean value
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an integer that fits in an i32
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|i| i32::try_from(i).ok())
    }

    /// Extract an integer as i64 (unsigned values must fit)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Extract a non-negative integer as u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Extract a float
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow the object reference
    pub const fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Borrow the message id
    pub const fn as_message(&self) -> Option<&MessageId> {
        match self {
            Value::Message(id) => Some(id),
            _ => None,
        }
    }

    /// Borrow aggregate elements
    pub fn as_aggregate(&self) -> Option<&[Value]> {
        match self {
            Value::Aggregate(elements) => Some(elements),
            _ => None,
        }
    }

    /// The zero value stored in a fresh slot of the given type
    pub fn zero_for(desc: &TypeDesc) -> Value {
        match desc {
            TypeDesc::Void | TypeDesc::Object | TypeDesc::Message | TypeDesc::AggregateRef(_) => {
                Value::Null
            }
            TypeDesc::Bool => Value::Bool(false),
            TypeDesc::Scalar(s) if s.is_float() => Value::Float(0.0),
            TypeDesc::Scalar(s) if s.is_signed() => Value::Int(0),
            TypeDesc::Scalar(_) | TypeDesc::Bitfield(_) => Value::UInt(0),
            TypeDesc::Pointer(_) => Value::Pointer(0),
            TypeDesc::Aggregate { fields, .. } => {
                Value::Aggregate(fields.iter().map(Value::zero_for).collect())
            }
            TypeDesc::Array { len, element } => {
                Value::Aggregate((0..*len).map(|_| Value::zero_for(element)).collect())
            }
        }
    }

    /// Check if value is truthy (for handler decisions and tests)
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(u) => *u != 0,
            Value::Float(f) => *f != 0.0,
            Value::Pointer(p) => *p != 0,
            _ => true,
        }
    }

    /// Get type name for diagnostics
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Pointer(_) => "pointer",
            Value::Message(_) => "message",
            Value::Object(_) => "object",
            Value::Aggregate(_) => "aggregate",
        }
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::i32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "bool({})", b),
            Value::Int(i) => write!(f, "int({})", i),
            Value::UInt(u) => write!(f, "uint({})", u),
            Value::Float(x) => write!(f, "float({})", x),
            Value::Pointer(p) => write!(f, "ptr({:#x})", p),
            Value::Message(id) => write!(f, "{:?}", id),
            Value::Object(obj) => write!(f, "{:?}", obj),
            Value::Aggregate(elements) => f.debug_list().entries(elements).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::Pointer(p) => write!(f, "{:#x}", p),
            Value::Message(id) => write!(f, "@selector({})", id),
            Value::Object(obj) => write!(f, "{}", obj),
            Value::Aggregate(elements) => {
                write!(f, "{{")?;
                for (i, v) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}
