//! Argument and return value conformance
//!
//! An entry point checks every call against its signature before the
//! implementation runs, so implementations can rely on argument shapes.

use crate::encoding::{Scalar, TypeDesc};
use crate::error::{DispatchError, DispatchResult};
use crate::message::MessageId;
use crate::reflect::Signature;
use crate::value::Value;

/// Check whether `value` can occupy a slot of type `desc`
pub fn conforms(value: &Value, desc: &TypeDesc) -> bool {
    match (desc, value) {
        (TypeDesc::Void, Value::Null) => true,
        (TypeDesc::Bool, Value::Bool(_)) => true,
        (TypeDesc::Scalar(s), v) => scalar_conforms(*s, v),
        (TypeDesc::Object, Value::Null | Value::Object(_)) => true,
        (TypeDesc::Message, Value::Null | Value::Message(_)) => true,
        (TypeDesc::Pointer(_), Value::Null | Value::Pointer(_)) => true,
        (TypeDesc::Aggregate { fields, .. }, Value::Aggregate(elements)) => {
            fields.len() == elements.len()
                && fields.iter().zip(elements).all(|(f, e)| conforms(e, f))
        }
        (TypeDesc::Array { len, element }, Value::Aggregate(elements)) => {
            *len == elements.len() && elements.iter().all(|e| conforms(e, element))
        }
        (TypeDesc::Bitfield(bits), v) => v
            .as_u64()
            .is_some_and(|u| *bits >= 64 || u < (1u64 << bits)),
        _ => false,
    }
}

fn scalar_conforms(scalar: Scalar, value: &Value) -> bool {
    if scalar.is_float() {
        return matches!(value, Value::Float(_));
    }
    let bits = scalar.size() as u32 * 8;
    if scalar.is_signed() {
        let Some(i) = value.as_i64() else {
            return false;
        };
        let min = i64::MIN >> (64 - bits);
        let max = i64::MAX >> (64 - bits);
        (min..=max).contains(&i)
    } else {
        let Some(u) = value.as_u64() else {
            return false;
        };
        bits == 64 || u < (1u64 << bits)
    }
}

/// Check arity and argument types of a call
pub fn check_arguments(
    message: &MessageId,
    signature: &Signature,
    args: &[Value],
) -> DispatchResult<()> {
    check_argument_count(message, signature, args)?;
    for (index, (param, arg)) in signature.parameters().iter().zip(args).enumerate() {
        if !conforms(arg, param.type_desc()) {
            return Err(DispatchError::TypeMismatch {
                message: message.to_string(),
                position: format!("argument {}", index),
                expected: param.encoding().to_string(),
                got: arg.type_name().to_string(),
            });
        }
    }
    Ok(())
}

/// Check only the number of arguments of a call
pub fn check_argument_count(
    message: &MessageId,
    signature: &Signature,
    args: &[Value],
) -> DispatchResult<()> {
    let expected = signature.number_of_arguments();
    if args.len() != expected {
        return Err(DispatchError::ArgumentCount {
            message: message.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// Check a value returned by an implementation
pub fn check_return(message: &MessageId, signature: &Signature, value: &Value) -> DispatchResult<()> {
    let ret = signature.return_type();
    if conforms(value, ret.type_desc()) {
        Ok(())
    } else {
        Err(DispatchError::TypeMismatch {
            message: message.to_string(),
            position: "return value".to_string(),
            expected: ret.encoding().to_string(),
            got: value.type_name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(s: &str) -> TypeDesc {
        TypeDesc::parse(s).unwrap()
    }

    #[test]
    fn test_integer_ranges() {
        assert!(conforms(&Value::i32(127), &desc("c")));
        assert!(!conforms(&Value::i32(128), &desc("c")));
        assert!(conforms(&Value::i32(-128), &desc("c")));
        assert!(conforms(&Value::i32(255), &desc("C")));
        assert!(!conforms(&Value::i32(256), &desc("C")));
        assert!(!conforms(&Value::i32(-1), &desc("I")));
        assert!(conforms(&Value::u64(u64::MAX), &desc("Q")));
        assert!(conforms(&Value::i64(i64::MIN), &desc("q")));
        assert!(!conforms(&Value::f64(1.0), &desc("i")));
    }

    #[test]
    fn test_references() {
        assert!(conforms(&Value::Null, &desc("@")));
        assert!(conforms(&Value::Null, &desc("^v")));
        assert!(conforms(&Value::Pointer(0x1000), &desc("^{Node}")));
        assert!(conforms(&Value::message("run"), &desc(":")));
        assert!(!conforms(&Value::i32(0), &desc("@")));
    }

    #[test]
    fn test_aggregates() {
        let point = desc("{Point=dd}");
        assert!(conforms(&Value::Aggregate(vec![Value::f64(1.0), Value::f64(2.0)]), &point));
        assert!(!conforms(&Value::Aggregate(vec![Value::f64(1.0)]), &point));
        assert!(!conforms(&Value::Aggregate(vec![Value::f64(1.0), Value::i32(2)]), &point));
        assert!(conforms(&Value::Aggregate(vec![Value::i32(1), Value::i32(2)]), &desc("[2i]")));
    }

    #[test]
    fn test_bitfields_and_void() {
        assert!(conforms(&Value::u64(7), &desc("b3")));
        assert!(!conforms(&Value::u64(8), &desc("b3")));
        assert!(conforms(&Value::Null, &desc("v")));
        assert!(!conforms(&Value::i32(1), &desc("v")));
    }
}
