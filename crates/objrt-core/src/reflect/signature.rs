//! Method signatures and the incremental signature builder
//!
//! A [`Signature`] describes a callable's return type and explicit parameters
//! together with the argument frame they occupy. Its encoded form follows the
//! Objective-C method type string layout:
//!
//! ```text
//! <ret-qualifiers><ret><frame-length>@0:8<q0><T0><off0><q1><T1><off1>...
//! ```
//!
//! The receiver (`@` at offset 0) and the message id (`:` at offset 8) are
//! implicit slots; parameter indexes never count them.

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;

use crate::encoding::{self, ParameterFlags, TypeDesc, MAX_TYPE_SIZE, WORD_SIZE};
use crate::error::EncodingError;

/// Offset of the first explicit parameter (after receiver and message id)
const FIRST_ARGUMENT_OFFSET: usize = 2 * WORD_SIZE;

/// Type, qualifiers and optional explicit frame size of one parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    encoding: String,
    desc: TypeDesc,
    flags: ParameterFlags,
    explicit_size: Option<usize>,
}

impl ParameterDescriptor {
    /// Describe a parameter
    ///
    /// # Panics
    ///
    /// Panics on a malformed descriptor, a `v` parameter, a `ONEWAY` flag,
    /// or an explicit size the type does not accept.
    pub fn parameter(encoding: &str, explicit_size: Option<usize>, flags: ParameterFlags) -> Self {
        let desc = parse_or_panic(encoding);
        if let Err(reason) = validate_parameter(&desc, flags, explicit_size) {
            panic!("invalid parameter type '{}': {}", encoding, reason);
        }
        Self {
            encoding: encoding.to_string(),
            desc,
            flags,
            explicit_size,
        }
    }

    /// Describe a return type
    ///
    /// # Panics
    ///
    /// Panics on a malformed descriptor or a `ONEWAY` flag on a non-void type.
    pub fn return_type(encoding: &str, flags: ParameterFlags) -> Self {
        let desc = parse_or_panic(encoding);
        if let Err(reason) = validate_return(&desc, flags) {
            panic!("invalid return type '{}': {}", encoding, reason);
        }
        Self {
            encoding: encoding.to_string(),
            desc,
            flags,
            explicit_size: None,
        }
    }

    fn void() -> Self {
        Self {
            encoding: "v".to_string(),
            desc: TypeDesc::Void,
            flags: ParameterFlags::empty(),
            explicit_size: None,
        }
    }

    /// The descriptor string
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// The parsed descriptor
    pub fn type_desc(&self) -> &TypeDesc {
        &self.desc
    }

    /// Qualifier flags
    pub fn flags(&self) -> ParameterFlags {
        self.flags
    }

    /// Explicit frame size, if one was given
    pub fn explicit_size(&self) -> Option<usize> {
        self.explicit_size
    }

    /// Bytes this parameter occupies in the argument frame
    pub fn frame_size(&self) -> usize {
        self.desc.frame_size(self.explicit_size)
    }
}

fn parse_or_panic(encoding: &str) -> TypeDesc {
    TypeDesc::parse(encoding)
        .unwrap_or_else(|e| panic!("malformed type descriptor '{}': {}", encoding, e))
}

fn validate_parameter(
    desc: &TypeDesc,
    flags: ParameterFlags,
    explicit_size: Option<usize>,
) -> Result<(), &'static str> {
    if desc.is_void() {
        return Err("void is only valid as a return type");
    }
    if flags.contains(ParameterFlags::ONEWAY) {
        return Err("oneway is only valid on a void return type");
    }
    match explicit_size {
        Some(0) => Err("explicit size must be positive"),
        Some(size) if size > MAX_TYPE_SIZE => Err("explicit size is too large"),
        Some(_) if !desc.accepts_explicit_size() => {
            Err("explicit sizes are only valid for aggregates and bitfields")
        }
        None if desc.requires_explicit_size() => Err("bitfields need an explicit size"),
        _ => Ok(()),
    }
}

fn validate_return(desc: &TypeDesc, flags: ParameterFlags) -> Result<(), &'static str> {
    if flags.contains(ParameterFlags::ONEWAY) && !desc.is_void() {
        return Err("oneway is only valid on a void return type");
    }
    if desc.requires_explicit_size() {
        return Err("bitfields cannot be returned");
    }
    Ok(())
}

/// An immutable, complete method signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    return_type: ParameterDescriptor,
    parameters: Vec<ParameterDescriptor>,
    offsets: Vec<usize>,
    frame_length: usize,
    encoded: String,
}

impl Signature {
    fn from_parts(return_type: ParameterDescriptor, parameters: Vec<ParameterDescriptor>) -> Self {
        let mut offsets = Vec::with_capacity(parameters.len());
        let mut offset = FIRST_ARGUMENT_OFFSET;
        for param in &parameters {
            offsets.push(offset);
            offset += param.frame_size();
        }
        let frame_length = offset;

        let mut encoded = format!(
            "{}{}{}@0:{}",
            return_type.flags.encode(),
            return_type.encoding,
            frame_length,
            WORD_SIZE
        );
        for (param, offset) in parameters.iter().zip(&offsets) {
            encoded.push_str(&param.flags.encode());
            encoded.push_str(&param.encoding);
            encoded.push_str(&offset.to_string());
        }

        Self {
            return_type,
            parameters,
            offsets,
            frame_length,
            encoded,
        }
    }

    /// Build a signature from a return type and parameter types
    ///
    /// # Panics
    ///
    /// Panics if any descriptor is malformed or invalid in its position.
    pub fn new(return_type: &str, parameters: &[&str]) -> Self {
        Self::from_parts(
            ParameterDescriptor::return_type(return_type, ParameterFlags::empty()),
            parameters
                .iter()
                .map(|p| ParameterDescriptor::parameter(p, None, ParameterFlags::empty()))
                .collect(),
        )
    }

    /// Decode an encoded method type string
    ///
    /// Explicit frame sizes are recovered from the gaps between offsets.
    /// Bitfield parameters cannot be decoded: their width runs straight into
    /// the following offset digits.
    pub fn from_encoded(input: &str) -> Result<Self, EncodingError> {
        let malformed = || EncodingError::MalformedSignature(input.to_string());
        let mut rest = input;

        let (ret_flags, ret_desc, ret_encoding) = read_slot(&mut rest)?;
        validate_return(&ret_desc, ret_flags).map_err(|_| malformed())?;
        let (frame_length, len) = encoding::parse_number_prefix(rest).ok_or_else(malformed)?;
        rest = &rest[len..];

        // implicit receiver and message id slots
        let implicit = format!("@0:{}", WORD_SIZE);
        rest = rest.strip_prefix(implicit.as_str()).ok_or_else(malformed)?;

        let mut raw = Vec::new();
        while !rest.is_empty() {
            let (flags, desc, text) = read_slot(&mut rest)?;
            let (offset, len) = encoding::parse_number_prefix(rest).ok_or_else(malformed)?;
            rest = &rest[len..];
            raw.push((flags, desc, text, offset));
        }

        let mut parameters = Vec::with_capacity(raw.len());
        for (i, (flags, desc, text, offset)) in raw.iter().enumerate() {
            let end = raw.get(i + 1).map_or(frame_length, |next| next.3);
            let slot = end.checked_sub(*offset).ok_or_else(malformed)?;
            let explicit_size =
                (desc.accepts_explicit_size() && slot != desc.frame_size(None)).then_some(slot);
            validate_parameter(desc, *flags, explicit_size).map_err(|_| malformed())?;
            parameters.push(ParameterDescriptor {
                encoding: text.clone(),
                desc: desc.clone(),
                flags: *flags,
                explicit_size,
            });
        }

        let return_type = ParameterDescriptor {
            encoding: ret_encoding,
            desc: ret_desc,
            flags: ret_flags,
            explicit_size: None,
        };
        let signature = Self::from_parts(return_type, parameters);
        let offsets_match = signature
            .offsets
            .iter()
            .zip(&raw)
            .all(|(computed, parsed)| *computed == parsed.3);
        if !offsets_match || signature.frame_length != frame_length {
            return Err(malformed());
        }
        Ok(signature)
    }

    /// The encoded method type string
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// The return type
    pub fn return_type(&self) -> &ParameterDescriptor {
        &self.return_type
    }

    /// Explicit parameters in order
    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    /// Number of explicit parameters
    pub fn number_of_arguments(&self) -> usize {
        self.parameters.len()
    }

    /// Descriptor of the parameter at `index`
    pub fn argument_type(&self, index: usize) -> Option<&ParameterDescriptor> {
        self.parameters.get(index)
    }

    /// Frame offset of the parameter at `index`
    pub fn argument_offset(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied()
    }

    /// Total bytes of the argument frame, implicit slots included
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Whether callers may proceed without waiting for the result
    pub fn is_oneway(&self) -> bool {
        self.return_type.flags.contains(ParameterFlags::ONEWAY)
    }
}

/// Read qualifiers and one type from the front of `rest`
fn read_slot(rest: &mut &str) -> Result<(ParameterFlags, TypeDesc, String), EncodingError> {
    let mut flags = ParameterFlags::empty();
    let mut chars = rest.char_indices();
    let mut start = rest.len();
    for (i, ch) in &mut chars {
        match ParameterFlags::from_qualifier(ch) {
            Some(flag) => flags |= flag,
            None => {
                start = i;
                break;
            }
        }
    }
    let after_qualifiers = &rest[start..];
    let (desc, consumed) = encoding::parse_prefix(after_qualifiers)?;
    let text = after_qualifiers[..consumed].to_string();
    *rest = &after_qualifiers[consumed..];
    Ok((flags, desc, text))
}

/// Incremental builder for a [`Signature`]
///
/// Parameters are kept in a sparse index map while the signature is being
/// described; the encoded form exists only once every index from zero to the
/// highest set index has a type.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    return_type: ParameterDescriptor,
    parameters: BTreeMap<usize, ParameterDescriptor>,
    cache: OnceCell<Option<Signature>>,
}

impl SignatureBuilder {
    /// Create a builder with a void return type and no parameters
    pub fn new() -> Self {
        Self {
            return_type: ParameterDescriptor::void(),
            parameters: BTreeMap::new(),
            cache: OnceCell::new(),
        }
    }

    fn invalidate(&mut self) {
        self.cache = OnceCell::new();
    }

    /// Set the return type and its qualifiers
    ///
    /// # Panics
    ///
    /// Panics on a malformed descriptor, or if `flags` contains `ONEWAY` and
    /// the type is not `v`.
    pub fn set_return_type(&mut self, encoding: &str, flags: ParameterFlags) {
        self.return_type = ParameterDescriptor::return_type(encoding, flags);
        self.invalidate();
    }

    /// The return type descriptor string
    pub fn return_type(&self) -> &str {
        &self.return_type.encoding
    }

    /// The return type qualifiers
    pub fn return_flags(&self) -> ParameterFlags {
        self.return_type.flags
    }

    /// Number of parameters that have a type
    pub fn number_of_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// The descriptor string of the parameter at `index`, if set
    pub fn type_of_parameter_at_index(&self, index: usize) -> Option<&str> {
        self.parameters.get(&index).map(|p| p.encoding.as_str())
    }

    /// The full descriptor of the parameter at `index`, if set
    pub fn parameter_at_index(&self, index: usize) -> Option<&ParameterDescriptor> {
        self.parameters.get(&index)
    }

    /// Set or remove the type of the parameter at `index`
    ///
    /// A `None` encoding removes the parameter if present. Explicit sizes are
    /// only valid for aggregates and bitfields, and bitfields require one.
    ///
    /// # Panics
    ///
    /// Panics on a malformed descriptor, `v`, `ONEWAY`, or a misplaced
    /// explicit size.
    pub fn set_type(
        &mut self,
        encoding: Option<&str>,
        explicit_size: Option<usize>,
        flags: ParameterFlags,
        index: usize,
    ) {
        match encoding {
            Some(encoding) => {
                let param = ParameterDescriptor::parameter(encoding, explicit_size, flags);
                self.parameters.insert(index, param);
            }
            None => {
                self.parameters.remove(&index);
            }
        }
        self.invalidate();
    }

    /// Set the type of the parameter at `index` with no qualifiers
    pub fn set_parameter_type(&mut self, index: usize, encoding: &str) {
        self.set_type(Some(encoding), None, ParameterFlags::empty(), index);
    }

    /// Set the type and qualifiers of the parameter at `index`
    pub fn set_parameter_type_with_flags(&mut self, index: usize, encoding: &str, flags: ParameterFlags) {
        self.set_type(Some(encoding), None, flags, index);
    }

    /// Set the type, explicit frame size and qualifiers of the parameter at `index`
    pub fn set_parameter_type_with_size(
        &mut self,
        index: usize,
        encoding: &str,
        size: usize,
        flags: ParameterFlags,
    ) {
        self.set_type(Some(encoding), Some(size), flags, index);
    }

    /// Remove the parameter at `index`
    pub fn remove_parameter_at_index(&mut self, index: usize) {
        if self.parameters.remove(&index).is_some() {
            self.invalidate();
        }
    }

    /// Remove every parameter
    pub fn remove_all_parameters(&mut self) {
        self.parameters.clear();
        self.invalidate();
    }

    /// Whether parameters are set for every index up to the highest one
    pub fn is_complete(&self) -> bool {
        self.parameters.keys().enumerate().all(|(i, &index)| i == index)
    }

    fn cached(&self) -> Option<&Signature> {
        self.cache
            .get_or_init(|| {
                self.is_complete().then(|| {
                    Signature::from_parts(
                        self.return_type.clone(),
                        self.parameters.values().cloned().collect(),
                    )
                })
            })
            .as_ref()
    }

    /// The encoded signature, or `None` while parameters have gaps
    pub fn encoded_signature(&self) -> Option<&str> {
        self.cached().map(Signature::encoded)
    }

    /// An immutable copy of the current signature, or `None` while incomplete
    pub fn snapshot(&self) -> Option<Signature> {
        self.cached().cloned()
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}
