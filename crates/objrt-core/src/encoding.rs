//! Type descriptor grammar
//!
//! Type descriptors are compact strings in the style of Objective-C type
//! encodings:
//!
//! ```text
//! v            void (return types only)
//! B            boolean
//! c s i q      signed 8/16/32/64-bit integers
//! C S I Q      unsigned 8/16/32/64-bit integers
//! f d          32/64-bit floats
//! @            object reference
//! :            message id
//! ^T           pointer to T (`^v` is an opaque pointer, `^{Name}` a pointer
//!              to a named aggregate)
//! {Name=T...}  named aggregate with an ordered field list
//! [NT]         array of N elements of T
//! bN           bitfield of N bits
//! ```
//!
//! The runtime stores descriptors and compares them; the only interpretation
//! it performs is size and alignment queries used for frame layout.

use std::fmt;

use bitflags::bitflags;

use crate::error::EncodingError;

/// Size of one argument frame word (and of pointers/object references)
pub const WORD_SIZE: usize = 8;

/// Largest size in bytes a descriptor, an explicit frame size or an instance
/// layout may have
pub const MAX_TYPE_SIZE: usize = u32::MAX as usize;

bitflags! {
    /// Qualifiers for a method parameter or return type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParameterFlags: u8 {
        /// The callee only reads through the parameter
        const IN = 1 << 0;
        /// The callee only writes through the parameter
        const OUT = 1 << 1;
        /// The callee reads and writes through the parameter
        const INOUT = 1 << 2;
        /// The value is passed as a copy
        const BYCOPY = 1 << 3;
        /// The value is passed by reference
        const BYREF = 1 << 4;
        /// Callers may proceed without waiting (void returns only)
        const ONEWAY = 1 << 5;
    }
}

/// Qualifier characters, in emission order
const QUALIFIERS: [(ParameterFlags, char); 6] = [
    (ParameterFlags::IN, 'n'),
    (ParameterFlags::OUT, 'o'),
    (ParameterFlags::INOUT, 'N'),
    (ParameterFlags::BYCOPY, 'O'),
    (ParameterFlags::BYREF, 'R'),
    (ParameterFlags::ONEWAY, 'V'),
];

impl ParameterFlags {
    /// Encode the flags as qualifier characters
    pub fn encode(self) -> String {
        QUALIFIERS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, ch)| *ch)
            .collect()
    }

    /// Map a qualifier character back to its flag
    pub fn from_qualifier(ch: char) -> Option<Self> {
        QUALIFIERS
            .iter()
            .find(|(_, c)| *c == ch)
            .map(|(flag, _)| *flag)
    }
}

/// Fixed-width numeric types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// `c`
    I8,
    /// `s`
    I16,
    /// `i`
    I32,
    /// `q`
    I64,
    /// `C`
    U8,
    /// `S`
    U16,
    /// `I`
    U32,
    /// `Q`
    U64,
    /// `f`
    F32,
    /// `d`
    F64,
}

impl Scalar {
    fn from_code(ch: u8) -> Option<Self> {
        Some(match ch {
            b'c' => Scalar::I8,
            b's' => Scalar::I16,
            b'i' => Scalar::I32,
            b'q' => Scalar::I64,
            b'C' => Scalar::U8,
            b'S' => Scalar::U16,
            b'I' => Scalar::U32,
            b'Q' => Scalar::U64,
            b'f' => Scalar::F32,
            b'd' => Scalar::F64,
            _ => return None,
        })
    }

    /// The descriptor character for this scalar
    pub const fn code(self) -> char {
        match self {
            Scalar::I8 => 'c',
            Scalar::I16 => 's',
            Scalar::I32 => 'i',
            Scalar::I64 => 'q',
            Scalar::U8 => 'C',
            Scalar::U16 => 'S',
            Scalar::U32 => 'I',
            Scalar::U64 => 'Q',
            Scalar::F32 => 'f',
            Scalar::F64 => 'd',
        }
    }

    /// Size in bytes
    pub const fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 => 8,
        }
    }

    /// Check if this is a signed integer type
    pub const fn is_signed(self) -> bool {
        matches!(self, Scalar::I8 | Scalar::I16 | Scalar::I32 | Scalar::I64)
    }

    /// Check if this is a floating-point type
    pub const fn is_float(self) -> bool {
        matches!(self, Scalar::F32 | Scalar::F64)
    }
}

/// A parsed type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    /// No value
    Void,
    /// Boolean
    Bool,
    /// Integer or float
    Scalar(Scalar),
    /// Object reference
    Object,
    /// Message id
    Message,
    /// Pointer to the inner type
    Pointer(Box<TypeDesc>),
    /// Named aggregate mentioned without its fields (pointee position only)
    AggregateRef(String),
    /// Named aggregate with an ordered field list
    Aggregate {
        /// Aggregate name
        name: String,
        /// Field types in declaration order
        fields: Vec<TypeDesc>,
    },
    /// Fixed-size array
    Array {
        /// Number of elements
        len: usize,
        /// Element type
        element: Box<TypeDesc>,
    },
    /// Bitfield of the given width in bits
    Bitfield(u32),
}

impl TypeDesc {
    /// Parse a complete type descriptor
    pub fn parse(input: &str) -> Result<TypeDesc, EncodingError> {
        let (desc, consumed) = parse_prefix(input)?;
        if consumed != input.len() {
            return Err(EncodingError::TrailingInput(input.to_string()));
        }
        Ok(desc)
    }

    /// Check if this is `v`
    pub fn is_void(&self) -> bool {
        matches!(self, TypeDesc::Void)
    }

    /// Natural size in bytes
    ///
    /// Parsed descriptors never exceed [`MAX_TYPE_SIZE`]; a hand-built one
    /// that would overflow reports `usize::MAX`.
    pub fn size(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }

    /// Natural size in bytes, or `None` if it does not fit in a `usize`
    pub fn checked_size(&self) -> Option<usize> {
        match self {
            TypeDesc::Void | TypeDesc::AggregateRef(_) => Some(0),
            TypeDesc::Bool => Some(1),
            TypeDesc::Scalar(s) => Some(s.size()),
            TypeDesc::Object | TypeDesc::Message | TypeDesc::Pointer(_) => Some(WORD_SIZE),
            TypeDesc::Aggregate { fields, .. } => {
                let mut offset = 0usize;
                for field in fields {
                    offset = checked_align_up(offset, field.align())?.checked_add(field.checked_size()?)?;
                }
                checked_align_up(offset, self.align())
            }
            TypeDesc::Array { len, element } => len.checked_mul(element.checked_size()?),
            TypeDesc::Bitfield(bits) => Some((*bits as usize).div_ceil(8)),
        }
    }

    /// Natural alignment in bytes
    pub fn align(&self) -> usize {
        match self {
            TypeDesc::Void | TypeDesc::AggregateRef(_) | TypeDesc::Bitfield(_) => 1,
            TypeDesc::Bool => 1,
            TypeDesc::Scalar(s) => s.size(),
            TypeDesc::Object | TypeDesc::Message | TypeDesc::Pointer(_) => WORD_SIZE,
            TypeDesc::Aggregate { fields, .. } => {
                fields.iter().map(TypeDesc::align).max().unwrap_or(1)
            }
            TypeDesc::Array { element, .. } => element.align(),
        }
    }

    /// Size this type occupies in an argument frame
    ///
    /// Slots are word aligned; `explicit` overrides the natural size.
    pub fn frame_size(&self, explicit: Option<usize>) -> usize {
        align_up(explicit.unwrap_or_else(|| self.size()), WORD_SIZE).max(WORD_SIZE)
    }

    /// Whether an explicit frame size may be given for this type
    ///
    /// Only aggregates (which may be packed) and bitfields have a frame size
    /// that can differ from what the descriptor implies.
    pub fn accepts_explicit_size(&self) -> bool {
        matches!(self, TypeDesc::Aggregate { .. } | TypeDesc::Bitfield(_))
    }

    /// Whether this type can only be laid out with an explicit size
    pub fn requires_explicit_size(&self) -> bool {
        matches!(self, TypeDesc::Bitfield(_))
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => write!(f, "v"),
            TypeDesc::Bool => write!(f, "B"),
            TypeDesc::Scalar(s) => write!(f, "{}", s.code()),
            TypeDesc::Object => write!(f, "@"),
            TypeDesc::Message => write!(f, ":"),
            TypeDesc::Pointer(inner) => write!(f, "^{}", inner),
            TypeDesc::AggregateRef(name) => write!(f, "{{{}}}", name),
            TypeDesc::Aggregate { name, fields } => {
                write!(f, "{{{}=", name)?;
                for field in fields {
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
            TypeDesc::Array { len, element } => write!(f, "[{}{}]", len, element),
            TypeDesc::Bitfield(bits) => write!(f, "b{}", bits),
        }
    }
}

/// Round `value` up to a multiple of `align`, saturating at `usize::MAX`
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    checked_align_up(value, align).unwrap_or(usize::MAX)
}

/// Round `value` up to a multiple of `align`
pub(crate) fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    value.div_ceil(align).checked_mul(align)
}

/// Parse one descriptor from the start of `input`
///
/// Returns the descriptor and the number of bytes consumed.
pub(crate) fn parse_prefix(input: &str) -> Result<(TypeDesc, usize), EncodingError> {
    let mut parser = Parser { input, pos: 0 };
    let desc = parser.parse_type(Position::Value)?;
    Ok((desc, parser.pos))
}

/// Read a decimal number from the start of `input`
pub(crate) fn parse_number_prefix(input: &str) -> Option<(usize, usize)> {
    let digits = input.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    input[..digits].parse().ok().map(|n| (n, digits))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Position {
    Value,
    Pointee,
    Member,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, EncodingError> {
        let ch = self
            .peek()
            .ok_or_else(|| EncodingError::UnexpectedEnd(self.input.to_string()))?;
        self.pos += 1;
        Ok(ch)
    }

    fn unexpected(&self, offset: usize) -> EncodingError {
        let ch = self.input[offset..].chars().next().unwrap_or('?');
        EncodingError::UnexpectedChar {
            ch,
            offset,
            input: self.input.to_string(),
        }
    }

    fn number(&mut self) -> Result<usize, EncodingError> {
        match parse_number_prefix(&self.input[self.pos..]) {
            Some((n, len)) if n > 0 => {
                self.pos += len;
                Ok(n)
            }
            _ => Err(EncodingError::InvalidLength(self.input.to_string())),
        }
    }

    fn parse_type(&mut self, position: Position) -> Result<TypeDesc, EncodingError> {
        let start = self.pos;
        let ch = self.next()?;
        if let Some(scalar) = Scalar::from_code(ch) {
            return Ok(TypeDesc::Scalar(scalar));
        }
        match ch {
            b'v' if position != Position::Member => Ok(TypeDesc::Void),
            b'B' => Ok(TypeDesc::Bool),
            b'@' => Ok(TypeDesc::Object),
            b':' => Ok(TypeDesc::Message),
            b'^' => Ok(TypeDesc::Pointer(Box::new(self.parse_type(Position::Pointee)?))),
            b'{' => self.parse_aggregate(start, position),
            b'[' => {
                let len = self.number()?;
                let element = self.parse_type(Position::Member)?;
                let close = self.pos;
                if self.next()? != b']' {
                    return Err(self.unexpected(close));
                }
                self.bounded(TypeDesc::Array {
                    len,
                    element: Box::new(element),
                })
            }
            b'b' => {
                let bits = self.number()?;
                let bits = u32::try_from(bits)
                    .map_err(|_| EncodingError::InvalidLength(self.input.to_string()))?;
                Ok(TypeDesc::Bitfield(bits))
            }
            _ => Err(self.unexpected(start)),
        }
    }

    fn parse_aggregate(&mut self, start: usize, position: Position) -> Result<TypeDesc, EncodingError> {
        let name_start = self.pos;
        loop {
            match self.peek() {
                Some(b'=') | Some(b'}') => break,
                Some(b'{') | Some(b'[') | Some(b'^') => return Err(self.unexpected(self.pos)),
                Some(_) => self.pos += 1,
                None => return Err(EncodingError::UnexpectedEnd(self.input.to_string())),
            }
        }
        let name = self.input[name_start..self.pos].to_string();
        if self.next()? == b'}' {
            // `{Name}` names an aggregate without describing it
            if position != Position::Pointee {
                return Err(self.unexpected(start));
            }
            return Ok(TypeDesc::AggregateRef(name));
        }
        let mut fields = Vec::new();
        while self.peek() != Some(b'}') {
            if self.peek().is_none() {
                return Err(EncodingError::UnexpectedEnd(self.input.to_string()));
            }
            fields.push(self.parse_type(Position::Member)?);
        }
        self.pos += 1;
        self.bounded(TypeDesc::Aggregate { name, fields })
    }

    fn bounded(&self, desc: TypeDesc) -> Result<TypeDesc, EncodingError> {
        match desc.checked_size() {
            Some(size) if size <= MAX_TYPE_SIZE => Ok(desc),
            _ => Err(EncodingError::SizeOverflow(self.input.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(TypeDesc::parse("i").unwrap(), TypeDesc::Scalar(Scalar::I32));
        assert_eq!(TypeDesc::parse("Q").unwrap(), TypeDesc::Scalar(Scalar::U64));
        assert_eq!(TypeDesc::parse("d").unwrap(), TypeDesc::Scalar(Scalar::F64));
        assert_eq!(TypeDesc::parse("B").unwrap(), TypeDesc::Bool);
        assert_eq!(TypeDesc::parse("v").unwrap(), TypeDesc::Void);
        assert_eq!(TypeDesc::parse("@").unwrap(), TypeDesc::Object);
        assert_eq!(TypeDesc::parse(":").unwrap(), TypeDesc::Message);
    }

    #[test]
    fn test_parse_pointers() {
        assert_eq!(
            TypeDesc::parse("^v").unwrap(),
            TypeDesc::Pointer(Box::new(TypeDesc::Void))
        );
        assert_eq!(
            TypeDesc::parse("^{Node}").unwrap(),
            TypeDesc::Pointer(Box::new(TypeDesc::AggregateRef("Node".to_string())))
        );
        assert_eq!(TypeDesc::parse("^{Node}").unwrap().size(), 8);
    }

    #[test]
    fn test_parse_aggregate() {
        let desc = TypeDesc::parse("{Point=dd}").unwrap();
        assert_eq!(
            desc,
            TypeDesc::Aggregate {
                name: "Point".to_string(),
                fields: vec![TypeDesc::Scalar(Scalar::F64), TypeDesc::Scalar(Scalar::F64)],
            }
        );
        assert_eq!(desc.size(), 16);
        assert_eq!(desc.align(), 8);
        assert_eq!(desc.to_string(), "{Point=dd}");
    }

    #[test]
    fn test_aggregate_padding() {
        // c (1) + pad (3) + i (4) + s (2) + pad (2)
        let desc = TypeDesc::parse("{Mixed=cis}").unwrap();
        assert_eq!(desc.size(), 12);
        assert_eq!(desc.align(), 4);
    }

    #[test]
    fn test_parse_array_and_bitfield() {
        let arr = TypeDesc::parse("[4i]").unwrap();
        assert_eq!(arr.size(), 16);
        assert_eq!(arr.to_string(), "[4i]");

        let bits = TypeDesc::parse("b12").unwrap();
        assert_eq!(bits, TypeDesc::Bitfield(12));
        assert_eq!(bits.size(), 2);
        assert!(bits.requires_explicit_size());
    }

    #[test]
    fn test_nested_aggregate() {
        let desc = TypeDesc::parse("{Rect={Point=dd}{Size=dd}}").unwrap();
        assert_eq!(desc.size(), 32);
        assert_eq!(desc.to_string(), "{Rect={Point=dd}{Size=dd}}");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(TypeDesc::parse(""), Err(EncodingError::UnexpectedEnd(_))));
        assert!(matches!(TypeDesc::parse("x"), Err(EncodingError::UnexpectedChar { ch: 'x', .. })));
        assert!(matches!(TypeDesc::parse("ii"), Err(EncodingError::TrailingInput(_))));
        assert!(matches!(TypeDesc::parse("[0i]"), Err(EncodingError::InvalidLength(_))));
        assert!(matches!(TypeDesc::parse("{Point=dd"), Err(EncodingError::UnexpectedEnd(_))));
        // a bare aggregate reference is only meaningful behind a pointer
        assert!(TypeDesc::parse("{Node}").is_err());
        // void cannot be stored
        assert!(TypeDesc::parse("{Bad=v}").is_err());
        assert!(TypeDesc::parse("[2v]").is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_types() {
        assert!(matches!(
            TypeDesc::parse("[2305843009213693952q]"),
            Err(EncodingError::SizeOverflow(_))
        ));
        assert!(matches!(
            TypeDesc::parse("{Big=[4294967296C]}"),
            Err(EncodingError::SizeOverflow(_))
        ));
        assert!(matches!(
            TypeDesc::parse("{Wide=[2147483648c][2147483648c]}"),
            Err(EncodingError::SizeOverflow(_))
        ));
        assert!(matches!(
            TypeDesc::parse("^[4294967296q]"),
            Err(EncodingError::SizeOverflow(_))
        ));
        assert_eq!(TypeDesc::parse("[4294967295C]").unwrap().size(), MAX_TYPE_SIZE);
    }

    #[test]
    fn test_hand_built_size_saturates() {
        let huge = TypeDesc::Array {
            len: usize::MAX,
            element: Box::new(TypeDesc::Scalar(Scalar::I64)),
        };
        assert_eq!(huge.checked_size(), None);
        assert_eq!(huge.size(), usize::MAX);
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(TypeDesc::parse("c").unwrap().frame_size(None), 8);
        assert_eq!(TypeDesc::parse("q").unwrap().frame_size(None), 8);
        assert_eq!(TypeDesc::parse("{Point=dd}").unwrap().frame_size(None), 16);
        assert_eq!(TypeDesc::parse("{Packed=ci}").unwrap().frame_size(Some(5)), 8);
        assert_eq!(TypeDesc::parse("{Big=[3q]}").unwrap().frame_size(Some(20)), 24);
    }

    #[test]
    fn test_flags_encoding() {
        let flags = ParameterFlags::INOUT | ParameterFlags::BYREF;
        assert_eq!(flags.encode(), "NR");
        assert_eq!(ParameterFlags::empty().encode(), "");
        assert_eq!(ParameterFlags::from_qualifier('V'), Some(ParameterFlags::ONEWAY));
        assert_eq!(ParameterFlags::from_qualifier('x'), None);
    }
}
