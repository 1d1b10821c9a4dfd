use std::fmt;

/// Version of the tagged value layout. Code that bakes the layout into
/// generated instructions asserts on this at compile time.
pub const VALUE_FORMAT_VERSION: u32 = 1;

/// Number of payload bits below the tag.
pub const NUM_DATA_BITS: u32 = 48;

/// Mask selecting the payload (pointer) bits of a tagged value.
pub const DATA_MASK: u64 = (1u64 << NUM_DATA_BITS) - 1;

/// Bit pattern of the canonical quiet NaN. Every NaN is boxed as this value.
pub const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// Value tags, stored in the top 16 bits.
///
/// Tags start at the double limit: any raw value below
/// `Tag::FIRST << NUM_DATA_BITS` is a double.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Tag {
    Empty = 0xFFF9,
    Undefined = 0xFFFA,
    Null = 0xFFFB,
    Bool = 0xFFFC,
    Symbol = 0xFFFD,
    Str = 0xFFFE,
    Object = 0xFFFF,
}

impl Tag {
    pub const FIRST: u16 = Tag::Empty as u16;

    pub fn from_bits(tag: u16) -> Option<Tag> {
        match tag {
            0xFFF9 => Some(Tag::Empty),
            0xFFFA => Some(Tag::Undefined),
            0xFFFB => Some(Tag::Null),
            0xFFFC => Some(Tag::Bool),
            0xFFFD => Some(Tag::Symbol),
            0xFFFE => Some(Tag::Str),
            0xFFFF => Some(Tag::Object),
            _ => None,
        }
    }

    /// The tag shifted into position.
    pub const fn shifted(self) -> u64 {
        (self as u64) << NUM_DATA_BITS
    }
}

/// Every raw value strictly below this constant is a double.
pub const DOUBLE_LIM: u64 = (Tag::FIRST as u64) << NUM_DATA_BITS;

/// A 64-bit tagged value, as stored in frame registers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const UNDEFINED: Value = Value(Tag::Undefined.shifted());
    pub const NULL: Value = Value(Tag::Null.shifted());
    pub const EMPTY: Value = Value(Tag::Empty.shifted());
    pub const TRUE: Value = Value(Tag::Bool.shifted() | 1);
    pub const FALSE: Value = Value(Tag::Bool.shifted());

    pub const fn from_raw(raw: u64) -> Self {
        Value(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            Value(CANONICAL_NAN)
        } else {
            Value(n.to_bits())
        }
    }

    pub const fn bool(b: bool) -> Self {
        if b { Value::TRUE } else { Value::FALSE }
    }

    /// Box a pointer with the given tag. Only the low 48 bits are kept.
    pub const fn with_tag(tag: Tag, payload: u64) -> Self {
        Value(tag.shifted() | (payload & DATA_MASK))
    }

    pub const fn object(ptr: u64) -> Self {
        Value::with_tag(Tag::Object, ptr)
    }

    pub const fn string(id: u64) -> Self {
        Value::with_tag(Tag::Str, id)
    }

    pub const fn is_number(self) -> bool {
        self.0 < DOUBLE_LIM
    }

    pub fn tag(self) -> Option<Tag> {
        if self.is_number() {
            None
        } else {
            Tag::from_bits((self.0 >> NUM_DATA_BITS) as u16)
        }
    }

    pub fn is_undefined(self) -> bool {
        self == Value::UNDEFINED
    }

    pub fn is_null(self) -> bool {
        self == Value::NULL
    }

    pub fn is_bool(self) -> bool {
        self.tag() == Some(Tag::Bool)
    }

    pub fn is_object(self) -> bool {
        self.tag() == Some(Tag::Object)
    }

    pub fn is_string(self) -> bool {
        self.tag() == Some(Tag::Str)
    }

    pub fn as_number(self) -> Option<f64> {
        if self.is_number() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        if self.is_bool() {
            Some(self.0 as u32 != 0)
        } else {
            None
        }
    }

    /// The untagged payload. Meaningful for pointer-like values.
    pub const fn payload(self) -> u64 {
        self.0 & DATA_MASK
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::UNDEFINED
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            None => write!(f, "Number({})", f64::from_bits(self.0)),
            Some(Tag::Bool) => write!(f, "Bool({})", self.0 as u32 != 0),
            Some(Tag::Undefined) => write!(f, "Undefined"),
            Some(Tag::Null) => write!(f, "Null"),
            Some(Tag::Empty) => write!(f, "Empty"),
            Some(tag) => write!(f, "{:?}({:#x})", tag, self.payload()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            None => write!(f, "{}", f64::from_bits(self.0)),
            Some(Tag::Bool) => write!(f, "{}", self.0 as u32 != 0),
            Some(Tag::Undefined) => write!(f, "undefined"),
            Some(Tag::Null) => write!(f, "null"),
            Some(Tag::Empty) => write!(f, "<empty>"),
            Some(Tag::Str) => write!(f, "<string {}>", self.payload()),
            Some(Tag::Symbol) => write!(f, "<symbol {}>", self.payload()),
            Some(Tag::Object) => write!(f, "<object {:#x}>", self.payload()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_are_below_limit() {
        for n in [0.0, -0.0, 1.5, -1e300, f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(Value::number(n).is_number(), "{n} should box as a number");
        }
        // Negative quiet NaN is still a double.
        assert!(Value::from_raw(0xFFF8_0000_0000_0000).is_number());
    }

    #[test]
    fn test_tagged_values_are_not_numbers() {
        for v in [Value::UNDEFINED, Value::NULL, Value::TRUE, Value::FALSE, Value::EMPTY] {
            assert!(!v.is_number());
        }
        assert!(!Value::object(0x1234).is_number());
    }

    #[test]
    fn test_nan_is_canonical() {
        let v = Value::number(f64::from_bits(0xFFF8_0000_0000_0001));
        assert_eq!(v.raw(), CANONICAL_NAN);
    }

    #[test]
    fn test_bool_payload_in_low_word() {
        assert_eq!(Value::TRUE.raw() as u32, 1);
        assert_eq!(Value::FALSE.raw() as u32, 0);
        assert_eq!(Value::bool(true).as_bool(), Some(true));
    }

    #[test]
    fn test_object_payload() {
        let v = Value::object(0xDEAD_BEEF);
        assert!(v.is_object());
        assert_eq!(v.payload(), 0xDEAD_BEEF);
        assert_eq!(v.raw() >> NUM_DATA_BITS, 0xFFFF);
    }
}
