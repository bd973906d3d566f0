use core::fmt;
use core::num::NonZeroU32;

use crate::error::HookError;

/// A compressed (32-bit) reference to a managed object. Zero is the null reference and is
/// represented as `None` wherever a reference may be absent.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU32);

impl ObjectRef {
    #[inline]
    pub const fn from_raw(raw: u32) -> Option<ObjectRef> {
        match NonZeroU32::new(raw) {
            Some(n) => Some(ObjectRef(n)),
            None => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.0.get())
    }
}

/// Raw word of an optional reference, as stored in argument slots and array elements.
#[inline]
pub fn raw_ref(obj: Option<ObjectRef>) -> u32 {
    obj.map_or(0, ObjectRef::raw)
}

/// A compressed reference to a class object.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassRef(NonZeroU32);

impl ClassRef {
    #[inline]
    pub const fn from_raw(raw: u32) -> Option<ClassRef> {
        match NonZeroU32::new(raw) {
            Some(n) => Some(ClassRef(n)),
            None => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassRef({:#x})", self.0.get())
    }
}

/// Kind of a single parameter or return slot, one per shorty character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Reference,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl TypeTag {
    pub fn from_shorty_char(c: u8) -> Option<TypeTag> {
        Some(match c {
            b'L' | b'[' => TypeTag::Reference,
            b'Z' => TypeTag::Boolean,
            b'B' => TypeTag::Byte,
            b'C' => TypeTag::Char,
            b'S' => TypeTag::Short,
            b'I' => TypeTag::Int,
            b'J' => TypeTag::Long,
            b'F' => TypeTag::Float,
            b'D' => TypeTag::Double,
            b'V' => TypeTag::Void,
            _ => return None,
        })
    }

    pub fn shorty_char(self) -> char {
        match self {
            TypeTag::Reference => 'L',
            TypeTag::Boolean => 'Z',
            TypeTag::Byte => 'B',
            TypeTag::Char => 'C',
            TypeTag::Short => 'S',
            TypeTag::Int => 'I',
            TypeTag::Long => 'J',
            TypeTag::Float => 'F',
            TypeTag::Double => 'D',
            TypeTag::Void => 'V',
        }
    }

    /// Source-level name, used in mismatch diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Reference => "reference",
            TypeTag::Boolean => "boolean",
            TypeTag::Byte => "byte",
            TypeTag::Char => "char",
            TypeTag::Short => "short",
            TypeTag::Int => "int",
            TypeTag::Long => "long",
            TypeTag::Float => "float",
            TypeTag::Double => "double",
            TypeTag::Void => "void",
        }
    }

    #[inline]
    pub fn is_primitive(self) -> bool {
        !matches!(self, TypeTag::Reference | TypeTag::Void)
    }

    /// Long and double occupy two 32-bit units.
    #[inline]
    pub fn is_wide(self) -> bool {
        matches!(self, TypeTag::Long | TypeTag::Double)
    }

    /// Whether a value stored as `self` may be passed where `declared` is expected
    /// (identity or a widening primitive conversion).
    pub fn widens_to(self, declared: TypeTag) -> bool {
        use TypeTag::*;
        if self == declared {
            return self.is_primitive();
        }
        match self {
            Byte => matches!(declared, Short | Int | Long | Float | Double),
            Char | Short => matches!(declared, Int | Long | Float | Double),
            Int => matches!(declared, Long | Float | Double),
            Long => matches!(declared, Float | Double),
            Float => declared == Double,
            _ => false,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated shorty: return type followed by one tag per declared parameter.
///
/// Reference parameters (`L` and `[`) collapse into [`TypeTag::Reference`]; the receiver of an
/// instance method is never part of the shorty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shorty {
    return_type: TypeTag,
    params: Vec<TypeTag>,
}

impl Shorty {
    pub fn parse(shorty: &str) -> Result<Shorty, HookError> {
        let invalid = || HookError::InvalidShorty(shorty.to_string());
        let bytes = shorty.as_bytes();
        let (&ret, rest) = bytes.split_first().ok_or_else(invalid)?;
        let return_type = TypeTag::from_shorty_char(ret).ok_or_else(invalid)?;
        let params = rest
            .iter()
            .map(|&c| match TypeTag::from_shorty_char(c) {
                Some(TypeTag::Void) | None => Err(invalid()),
                Some(tag) => Ok(tag),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Shorty { return_type, params })
    }

    #[inline]
    pub fn return_type(&self) -> TypeTag {
        self.return_type
    }

    #[inline]
    pub fn params(&self) -> &[TypeTag] {
        &self.params
    }
}

impl fmt::Display for Shorty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.return_type.shorty_char())?;
        for p in &self.params {
            write!(f, "{}", p.shorty_char())?;
        }
        Ok(())
    }
}

/// A decoded argument or return value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Option<ObjectRef>),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Void => TypeTag::Void,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Byte(_) => TypeTag::Byte,
            Value::Char(_) => TypeTag::Char,
            Value::Short(_) => TypeTag::Short,
            Value::Int(_) => TypeTag::Int,
            Value::Long(_) => TypeTag::Long,
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            Value::Reference(_) => TypeTag::Reference,
        }
    }

    /// Interprets a raw argument/return word. Narrow kinds only look at the low 32 bits.
    pub fn from_raw(tag: TypeTag, raw: u64) -> Value {
        let low = raw as u32;
        match tag {
            TypeTag::Void => Value::Void,
            TypeTag::Boolean => Value::Boolean(low != 0),
            TypeTag::Byte => Value::Byte(low as i8),
            TypeTag::Char => Value::Char(low as u16),
            TypeTag::Short => Value::Short(low as i16),
            TypeTag::Int => Value::Int(low as i32),
            TypeTag::Float => Value::Float(f32::from_bits(low)),
            TypeTag::Long => Value::Long(raw as i64),
            TypeTag::Double => Value::Double(f64::from_bits(raw)),
            TypeTag::Reference => Value::Reference(ObjectRef::from_raw(low)),
        }
    }

    /// Encodes the value the way the quick ABI returns it: sub-word integers sign- or
    /// zero-extended to 32 bits, floats as their bit pattern.
    pub fn to_raw(&self) -> u64 {
        match *self {
            Value::Void => 0,
            Value::Boolean(b) => b as u64,
            Value::Byte(b) => b as i32 as u32 as u64,
            Value::Char(c) => c as u64,
            Value::Short(s) => s as i32 as u32 as u64,
            Value::Int(i) => i as u32 as u64,
            Value::Float(f) => f.to_bits() as u64,
            Value::Long(l) => l as u64,
            Value::Double(d) => d.to_bits(),
            Value::Reference(r) => raw_ref(r) as u64,
        }
    }

    fn integral(self) -> Option<i64> {
        match self {
            Value::Byte(b) => Some(b as i64),
            Value::Char(c) => Some(c as i64),
            Value::Short(s) => Some(s as i64),
            Value::Int(i) => Some(i as i64),
            Value::Long(l) => Some(l),
            _ => None,
        }
    }

    /// Applies an identity or widening primitive conversion. Returns `None` for narrowing
    /// conversions, booleans crossing kinds, and references.
    pub fn widen_to(self, declared: TypeTag) -> Option<Value> {
        if !self.tag().widens_to(declared) {
            return None;
        }
        if self.tag() == declared {
            return Some(self);
        }
        Some(match declared {
            TypeTag::Short => Value::Short(self.integral()? as i16),
            TypeTag::Int => Value::Int(self.integral()? as i32),
            TypeTag::Long => Value::Long(self.integral()?),
            TypeTag::Float => Value::Float(self.integral()? as f32),
            TypeTag::Double => match self {
                Value::Float(f) => Value::Double(f as f64),
                other => Value::Double(other.integral()? as f64),
            },
            _ => return None,
        })
    }
}
