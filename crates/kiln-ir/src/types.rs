//! Primitive types, signatures and linkage.

use std::fmt;

/// A primitive IR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    /// Only legal as a function return type.
    Void,
}

impl Type {
    /// Bit width of an integer type, `0` for `void`.
    pub const fn bits(self) -> u32 {
        match self {
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 => 32,
            Type::I64 => 64,
            Type::Void => 0,
        }
    }

    pub const fn is_int(self) -> bool {
        !matches!(self, Type::Void)
    }

    /// Integer type of the given width, if there is one.
    pub const fn int(bits: u32) -> Option<Type> {
        match bits {
            8 => Some(Type::I8),
            16 => Some(Type::I16),
            32 => Some(Type::I32),
            64 => Some(Type::I64),
            _ => None,
        }
    }

    /// Mask selecting the bits an integer of this type occupies.
    pub const fn mask(self) -> u64 {
        match self.bits() {
            0 => 0,
            64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    /// Truncate a bit pattern to this type's width (modulo 2^width).
    pub const fn wrap(self, bits: u64) -> u64 {
        bits & self.mask()
    }

    /// Interpret a wrapped bit pattern as a signed integer.
    pub const fn sign_extend(self, bits: u64) -> i64 {
        let width = self.bits();
        if width == 0 || width == 64 {
            return bits as i64;
        }
        let shift = 64 - width;
        ((bits << shift) as i64) >> shift
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            ty => write!(f, "i{}", ty.bits()),
        }
    }
}

/// Symbol visibility of a function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible outside the object file.
    #[default]
    External,
    /// Local to the object file.
    Internal,
}

/// Ordered parameter types plus a return type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl Signature {
    pub fn new(params: impl Into<Vec<Type>>, ret: Type) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_truncates_to_width() {
        assert_eq!(Type::I8.wrap(0x1ff), 0xff);
        assert_eq!(Type::I16.wrap(0x1_0001), 1);
        assert_eq!(Type::I32.wrap(u64::MAX), 0xffff_ffff);
        assert_eq!(Type::I64.wrap(u64::MAX), u64::MAX);
    }

    #[test]
    fn sign_extend_reads_top_bit() {
        assert_eq!(Type::I8.sign_extend(0xff), -1);
        assert_eq!(Type::I8.sign_extend(0x7f), 127);
        assert_eq!(Type::I32.sign_extend(0x8000_0000), i32::MIN as i64);
        assert_eq!(Type::I64.sign_extend(u64::MAX), -1);
    }

    #[test]
    fn display_uses_ir_spelling() {
        assert_eq!(Type::I32.to_string(), "i32");
        assert_eq!(Type::Void.to_string(), "void");
    }
}
