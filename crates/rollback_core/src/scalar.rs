//! Type-tagged scalar values for guest globals.
//!
//! The source captures a global's value as an untyped scalar; we carry the
//! guest's declared type alongside the value so restoration is type-exact
//! and bitwise comparisons (floats included) are well defined.

use wasmtime::{GlobalType, Val, ValType};

use crate::error::CoreError;

/// A typed global value. Floats are stored as their raw bits so two
/// `Scalar`s compare equal iff their underlying bytes are identical,
/// including `NaN` payloads — required by the "bitwise identical"
/// testable properties in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl Scalar {
    pub fn value_type(&self) -> ValType {
        match self {
            Scalar::I32(_) => ValType::I32,
            Scalar::I64(_) => ValType::I64,
            Scalar::F32(_) => ValType::F32,
            Scalar::F64(_) => ValType::F64,
        }
    }

    pub fn to_val(self) -> Val {
        match self {
            Scalar::I32(v) => Val::I32(v),
            Scalar::I64(v) => Val::I64(v),
            Scalar::F32(bits) => Val::F32(bits),
            Scalar::F64(bits) => Val::F64(bits),
        }
    }

    pub fn from_val(val: &Val) -> Result<Self, CoreError> {
        match val {
            Val::I32(v) => Ok(Scalar::I32(*v)),
            Val::I64(v) => Ok(Scalar::I64(*v)),
            Val::F32(bits) => Ok(Scalar::F32(*bits)),
            Val::F64(bits) => Ok(Scalar::F64(*bits)),
            other => Err(CoreError::UnsupportedValueType(format!("{other:?}"))),
        }
    }

    /// Validate that this scalar's tag matches a global's declared type
    /// before it is written back during rewind.
    pub fn matches(&self, ty: &GlobalType) -> bool {
        ty.content().clone() == self.value_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_nan_bits_round_trip_bitwise() {
        let nan_bits = f64::NAN.to_bits();
        let s = Scalar::F64(nan_bits);
        let val = s.to_val();
        let back = Scalar::from_val(&val).unwrap();
        assert_eq!(s, back);
        if let Val::F64(bits) = val {
            assert_eq!(bits, nan_bits);
        } else {
            panic!("expected F64");
        }
    }

    #[test]
    fn value_type_matches_tag() {
        assert_eq!(Scalar::I32(0).value_type(), ValType::I32);
        assert_eq!(Scalar::I64(0).value_type(), ValType::I64);
        assert_eq!(Scalar::F32(0).value_type(), ValType::F32);
        assert_eq!(Scalar::F64(0).value_type(), ValType::F64);
    }
}
