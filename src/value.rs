use crate::element::{INVALID_INDEX, Index};
use num_traits::{Bounded, Float, NumCast, ToPrimitive};
use std::fmt::Debug;

/// Tag identifying the value type of a type erased attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ValueKind {
    pub fn is_integral(&self) -> bool {
        !matches!(self, ValueKind::F32 | ValueKind::F64)
    }
}

mod private {
    pub trait Sealed {}
}

/**
 * Types that can be stored in an attribute. This is a closed set of fixed
 * width integer and floating point types, so that type erased attributes can
 * always be dispatched back to their concrete type.
 */
pub trait AttributeValue:
    private::Sealed
    + Copy
    + Default
    + PartialEq
    + PartialOrd
    + Debug
    + Send
    + Sync
    + Bounded
    + NumCast
    + ToPrimitive
    + 'static
{
    const KIND: ValueKind;

    fn is_integral() -> bool {
        Self::KIND.is_integral()
    }

    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }

    /// Convert from an `f64`, saturating at the bounds of integral types.
    fn from_f64_lossy(v: f64) -> Self {
        <Self as NumCast>::from(v).unwrap_or_else(|| {
            if v < 0. {
                Self::min_value()
            } else {
                Self::max_value()
            }
        })
    }

    /// Interpret this value as an element index. Negative and out of range
    /// values, as well as the maximum value of the type, are invalid.
    fn to_index(self) -> Index {
        if self == Self::max_value() {
            return INVALID_INDEX;
        }
        self.to_u32().unwrap_or(INVALID_INDEX)
    }

    /// Store an element index in this type. [`INVALID_INDEX`] maps to the
    /// maximum value of the type.
    fn from_index(i: Index) -> Self {
        if i == INVALID_INDEX {
            Self::max_value()
        } else {
            <Self as NumCast>::from(i).unwrap_or_else(Self::max_value)
        }
    }
}

macro_rules! impl_attribute_value {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl private::Sealed for $t {}
            impl AttributeValue for $t {
                const KIND: ValueKind = ValueKind::$kind;
            }
        )*
    };
}

impl_attribute_value!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

/// Floating point types that can be used for vertex positions.
pub trait Scalar: AttributeValue + Float {}

impl Scalar for f32 {}
impl Scalar for f64 {}

/// Run `$body` with the type alias `$t` bound to the concrete type of the
/// given [`ValueKind`].
macro_rules! dispatch_value_kind {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            $crate::value::ValueKind::I8 => {
                type $t = i8;
                $body
            }
            $crate::value::ValueKind::I16 => {
                type $t = i16;
                $body
            }
            $crate::value::ValueKind::I32 => {
                type $t = i32;
                $body
            }
            $crate::value::ValueKind::I64 => {
                type $t = i64;
                $body
            }
            $crate::value::ValueKind::U8 => {
                type $t = u8;
                $body
            }
            $crate::value::ValueKind::U16 => {
                type $t = u16;
                $body
            }
            $crate::value::ValueKind::U32 => {
                type $t = u32;
                $body
            }
            $crate::value::ValueKind::U64 => {
                type $t = u64;
                $body
            }
            $crate::value::ValueKind::F32 => {
                type $t = f32;
                $body
            }
            $crate::value::ValueKind::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

pub(crate) use dispatch_value_kind;
