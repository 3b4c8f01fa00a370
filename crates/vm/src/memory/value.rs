//! Defines the [`Value`] type.

use std::fmt;

use num_traits::Zero;
use starknet_types_core::felt::{Felt, NonZeroFelt};

use crate::error::Error;

use super::Relocatable;

/// A value that may be stored in a [`Memory`](super::Memory) segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// A scalar with no provenance information.
    Scalar(Felt),
    /// A pointer within a specific segment.
    Pointer(Relocatable),
}

impl Value {
    /// Returns whether this [`Value`] is a scalar field element.
    #[inline(always)]
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Returns whether this [`Value`] is a pointer.
    #[inline(always)]
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }

    /// Attempts to view this value as a scalar field element.
    #[inline(always)]
    pub const fn scalar(&self) -> Option<&Felt> {
        match self {
            Self::Scalar(element) => Some(element),
            Self::Pointer(_) => None,
        }
    }

    /// Attempts to view this value as a pointer.
    #[inline(always)]
    pub const fn pointer(&self) -> Option<&Relocatable> {
        match self {
            Self::Scalar(_) => None,
            Self::Pointer(pointer) => Some(pointer),
        }
    }

    /// Attempts to add two [`Value`]s.
    ///
    /// Adding a scalar to a pointer moves the pointer; adding two pointers is
    /// an error.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => Ok(Self::Scalar(left + right)),
            (Self::Pointer(left), Self::Scalar(right)) => left.add_felt(right).map(Self::Pointer),
            (Self::Scalar(left), Self::Pointer(right)) => right.add_felt(left).map(Self::Pointer),
            (Self::Pointer(_), Self::Pointer(_)) => Err(Error::ExpectedFelt(*other)),
        }
    }

    /// Attempts to subtract two [`Value`]s.
    ///
    /// Subtracting two pointers of the same segment yields their distance as
    /// a scalar.
    pub fn subtract(&self, other: &Self) -> Result<Self, Error> {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => Ok(Self::Scalar(left - right)),
            (Self::Pointer(left), Self::Scalar(right)) => left.sub_felt(right).map(Self::Pointer),
            (Self::Pointer(left), Self::Pointer(right)) => left.sub(*right).map(Self::Scalar),
            (Self::Scalar(_), Self::Pointer(_)) => Err(Error::ExpectedFelt(*other)),
        }
    }

    /// Attempts to multiply two [`Value`]s. Both must be scalars.
    pub fn multiply(&self, other: &Self) -> Result<Self, Error> {
        let left = self.scalar().ok_or(Error::ExpectedFelt(*self))?;
        let right = other.scalar().ok_or(Error::ExpectedFelt(*other))?;
        Ok(Self::Scalar(left * right))
    }

    /// Attempts to divide two [`Value`]s in the field. Both must be scalars
    /// and the divisor must be non-zero.
    pub fn divide(&self, other: &Self) -> Result<Self, Error> {
        let left = self.scalar().ok_or(Error::ExpectedFelt(*self))?;
        let right = other.scalar().ok_or(Error::ExpectedFelt(*other))?;
        let divisor = NonZeroFelt::try_from(*right).map_err(|_| Error::DivideByZero)?;
        Ok(Self::Scalar(left.field_div(&divisor)))
    }

    /// Returns whether this [`Value`] equals zero. Pointers are never zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Scalar(value) => value.is_zero(),
            Self::Pointer(_) => false,
        }
    }
}

impl From<Felt> for Value {
    #[inline(always)]
    fn from(value: Felt) -> Self {
        Self::Scalar(value)
    }
}

impl From<Relocatable> for Value {
    #[inline(always)]
    fn from(value: Relocatable) -> Self {
        Self::Pointer(value)
    }
}

impl PartialEq<Felt> for Value {
    fn eq(&self, other: &Felt) -> bool {
        match self {
            Self::Scalar(value) => value == other,
            Self::Pointer(_) => false,
        }
    }
}

impl PartialEq<Relocatable> for Value {
    fn eq(&self, other: &Relocatable) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Pointer(pointer) => pointer == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => fmt::Display::fmt(value, f),
            Self::Pointer(pointer) => fmt::Display::fmt(pointer, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_pointer_and_scalar() {
        let p = Value::Pointer(Relocatable::new(1, 4));
        let s = Value::Scalar(Felt::from(3));
        assert_eq!(p.add(&s).unwrap(), Relocatable::new(1, 7));
        assert_eq!(s.add(&p).unwrap(), Relocatable::new(1, 7));
    }

    #[test]
    fn add_two_pointers_fails() {
        let p = Value::Pointer(Relocatable::new(1, 4));
        assert_eq!(p.add(&p), Err(Error::ExpectedFelt(p)));
    }

    #[test]
    fn subtract_pointers_yields_distance() {
        let a = Value::Pointer(Relocatable::new(1, 9));
        let b = Value::Pointer(Relocatable::new(1, 4));
        assert_eq!(a.subtract(&b).unwrap(), Felt::from(5));
    }

    #[test]
    fn multiply_rejects_pointers() {
        let p = Value::Pointer(Relocatable::new(0, 0));
        let s = Value::Scalar(Felt::TWO);
        assert_eq!(s.multiply(&p), Err(Error::ExpectedFelt(p)));
    }

    #[test]
    fn divide_by_zero_fails() {
        let a = Value::Scalar(Felt::from(6));
        let zero = Value::Scalar(Felt::ZERO);
        assert_eq!(a.divide(&zero), Err(Error::DivideByZero));
    }

    #[test]
    fn divide_inverts_multiply() {
        let a = Value::Scalar(Felt::from(6));
        let b = Value::Scalar(Felt::from(3));
        assert_eq!(a.divide(&b).unwrap(), Felt::TWO);
    }

    #[test]
    fn pointers_are_never_zero() {
        assert!(!Value::Pointer(Relocatable::new(0, 0)).is_zero());
        assert!(Value::Scalar(Felt::ZERO).is_zero());
    }
}
