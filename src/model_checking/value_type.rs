use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use super::errors::{ModelCheckingError, Result};

/// Scalar field that probabilities, rates and rewards live in.
///
/// Timed analyses need `exp` and `ln`. Types that cannot provide them set
/// `SUPPORTS_EXPONENTIAL` to false and return `None` from both, which makes
/// the bounded-until engines refuse to run before doing any work.
pub trait ValueType:
    Copy
    + Debug
    + Display
    + Default
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + Sum<Self>
    + 'static
{
    const SUPPORTS_EXPONENTIAL: bool;

    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn infinity() -> Self;
    fn exp(self) -> Option<Self>;
    fn ln(self) -> Option<Self>;

    fn abs(self) -> Self {
        if self < Self::zero() {
            -self
        } else {
            self
        }
    }

    fn max_value(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }

    fn min_value(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    fn is_zero(self) -> bool {
        self == Self::zero()
    }
}

impl ValueType for f64 {
    const SUPPORTS_EXPONENTIAL: bool = true;

    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(value: f64) -> Self {
        value
    }
    fn to_f64(self) -> f64 {
        self
    }
    fn infinity() -> Self {
        f64::INFINITY
    }
    fn exp(self) -> Option<Self> {
        Some(f64::exp(self))
    }
    fn ln(self) -> Option<Self> {
        Some(f64::ln(self))
    }
}

impl ValueType for f32 {
    const SUPPORTS_EXPONENTIAL: bool = true;

    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(value: f64) -> Self {
        value as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn infinity() -> Self {
        f32::INFINITY
    }
    fn exp(self) -> Option<Self> {
        Some(f32::exp(self))
    }
    fn ln(self) -> Option<Self> {
        Some(f32::ln(self))
    }
}

/// Fails with `UnsupportedValueType` unless `V` can do timed analysis.
pub fn require_exponential<V: ValueType>(operation: &'static str) -> Result<()> {
    if V::SUPPORTS_EXPONENTIAL {
        Ok(())
    } else {
        Err(ModelCheckingError::UnsupportedValueType { operation })
    }
}

pub fn exp<V: ValueType>(value: V, operation: &'static str) -> Result<V> {
    value
        .exp()
        .ok_or(ModelCheckingError::UnsupportedValueType { operation })
}

pub fn ln<V: ValueType>(value: V, operation: &'static str) -> Result<V> {
    value
        .ln()
        .ok_or(ModelCheckingError::UnsupportedValueType { operation })
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scalar without transcendental functions, standing in for exact
    //! rational arithmetic.
    use super::ValueType;
    use std::fmt;
    use std::iter::Sum;
    use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

    #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
    pub struct Exact(pub f64);

    impl fmt::Display for Exact {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Add for Exact {
        type Output = Exact;
        fn add(self, rhs: Exact) -> Exact {
            Exact(self.0 + rhs.0)
        }
    }
    impl Sub for Exact {
        type Output = Exact;
        fn sub(self, rhs: Exact) -> Exact {
            Exact(self.0 - rhs.0)
        }
    }
    impl Mul for Exact {
        type Output = Exact;
        fn mul(self, rhs: Exact) -> Exact {
            Exact(self.0 * rhs.0)
        }
    }
    impl Div for Exact {
        type Output = Exact;
        fn div(self, rhs: Exact) -> Exact {
            Exact(self.0 / rhs.0)
        }
    }
    impl Neg for Exact {
        type Output = Exact;
        fn neg(self) -> Exact {
            Exact(-self.0)
        }
    }
    impl AddAssign for Exact {
        fn add_assign(&mut self, rhs: Exact) {
            self.0 += rhs.0;
        }
    }
    impl SubAssign for Exact {
        fn sub_assign(&mut self, rhs: Exact) {
            self.0 -= rhs.0;
        }
    }
    impl MulAssign for Exact {
        fn mul_assign(&mut self, rhs: Exact) {
            self.0 *= rhs.0;
        }
    }
    impl Sum for Exact {
        fn sum<I: Iterator<Item = Exact>>(iter: I) -> Exact {
            Exact(iter.map(|x| x.0).sum())
        }
    }

    impl ValueType for Exact {
        const SUPPORTS_EXPONENTIAL: bool = false;

        fn zero() -> Self {
            Exact(0.0)
        }
        fn one() -> Self {
            Exact(1.0)
        }
        fn from_f64(value: f64) -> Self {
            Exact(value)
        }
        fn to_f64(self) -> f64 {
            self.0
        }
        fn infinity() -> Self {
            Exact(f64::INFINITY)
        }
        fn exp(self) -> Option<Self> {
            None
        }
        fn ln(self) -> Option<Self> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Exact;
    use super::*;

    #[test]
    fn floats_support_exponentials() {
        assert!(require_exponential::<f64>("test").is_ok());
        assert!(require_exponential::<f32>("test").is_ok());
        assert!((exp(1.0f64, "test").unwrap() - std::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn exact_values_are_rejected() {
        match require_exponential::<Exact>("bounded until") {
            Err(ModelCheckingError::UnsupportedValueType { operation }) => {
                assert_eq!(operation, "bounded until")
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(exp(Exact(1.0), "test").is_err());
    }

    #[test]
    fn abs_min_max() {
        assert_eq!((-2.5f64).abs(), 2.5);
        assert_eq!(ValueType::max_value(1.0f64, 3.0), 3.0);
        assert_eq!(ValueType::min_value(1.0f64, 3.0), 1.0);
        assert_eq!(ValueType::abs(Exact(-1.0)), Exact(1.0));
    }
}
