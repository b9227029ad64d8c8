//! Newtype wrappers for the quantities handled by the valuation.
#![allow(missing_docs)]

/// Represents a dimensionless quantity (rates, ratios and discount factors).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    PartialOrd,
    Default,
    derive_more::Add,
    derive_more::Sub,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Dimensionless(pub f64);

impl std::ops::Mul for Dimensionless {
    type Output = Dimensionless;

    fn mul(self, rhs: Dimensionless) -> Self::Output {
        Dimensionless(self.0 * rhs.0)
    }
}

impl std::ops::Div for Dimensionless {
    type Output = Dimensionless;

    fn div(self, rhs: Dimensionless) -> Self::Output {
        Dimensionless(self.0 / rhs.0)
    }
}

impl Dimensionless {
    pub fn powi(self, rhs: i32) -> Self {
        Dimensionless(self.0.powi(rhs))
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl From<f64> for Dimensionless {
    fn from(val: f64) -> Self {
        Self(val)
    }
}

macro_rules! unit_struct {
    ($name:ident) => {
        /// Represents a type of quantity.
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            PartialOrd,
            Default,
            derive_more::Add,
            derive_more::Sub,
            derive_more::Display,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub f64);

        impl $name {
            /// Returns the value of the unit type as a f64.
            pub fn value(self) -> f64 {
                self.0
            }
        }

        impl std::ops::AddAssign for $name {
            fn add_assign(&mut self, rhs: $name) {
                self.0 += rhs.0;
            }
        }

        impl std::ops::Mul<Dimensionless> for $name {
            type Output = $name;
            fn mul(self, rhs: Dimensionless) -> $name {
                $name(self.0 * rhs.0)
            }
        }

        impl std::ops::Mul<$name> for Dimensionless {
            type Output = $name;
            fn mul(self, rhs: $name) -> $name {
                $name(self.0 * rhs.0)
            }
        }

        impl std::ops::Div<Dimensionless> for $name {
            type Output = $name;
            fn div(self, rhs: Dimensionless) -> $name {
                $name(self.0 / rhs.0)
            }
        }

        impl std::iter::Sum for $name {
            fn sum<I: Iterator<Item = $name>>(iter: I) -> $name {
                $name(iter.map(|x| x.0).sum())
            }
        }

        impl float_cmp::ApproxEq for $name {
            type Margin = float_cmp::F64Margin;

            fn approx_eq<M: Into<Self::Margin>>(self, other: Self, margin: M) -> bool {
                self.0.approx_eq(other.0, margin)
            }
        }
    };
}

unit_struct!(Money);

impl From<f64> for Money {
    fn from(val: f64) -> Self {
        Self(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn test_money_discounted() {
        let discounted = Money(110.0) / Dimensionless(1.1);
        assert_approx_eq!(Money, discounted, Money(100.0), epsilon = 1e-10);
    }

    #[test]
    fn test_money_sum() {
        let total: Money = [Money(1.5), Money(2.0), Money(-0.5)].into_iter().sum();
        assert_eq!(total, Money(3.0));
    }
}
