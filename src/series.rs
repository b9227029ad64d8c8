//! Year-indexed numeric series.
//!
//! A [`Series`] holds one value per year of the run [`Timeline`](crate::year::Timeline). All series
//! taking part in an operation span the same timeline, so arithmetic is element-wise by position.
use serde::Serialize;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Sub, SubAssign};

/// One value per timeline year
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Series(Vec<f64>);

impl Series {
    /// A series of `len` zeros
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// A series of `len` copies of `value`
    pub fn constant(len: usize, value: f64) -> Self {
        Self(vec![value; len])
    }

    /// The underlying values
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Number of years covered
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the series has no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the values
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    /// Whether every value is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    /// Whether any value is strictly positive
    pub fn any_positive(&self) -> bool {
        self.0.iter().any(|&v| v > 0.0)
    }

    /// Position of the first strictly positive value
    pub fn first_positive(&self) -> Option<usize> {
        self.0.iter().position(|&v| v > 0.0)
    }

    /// Sum of all values
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Apply `f` to every value
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Series {
        self.0.iter().map(|&v| f(v)).collect()
    }

    /// Combine two series value by value
    pub fn zip_with<F: Fn(f64, f64) -> f64>(&self, other: &Series, f: F) -> Series {
        debug_assert_eq!(self.len(), other.len());
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(&a, &b)| f(a, b))
            .collect()
    }

    /// Element-wise minimum
    pub fn min(&self, other: &Series) -> Series {
        self.zip_with(other, f64::min)
    }

    /// Replace negative values with zero
    pub fn floor_at_zero(&self) -> Series {
        self.map(|v| v.max(0.0))
    }

    /// The volume of `self` that `capacity` can serve: `max(0, min(self, capacity))`
    pub fn served_by(&self, capacity: &Series) -> Series {
        self.min(capacity).floor_at_zero()
    }

    /// Element-wise division, giving zero wherever the divisor is not strictly positive
    pub fn checked_div(&self, divisor: &Series) -> Series {
        self.zip_with(divisor, |a, b| if b > 0.0 { a / b } else { 0.0 })
    }

    /// The smallest value, if any
    pub fn min_value(&self) -> Option<f64> {
        self.0.iter().copied().min_by(f64::total_cmp)
    }

    /// Whether every value is at least the corresponding value of `other`
    pub fn dominates(&self, other: &Series) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(&a, &b)| a >= b)
    }

    /// Keep the values from position `start` onwards, zeroing the rest
    pub fn from_position(&self, start: usize) -> Series {
        self.0
            .iter()
            .enumerate()
            .map(|(i, &v)| if i >= start { v } else { 0.0 })
            .collect()
    }

    /// Keep the values before position `end`, zeroing the rest
    pub fn before_position(&self, end: usize) -> Series {
        self.0
            .iter()
            .enumerate()
            .map(|(i, &v)| if i < end { v } else { 0.0 })
            .collect()
    }
}

impl FromIterator<f64> for Series {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<f64>> for Series {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl Index<usize> for Series {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for Series {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

impl Add<&Series> for &Series {
    type Output = Series;

    fn add(self, rhs: &Series) -> Series {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl Sub<&Series> for &Series {
    type Output = Series;

    fn sub(self, rhs: &Series) -> Series {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl Mul<&Series> for &Series {
    type Output = Series;

    fn mul(self, rhs: &Series) -> Series {
        self.zip_with(rhs, |a, b| a * b)
    }
}

impl Mul<f64> for &Series {
    type Output = Series;

    fn mul(self, rhs: f64) -> Series {
        self.map(|v| v * rhs)
    }
}

impl AddAssign<&Series> for Series {
    fn add_assign(&mut self, rhs: &Series) {
        debug_assert_eq!(self.len(), rhs.len());
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a += b;
        }
    }
}

impl SubAssign<&Series> for Series {
    fn sub_assign(&mut self, rhs: &Series) {
        debug_assert_eq!(self.len(), rhs.len());
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a -= b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[5.0, 5.0, 5.0], &[3.0, 8.0, 0.0], &[3.0, 5.0, 0.0])]
    #[case(&[5.0, -1.0], &[10.0, 10.0], &[5.0, 0.0])]
    #[case(&[5.0, 5.0], &[-2.0, 2.0], &[0.0, 2.0])]
    fn test_served_by(#[case] driver: &[f64], #[case] capacity: &[f64], #[case] expected: &[f64]) {
        let driver = Series::from(driver.to_vec());
        let capacity = Series::from(capacity.to_vec());
        assert_eq!(driver.served_by(&capacity).values(), expected);
    }

    #[test]
    fn test_checked_div() {
        let a = Series::from(vec![4.0, 4.0, 4.0]);
        let b = Series::from(vec![2.0, 0.0, -1.0]);
        assert_eq!(a.checked_div(&b).values(), &[2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_split_at_position() {
        let s = Series::from(vec![1.0, 2.0, 3.0]);
        assert_eq!(s.from_position(1).values(), &[0.0, 2.0, 3.0]);
        assert_eq!(s.before_position(1).values(), &[1.0, 0.0, 0.0]);
        assert_eq!(&s.from_position(1) + &s.before_position(1), s);
    }

    #[test]
    fn test_dominates() {
        let capacity = Series::from(vec![10.0, 10.0]);
        assert!(capacity.dominates(&Series::from(vec![10.0, 2.0])));
        assert!(!capacity.dominates(&Series::from(vec![10.0, 12.0])));
    }

    #[test]
    fn test_first_positive() {
        assert_eq!(Series::from(vec![0.0, -1.0, 2.0]).first_positive(), Some(2));
        assert_eq!(Series::zeros(3).first_positive(), None);
    }
}
