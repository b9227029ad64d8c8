//! Discounting and net present value.
use crate::series::Series;
use crate::units::{Dimensionless, Money};
use crate::year::Timeline;

/// The factor by which a cash flow `periods` years after the origin is divided when discounting
pub fn discount_factor(rate: Dimensionless, periods: f64) -> Dimensionless {
    Dimensionless((1.0 + rate.0).powf(periods))
}

/// Net present value of a yearly cash-flow series over `timeline`.
///
/// The value of each year is discounted by the number of years since the start of the timeline,
/// so the first value is not discounted.
pub fn npv(rate: Dimensionless, timeline: &Timeline, cash_flows: &Series) -> Money {
    cash_flows
        .iter()
        .zip(timeline.years())
        .map(|(value, &year)| Money(value) / discount_factor(rate, timeline.offset(year)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0.1, 0.0, 1.0)]
    #[case(0.1, 2.0, 1.21)]
    #[case(0.0, 5.0, 1.0)]
    fn test_discount_factor(#[case] rate: f64, #[case] periods: f64, #[case] expected: f64) {
        let result = discount_factor(Dimensionless(rate), periods);
        assert_approx_eq!(f64, result.0, expected, epsilon = 1e-12);
    }

    #[rstest]
    #[case(0.1, vec![2020, 2021, 2022], vec![100.0, 110.0, 121.0], 300.0)]
    #[case(0.0, vec![2020, 2021, 2022], vec![1.0, 2.0, 3.0], 6.0)]
    #[case(0.05, vec![2020, 2021, 2022], vec![0.0, 0.0, 0.0], 0.0)]
    #[case(0.1, vec![2020, 2022], vec![100.0, 121.0], 200.0)]
    #[case(0.1, vec![2025, 2030], vec![0.0, 161.051], 100.0)]
    fn test_npv(
        #[case] rate: f64,
        #[case] years: Vec<u32>,
        #[case] flows: Vec<f64>,
        #[case] expected: f64,
    ) {
        let timeline = Timeline::new(years).unwrap();
        let result = npv(Dimensionless(rate), &timeline, &Series::from(flows));
        assert_approx_eq!(Money, result, Money(expected), epsilon = 1e-9);
    }
}
