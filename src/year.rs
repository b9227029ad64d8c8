//! The run timeline: the ordered set of years over which every entity is valued.
use crate::input::is_sorted_and_unique;
use crate::series::Series;
use anyhow::{Result, ensure};
use itertools::Itertools;

/// The sorted, unique years of a run
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline(Vec<u32>);

impl Timeline {
    /// Create a timeline from years which must already be sorted and unique
    pub fn new(years: Vec<u32>) -> Result<Self> {
        ensure!(!years.is_empty(), "Timeline cannot be empty");
        ensure!(
            is_sorted_and_unique(&years),
            "Timeline years must be in order and unique"
        );

        Ok(Self(years))
    }

    /// Create a timeline from an arbitrary collection of years, sorting and deduplicating them
    pub fn from_years<I: IntoIterator<Item = u32>>(years: I) -> Result<Self> {
        Self::new(years.into_iter().sorted_unstable().dedup().collect())
    }

    /// The years in this timeline
    pub fn years(&self) -> &[u32] {
        &self.0
    }

    /// The number of years
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the timeline is empty (never true for a validated timeline)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first year, used as the discounting origin
    pub fn first(&self) -> u32 {
        self.0[0]
    }

    /// The position of `year` in the timeline
    pub fn index_of(&self, year: u32) -> Option<usize> {
        self.0.binary_search(&year).ok()
    }

    /// A zero series spanning the timeline
    pub fn zeros(&self) -> Series {
        Series::zeros(self.len())
    }

    /// Build a series from `(year, value)` pairs.
    ///
    /// Values for the same year are summed. Years outside the timeline are ignored.
    pub fn series_from<I>(&self, values: I) -> Series
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        let mut series = self.zeros();
        for (year, value) in values {
            if let Some(idx) = self.index_of(year) {
                series[idx] += value;
            }
        }

        series
    }

    /// Capacity schedule for a facility which is active from `start` (inclusive) until `close`
    /// (exclusive). A missing date means the facility has no bound on that side.
    pub fn capacity_schedule(&self, nominal: f64, start: Option<u32>, close: Option<u32>) -> Series {
        self.0
            .iter()
            .map(|&year| {
                let started = start.is_none_or(|start| start <= year);
                let open = close.is_none_or(|close| year < close);
                if started && open { nominal } else { 0.0 }
            })
            .collect()
    }

    /// Offset of `year` from the start of the timeline, in years
    pub fn offset(&self, year: u32) -> f64 {
        f64::from(year) - f64::from(self.first())
    }
}
