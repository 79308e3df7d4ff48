use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::EnergyBinning;

/// Sparse histogram over integer energy bins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Histogram {
    bins: BTreeMap<i64, f64>,
}

impl Histogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored in `bin`, if the bin has been populated.
    pub fn get(&self, bin: i64) -> Option<f64> {
        self.bins.get(&bin).copied()
    }

    /// Number of populated bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether no bin has been populated yet.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Iterates over `(bin, value)` pairs in ascending bin order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.bins.iter().map(|(bin, value)| (*bin, *value))
    }

    /// Adds `amount` to `bin`, creating the bin at zero.
    pub fn add(&mut self, bin: i64, amount: f64) {
        *self.bins.entry(bin).or_insert(0.0) += amount;
    }

    /// Adds `amount` to `bin`; a new bin starts from the current minimum.
    pub fn add_from_minimum(&mut self, bin: i64, amount: f64) {
        let floor = self.min_value().unwrap_or(0.0);
        *self.bins.entry(bin).or_insert(floor) += amount;
    }

    /// Smallest stored value.
    pub fn min_value(&self) -> Option<f64> {
        self.bins.values().copied().reduce(f64::min)
    }

    /// Ratio of the smallest to the mean value; zero when empty or all zero.
    pub fn flatness(&self) -> f64 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.bins.values().sum();
        if sum == 0.0 {
            return 0.0;
        }
        let mean = sum / self.bins.len() as f64;
        self.min_value().unwrap_or(0.0) / mean
    }

    /// Sets every populated bin back to zero.
    pub fn reset_values(&mut self) {
        for value in self.bins.values_mut() {
            *value = 0.0;
        }
    }

    /// Shifts all values so that the lowest populated bin holds zero.
    pub fn shift_lowest_bin_to_zero(&mut self) {
        let Some(offset) = self.bins.values().next().copied() else {
            return;
        };
        for value in self.bins.values_mut() {
            *value -= offset;
        }
    }

    /// Writes `energy,value` rows to a CSV file.
    pub fn write_csv<P: AsRef<Path>>(
        &self,
        path: P,
        binning: &EnergyBinning,
    ) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "energy,value")?;
        for (bin, value) in self.iter() {
            writeln!(file, "{},{:.9}", binning.energy(bin), value)?;
        }
        Ok(())
    }
}
