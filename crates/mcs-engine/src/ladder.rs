//! Inverse temperature ladders and the two ladder update rules.

use std::ops::Deref;

use mcs_core::errors::ErrorInfo;
use mcs_core::McError;
use serde::{Deserialize, Serialize};

/// Strictly ascending sequence of inverse temperatures, one per replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct InverseTemperatureLadder(Vec<f64>);

impl InverseTemperatureLadder {
    /// Validates and wraps a ladder.
    pub fn new(betas: Vec<f64>) -> Result<Self, McError> {
        if betas.len() < 2 {
            return Err(McError::Ladder(
                ErrorInfo::new("ladder-too-short", "a ladder needs at least two rungs")
                    .with_context("rungs", betas.len().to_string()),
            ));
        }
        if let Some(index) = betas.iter().position(|beta| !beta.is_finite()) {
            return Err(McError::Ladder(
                ErrorInfo::new("ladder-non-finite", "inverse temperatures must be finite")
                    .with_context("rung", index.to_string()),
            ));
        }
        if let Some(index) = betas.windows(2).position(|pair| pair[0] >= pair[1]) {
            return Err(McError::Ladder(
                ErrorInfo::new("ladder-unsorted", "inverse temperatures must be strictly ascending")
                    .with_context("rung", index.to_string())
                    .with_context("values", format!("{} >= {}", betas[index], betas[index + 1])),
            ));
        }
        Ok(Self(betas))
    }

    /// Evenly spaced ladder between `first` and `last`.
    pub fn linear(first: f64, last: f64, rungs: usize) -> Result<Self, McError> {
        if rungs < 2 {
            return Self::new(vec![first; rungs]);
        }
        let spacing = (last - first) / (rungs - 1) as f64;
        Self::new((0..rungs).map(|rung| first + spacing * rung as f64).collect())
    }

    /// Inverse temperatures in ascending order.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Consumes the ladder.
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for InverseTemperatureLadder {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for InverseTemperatureLadder {
    type Error = McError;

    fn try_from(betas: Vec<f64>) -> Result<Self, McError> {
        Self::new(betas)
    }
}

impl From<InverseTemperatureLadder> for Vec<f64> {
    fn from(ladder: InverseTemperatureLadder) -> Self {
        ladder.0
    }
}

/// Rescales every interval proportionally to its measured exchange
/// acceptance while keeping both endpoints.
///
/// With `lambda = (beta_last - beta_first) / sum_i a_i (beta_{i+1} - beta_i)`
/// the new intervals are `lambda * a_i * (beta_{i+1} - beta_i)`.
pub fn berg_update(
    ladder: &InverseTemperatureLadder,
    acceptance: &[f64],
) -> Result<InverseTemperatureLadder, McError> {
    check_pairs(ladder, acceptance)?;
    let betas = ladder.as_slice();
    let denominator: f64 = acceptance
        .iter()
        .zip(betas.windows(2))
        .map(|(a, pair)| a * (pair[1] - pair[0]))
        .sum();
    let lambda = (betas[betas.len() - 1] - betas[0]) / denominator;
    if !lambda.is_finite() {
        return Err(McError::Numeric(
            ErrorInfo::new("berg-lambda", "interval scale is not finite")
                .with_context("denominator", denominator.to_string()),
        ));
    }

    let mut updated = Vec::with_capacity(betas.len());
    updated.push(betas[0]);
    for (i, pair) in betas.windows(2).enumerate() {
        let previous = updated[i];
        updated.push(previous + lambda * acceptance[i] * (pair[1] - pair[0]));
    }
    // Pin the endpoint against rounding drift.
    let last = updated.len() - 1;
    updated[last] = betas[last];
    InverseTemperatureLadder::new(updated)
}

/// Up/down replica-flow fraction `f = down / (up + down)` per rung.
///
/// Rungs never visited by a labelled replica yield `NaN`.
pub fn flow_fraction(up: &[f64], down: &[f64]) -> Vec<f64> {
    up.iter()
        .zip(down)
        .map(|(up, down)| down / (up + down))
        .collect()
}

/// Finite-difference derivative of `values` along the ladder: forward at the
/// first rung, central inside and backward at the last rung.
pub fn ladder_derivative(ladder: &[f64], values: &[f64]) -> Vec<f64> {
    let n = ladder.len().min(values.len());
    if n < 2 {
        return vec![f64::NAN; n];
    }
    (0..n)
        .map(|b| {
            let (lo, hi) = if b == 0 {
                (0, 1)
            } else if b == n - 1 {
                (n - 2, n - 1)
            } else {
                (b - 1, b + 1)
            };
            (values[hi] - values[lo]) / (ladder[hi] - ladder[lo])
        })
        .collect()
}

/// Whether every derivative is a non-negative number.
pub fn derivative_is_admissible(derivative: &[f64]) -> bool {
    derivative.iter().all(|value| *value >= 0.0)
}

const LINEAR_THRESHOLD: f64 = 1e-12;

/// Redistributes the interior rungs so that each interval carries the same
/// share of `integral sqrt(f'(beta) / delta_beta)`, with `f'` interpolated
/// linearly between the old rungs. Endpoints are kept.
pub fn katzgraber_update(
    ladder: &InverseTemperatureLadder,
    derivative: &[f64],
) -> Result<InverseTemperatureLadder, McError> {
    let betas = ladder.as_slice();
    let rungs = betas.len();
    if derivative.len() != rungs {
        return Err(McError::Ladder(
            ErrorInfo::new("derivative-length", "one derivative value per rung is required")
                .with_context("rungs", rungs.to_string())
                .with_context("values", derivative.len().to_string()),
        ));
    }
    if !derivative_is_admissible(derivative) {
        return Err(McError::Ladder(
            ErrorInfo::new("derivative-negative", "flow derivative must be non-negative everywhere")
                .with_context("derivative", format!("{derivative:?}")),
        ));
    }

    let segments: Vec<Segment> = (0..rungs - 1)
        .map(|b| Segment::new(betas[b], betas[b + 1], derivative[b], derivative[b + 1]))
        .collect();
    let total: f64 = segments.iter().map(Segment::integral).sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(McError::Numeric(
            ErrorInfo::new("katzgraber-normalization", "flow integral is not positive")
                .with_context("integral", total.to_string()),
        ));
    }
    let normalization = 1.0 / total;

    let mut cumulative = Vec::with_capacity(rungs);
    cumulative.push(0.0);
    for segment in &segments {
        let last = cumulative[cumulative.len() - 1];
        cumulative.push(last + normalization * segment.integral());
    }

    let mut updated = Vec::with_capacity(rungs);
    updated.push(betas[0]);
    for rung in 1..rungs - 1 {
        let target = rung as f64 / (rungs - 1) as f64;
        let b = (0..rungs - 1)
            .find(|&b| cumulative[b] < target && target <= cumulative[b + 1])
            .unwrap_or(rungs - 2);
        updated.push(segments[b].invert(target - cumulative[b], normalization));
    }
    updated.push(betas[rungs - 1]);
    InverseTemperatureLadder::new(updated)
}

/// One interval of the old ladder with linearly interpolated `f'`.
struct Segment {
    start: f64,
    width: f64,
    slope_start: f64,
    slope_end: f64,
    lambda: f64,
}

impl Segment {
    fn new(start: f64, end: f64, slope_start: f64, slope_end: f64) -> Self {
        let width = end - start;
        Self {
            start,
            width,
            slope_start,
            slope_end,
            lambda: (slope_end - slope_start) / width,
        }
    }

    fn is_linear(&self) -> bool {
        let scale = self.slope_start.max(self.slope_end).max(1.0);
        self.lambda.abs() * self.width <= LINEAR_THRESHOLD * scale
    }

    fn integral(&self) -> f64 {
        if self.is_linear() {
            (self.slope_start * self.width).sqrt()
        } else {
            2.0 / (3.0 * self.lambda * self.width.sqrt())
                * (self.slope_end.powf(1.5) - self.slope_start.powf(1.5))
        }
    }

    /// Inverse temperature inside the segment at which the normalized
    /// partial integral reaches `share`.
    fn invert(&self, share: f64, normalization: f64) -> f64 {
        let beta = if self.is_linear() {
            self.start + share / (normalization * (self.slope_start / self.width).sqrt())
        } else {
            let inner = 3.0 * self.lambda * self.width.sqrt() * share / (2.0 * normalization)
                + self.slope_start.powf(1.5);
            self.start - self.slope_start / self.lambda
                + inner.max(0.0).powf(2.0 / 3.0) / self.lambda
        };
        beta.clamp(self.start, self.start + self.width)
    }
}

fn check_pairs(ladder: &InverseTemperatureLadder, acceptance: &[f64]) -> Result<(), McError> {
    if acceptance.len() + 1 != ladder.len() {
        return Err(McError::Ladder(
            ErrorInfo::new(
                "acceptance-length",
                "one acceptance value per adjacent pair is required",
            )
            .with_context("rungs", ladder.len().to_string())
            .with_context("values", acceptance.len().to_string()),
        ));
    }
    if let Some(pair) = acceptance
        .iter()
        .position(|a| !(a.is_finite() && *a > 0.0 && *a <= 1.0))
    {
        return Err(McError::Ladder(
            ErrorInfo::new("acceptance-out-of-range", "pair acceptance must lie in (0, 1]")
                .with_context("pair", pair.to_string())
                .with_context("value", acceptance[pair].to_string()),
        ));
    }
    Ok(())
}
