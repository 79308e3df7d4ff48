//! Iterative tuning of a parallel tempering ladder.
//!
//! Every iteration measures the adjacent-pair exchange acceptance at the
//! current ladder, appends the pair to an [`OptimizationHistory`] and derives
//! the next ladder with the configured rule. After the last update the new
//! ladder is measured once more, and the final ladder is the
//! [`WeightPolicy`]-weighted average over every recorded ladder.

use mcs_core::errors::ErrorInfo;
use mcs_core::{Configuration, McError};
use serde::{Deserialize, Serialize};

use crate::config::{OptimizationAlgorithm, OptimizationConfig, TemperingParameters, WeightPolicy};
use crate::ladder::{self, InverseTemperatureLadder};
use crate::tempering::ParallelTempering;

/// One measured ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    /// Zero-based index of the measurement.
    pub iteration: usize,
    /// Ladder the acceptance was measured at.
    pub ladder: InverseTemperatureLadder,
    /// Measured acceptance per adjacent pair.
    pub acceptance: Vec<f64>,
}

/// Append-only log of measured ladders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptimizationHistory {
    records: Vec<OptimizationRecord>,
}

impl OptimizationHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a measurement; the iteration index is assigned here.
    pub fn push(&mut self, ladder: InverseTemperatureLadder, acceptance: Vec<f64>) {
        let iteration = self.records.len();
        self.records.push(OptimizationRecord {
            iteration,
            ladder,
            acceptance,
        });
    }

    /// Records in iteration order.
    pub fn records(&self) -> &[OptimizationRecord] {
        &self.records
    }

    /// Most recent record.
    pub fn last(&self) -> Option<&OptimizationRecord> {
        self.records.last()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl WeightPolicy {
    /// Normalized weight of every record.
    ///
    /// Falls back to keeping only the last record when the raw weights do
    /// not sum to a positive number.
    pub fn weights(&self, history: &OptimizationHistory) -> Vec<f64> {
        let records = history.records();
        if records.is_empty() {
            return Vec::new();
        }
        let raw: Vec<f64> = match self {
            WeightPolicy::OnlyLast => return only_last(records.len()),
            WeightPolicy::WorstAcceptance => records
                .iter()
                .map(|record| record.acceptance.iter().copied().fold(f64::INFINITY, f64::min))
                .collect(),
            WeightPolicy::IndependentAcceptance => records
                .iter()
                .map(|record| {
                    let sigma_squared: f64 =
                        record.acceptance.iter().map(|a| 1.0 / (a * a)).sum();
                    1.0 / sigma_squared.sqrt()
                })
                .collect(),
        };

        let sum: f64 = raw.iter().sum();
        if !(sum > 0.0 && sum.is_finite()) || raw.iter().any(|w| !w.is_finite()) {
            log::debug!("degenerate {self:?} weights {raw:?}; keeping the last ladder");
            return only_last(records.len());
        }
        raw.into_iter().map(|w| w / sum).collect()
    }
}

fn only_last(len: usize) -> Vec<f64> {
    let mut weights = vec![0.0; len];
    weights[len - 1] = 1.0;
    weights
}

/// Weighted average of every recorded ladder.
pub fn weighted_ladder(
    history: &OptimizationHistory,
    policy: WeightPolicy,
) -> Result<InverseTemperatureLadder, McError> {
    let Some(first) = history.records().first() else {
        return Err(McError::Ladder(ErrorInfo::new(
            "empty-history",
            "no ladder has been measured yet",
        )));
    };
    let mut betas = vec![0.0; first.ladder.len()];
    for (record, weight) in history.records().iter().zip(policy.weights(history)) {
        for (beta, value) in betas.iter_mut().zip(record.ladder.iter()) {
            *beta += weight * value;
        }
    }
    // Every recorded ladder shares its endpoints; pin them against rounding drift.
    let last = betas.len() - 1;
    betas[0] = first.ladder[0];
    betas[last] = first.ladder[last];
    InverseTemperatureLadder::new(betas)
}

/// Result of a ladder optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    /// Ladder updates completed.
    pub iterations: usize,
    /// Ladder installed on the ensemble.
    pub ladder: InverseTemperatureLadder,
    /// Every measured ladder with its acceptance.
    pub history: OptimizationHistory,
    /// Whether the optimization stopped on a termination request.
    pub terminated: bool,
}

impl<C: Configuration> ParallelTempering<C> {
    /// Tunes the ladder and installs the weighted result.
    ///
    /// Measurement windows run with `measurement_number = 1` and no
    /// relaxation; the caller's parameters are restored before returning,
    /// including on error.
    pub fn optimize_inverse_temperatures(
        &mut self,
        config: &OptimizationConfig,
    ) -> Result<OptimizationOutcome, McError> {
        config.validate()?;
        let original = self.parameters().clone();
        self.set_parameters(TemperingParameters {
            measurement_number: 1,
            relaxation_steps: 0,
            ..original.clone()
        })?;
        let result = self.run_optimization(config);
        if let Err(err) = &result {
            log::warn!("ladder optimization failed with a {} error: {}", err.family(), err.info());
        }
        self.set_parameters(original)?;
        result
    }

    fn run_optimization(
        &mut self,
        config: &OptimizationConfig,
    ) -> Result<OptimizationOutcome, McError> {
        log::info!(
            "optimizing {} rungs with {:?} over {} iterations",
            self.ladder().len(),
            config.algorithm,
            config.iterations
        );
        let mut history = OptimizationHistory::new();
        let mut iterations = 0;
        let mut terminated = false;

        for iteration in 0..config.iterations {
            let Some((acceptance, updated)) = self.optimization_step(config)? else {
                terminated = true;
                break;
            };
            log::info!(
                "optimization iteration {iteration}: acceptance {acceptance:?} -> ladder {:?}",
                updated.as_slice()
            );
            history.push(self.ladder().clone(), acceptance);
            self.set_ladder(updated)?;
            iterations += 1;
        }

        if !terminated {
            self.reset_exchange_log();
            match self.measure_acceptance(config.max_measurement_rounds)? {
                Some(acceptance) => history.push(self.ladder().clone(), acceptance),
                None => terminated = true,
            }
        }
        if terminated {
            log::warn!("ladder optimization terminated after {iterations} iterations");
        }

        let ladder = if history.is_empty() {
            self.ladder().clone()
        } else {
            weighted_ladder(&history, config.weight_policy)?
        };
        self.set_ladder(ladder.clone())?;
        log::info!("optimized ladder {:?}", ladder.as_slice());
        Ok(OptimizationOutcome {
            iterations,
            ladder,
            history,
            terminated,
        })
    }

    /// Measures the current ladder and derives the next one; `None` on termination.
    fn optimization_step(
        &mut self,
        config: &OptimizationConfig,
    ) -> Result<Option<(Vec<f64>, InverseTemperatureLadder)>, McError> {
        self.reset_exchange_log();
        match &config.algorithm {
            OptimizationAlgorithm::Berg => {
                let Some(acceptance) = self.measure_acceptance(config.max_measurement_rounds)?
                else {
                    return Ok(None);
                };
                let updated = ladder::berg_update(self.ladder(), &acceptance)?;
                Ok(Some((acceptance, updated)))
            }
            OptimizationAlgorithm::Katzgraber {
                max_derivative_retries,
            } => {
                let Some(derivative) = self.measure_flow_derivative(*max_derivative_retries)? else {
                    return Ok(None);
                };
                let Some(acceptance) = self.measure_acceptance(config.max_measurement_rounds)?
                else {
                    return Ok(None);
                };
                let updated = ladder::katzgraber_update(self.ladder(), &derivative)?;
                Ok(Some((acceptance, updated)))
            }
        }
    }

    /// Runs windows until every pair has an accepted exchange.
    ///
    /// Counts accumulate across windows. Returns `None` on termination.
    fn measure_acceptance(&mut self, max_rounds: usize) -> Result<Option<Vec<f64>>, McError> {
        let mut rounds = 0;
        while !self.exchange_log().all_pairs_executed() {
            if rounds == max_rounds {
                return Err(McError::Ladder(
                    ErrorInfo::new(
                        "exchange-starvation",
                        "an adjacent pair never accepted an exchange",
                    )
                    .with_context("rounds", rounds.to_string())
                    .with_context("executed", format!("{:?}", self.exchange_log().executed()))
                    .with_hint("add rungs or lengthen steps_between_measurement"),
                ));
            }
            if self.run_protocol(|_| Ok(()))?.terminated {
                return Ok(None);
            }
            rounds += 1;
        }
        log::debug!("acceptance measured after {rounds} windows");
        Ok(Some(self.exchange_log().acceptance()))
    }

    /// Runs windows until the replica-flow derivative is non-negative on
    /// every rung. Returns `None` on termination.
    fn measure_flow_derivative(&mut self, max_retries: usize) -> Result<Option<Vec<f64>>, McError> {
        self.reset_direction_histogram();
        let mut retries = 0;
        loop {
            if self.run_protocol(|_| Ok(()))?.terminated {
                return Ok(None);
            }
            let flow = self.direction_histogram().flow_fraction();
            let derivative = ladder::ladder_derivative(self.ladder(), &flow);
            if ladder::derivative_is_admissible(&derivative) {
                return Ok(Some(derivative));
            }
            if retries == max_retries {
                return Err(McError::Ladder(
                    ErrorInfo::new(
                        "derivative-retries-exhausted",
                        "replica-flow derivative stayed negative or undefined",
                    )
                    .with_context("retries", retries.to_string())
                    .with_context("derivative", format!("{derivative:?}")),
                ));
            }
            retries += 1;
            log::debug!("flow derivative not admissible ({derivative:?}); rerunning");
        }
    }
}
