use mcs_core::errors::ErrorInfo;
use mcs_core::{CancellationToken, Configuration, McError, RngHandle, Step};
use serde::{Deserialize, Serialize};

use crate::config::StepAlgorithm;

/// Acceptance rule and bookkeeping callbacks plugged into [`Simulation::do_steps`].
///
/// `time` is `1.0` for every step of the standard algorithm. The
/// rejection-free algorithm reports the continuous time the configuration
/// spent before the step fired (or the remainder of the requested interval
/// for the final tick).
pub trait StepHandler<C: Configuration> {
    /// Unnormalized acceptance probability of a step; values above one are capped.
    fn acceptance_probability(&mut self, step: &C::Step) -> f64;

    /// Called after `step` has been committed.
    fn handle_executed_step(&mut self, step: &C::Step, time: f64);

    /// Called when `step` was proposed but not committed.
    fn handle_rejected_step(&mut self, step: &C::Step, time: f64);
}

/// Accept/reject counters of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepCounters {
    /// Committed steps.
    pub executed: u64,
    /// Rejected steps.
    pub rejected: u64,
    /// Rejection-free ticks whose total rate underflowed to zero.
    pub degenerate: u64,
}

/// Owns one configuration and its random stream and executes elementary steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation<C> {
    configuration: C,
    rng: RngHandle,
    algorithm: StepAlgorithm,
    counters: StepCounters,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl<C: Configuration> Simulation<C> {
    /// Creates a simulation seeded from `seed`.
    pub fn new(configuration: C, seed: u64, algorithm: StepAlgorithm) -> Self {
        Self {
            configuration,
            rng: RngHandle::from_seed(seed),
            algorithm,
            counters: StepCounters::default(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Current configuration.
    pub fn configuration(&self) -> &C {
        &self.configuration
    }

    /// Mutable access to the configuration.
    pub fn configuration_mut(&mut self) -> &mut C {
        &mut self.configuration
    }

    /// Consumes the simulation and returns its configuration.
    pub fn into_configuration(self) -> C {
        self.configuration
    }

    /// Random stream driving the simulation.
    pub fn rng_mut(&mut self) -> &mut RngHandle {
        &mut self.rng
    }

    /// Algorithm used by [`Simulation::do_steps`].
    pub fn algorithm(&self) -> StepAlgorithm {
        self.algorithm
    }

    /// Accept/reject counters accumulated so far.
    pub fn counters(&self) -> StepCounters {
        self.counters
    }

    /// Token polled by the drivers built on this simulation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replaces the cancellation token.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    /// Performs `number` steps with the configured algorithm.
    ///
    /// For the rejection-free algorithm `number` is the amount of continuous
    /// simulation time to advance.
    pub fn do_steps<H>(&mut self, number: u64, handler: &mut H) -> Result<(), McError>
    where
        H: StepHandler<C>,
    {
        match self.algorithm {
            StepAlgorithm::Standard => {
                self.do_standard_steps(number, handler);
                Ok(())
            }
            StepAlgorithm::RejectionFree => self.do_rejection_free_steps(number as f64, handler),
        }
    }

    fn do_standard_steps<H>(&mut self, number: u64, handler: &mut H)
    where
        H: StepHandler<C>,
    {
        for _ in 0..number {
            let step = self.configuration.propose_step(&mut self.rng);
            if !step.is_executable() {
                self.reject(&step, 1.0, handler);
                continue;
            }
            let acceptance =
                handler.acceptance_probability(&step) / step.selection_probability_factor();
            if acceptance > 0.0 && (acceptance >= 1.0 || self.rng.uniform() < acceptance) {
                self.execute(&step, 1.0, handler);
            } else {
                self.reject(&step, 1.0, handler);
            }
        }
    }

    fn do_rejection_free_steps<H>(&mut self, time: f64, handler: &mut H) -> Result<(), McError>
    where
        H: StepHandler<C>,
    {
        let mut remaining = time;
        while remaining > 0.0 {
            let steps = self.configuration.all_steps();
            if steps.is_empty() {
                return Err(McError::Config(
                    ErrorInfo::new(
                        "no-enumerated-steps",
                        "configuration enumerated no steps for the rejection-free algorithm",
                    )
                    .with_hint("implement Configuration::all_steps or use the standard algorithm"),
                ));
            }

            let mut cumulative = Vec::with_capacity(steps.len());
            let mut total = 0.0;
            for step in &steps {
                if step.is_executable() {
                    let rate = handler.acceptance_probability(step)
                        / step.selection_probability_factor();
                    if rate > 0.0 {
                        total += rate.min(1.0);
                    }
                }
                cumulative.push(total);
            }

            let target = self.rng.uniform() * total;
            let index = cumulative
                .partition_point(|&sum| sum <= target)
                .min(steps.len() - 1);
            let step = &steps[index];

            let tick = 1.0 / total;
            if !tick.is_finite() {
                log::debug!(
                    "rejection-free tick degenerate (total rate {total}); counting as rejection"
                );
                self.counters.degenerate += 1;
                self.reject(step, 1.0, handler);
                remaining -= 1.0;
                continue;
            }

            if remaining - tick > 0.0 {
                self.execute(step, tick, handler);
                remaining -= tick;
            } else {
                if self.rng.uniform() < remaining / tick {
                    self.execute(step, remaining, handler);
                } else {
                    self.reject(step, remaining, handler);
                }
                break;
            }
        }
        Ok(())
    }

    fn execute<H>(&mut self, step: &C::Step, time: f64, handler: &mut H)
    where
        H: StepHandler<C>,
    {
        if let Some(created_at) = step.created_at() {
            let now = self.configuration.simulation_time();
            if created_at != now {
                log::warn!(
                    "committing step created at time {created_at} against configuration at time {now}"
                );
            }
        }
        self.configuration.commit(step);
        self.counters.executed += 1;
        handler.handle_executed_step(step, time);
    }

    fn reject<H>(&mut self, step: &C::Step, time: f64, handler: &mut H)
    where
        H: StepHandler<C>,
    {
        self.counters.rejected += 1;
        handler.handle_rejected_step(step, time);
    }
}
