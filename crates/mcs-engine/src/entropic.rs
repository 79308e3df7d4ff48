use std::fmt;

use mcs_core::{CancellationToken, Configuration, McError};
use serde::{Deserialize, Serialize};

use crate::config::EntropicSamplingParameters;
use crate::histogram::Histogram;
use crate::metropolis::StatusHook;
use crate::simulation::Simulation;
use crate::wang_landau::{FlatHistogramRule, WangLandau};

/// Result of an entropic sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntropicSamplingOutcome {
    /// Sweeps performed over the lifetime of the engine.
    pub sweeps: u64,
    /// Flatness of the last completed sweep.
    pub flatness: f64,
    /// Whether the run stopped on a termination request.
    pub terminated: bool,
}

/// Multicanonical sampler driven by a fixed `log g` estimate.
///
/// A sweep samples with acceptance `min(1, g(E_old) / g(E_new))` and leaves
/// `log g` untouched. Afterwards `log g` of every visited bin grows by the
/// logarithm of its visit count, the counts are cleared and `log g` is
/// shifted so its lowest-energy bin is zero. The run ends after the first
/// sweep whose visits were flat.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: Deserialize<'de>"))]
pub struct EntropicSampling<C> {
    simulation: Simulation<C>,
    parameters: EntropicSamplingParameters,
    log_density_of_states: Histogram,
    incidence_counter: Histogram,
    sweep_counter: u64,
    flatness_current: f64,
    #[serde(skip)]
    sweep_hook: Option<StatusHook<EntropicSampling<C>>>,
    #[serde(skip)]
    status_hook: Option<StatusHook<EntropicSampling<C>>>,
}

impl<C> fmt::Debug for EntropicSampling<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntropicSampling")
            .field("parameters", &self.parameters)
            .field("sweep_counter", &self.sweep_counter)
            .field("flatness_current", &self.flatness_current)
            .field("bins", &self.log_density_of_states.len())
            .finish_non_exhaustive()
    }
}

impl<C: Configuration> EntropicSampling<C> {
    /// Creates a sampler with an empty `log g`, seeded from `seed`.
    pub fn new(
        configuration: C,
        parameters: EntropicSamplingParameters,
        seed: u64,
    ) -> Result<Self, McError> {
        parameters.validate()?;
        Ok(Self {
            simulation: Simulation::new(configuration, seed, parameters.algorithm),
            parameters,
            log_density_of_states: Histogram::new(),
            incidence_counter: Histogram::new(),
            sweep_counter: 0,
            flatness_current: 0.0,
            sweep_hook: None,
            status_hook: None,
        })
    }

    /// Continues from a Wang-Landau estimate, taking over its configuration
    /// and `log g`.
    ///
    /// Both engines must bin energies the same way for the estimate to carry over.
    pub fn from_wang_landau(
        estimator: WangLandau<C>,
        parameters: EntropicSamplingParameters,
        seed: u64,
    ) -> Result<Self, McError> {
        let (configuration, log_density_of_states) = estimator.into_parts();
        let mut sampler = Self::new(configuration, parameters, seed)?;
        sampler.log_density_of_states = log_density_of_states;
        Ok(sampler)
    }

    /// Current configuration.
    pub fn configuration(&self) -> &C {
        self.simulation.configuration()
    }

    /// Active parameters.
    pub fn parameters(&self) -> &EntropicSamplingParameters {
        &self.parameters
    }

    /// Current `log g` estimate.
    pub fn log_density_of_states(&self) -> &Histogram {
        &self.log_density_of_states
    }

    /// Replaces the `log g` estimate.
    pub fn set_log_density_of_states(&mut self, log_density_of_states: Histogram) {
        self.log_density_of_states = log_density_of_states;
    }

    /// Visits collected since the last sweep ended.
    pub fn incidence_counter(&self) -> &Histogram {
        &self.incidence_counter
    }

    /// Flatness of the last completed sweep.
    pub fn flatness(&self) -> f64 {
        self.flatness_current
    }

    /// Sweeps performed so far.
    pub fn sweep_counter(&self) -> u64 {
        self.sweep_counter
    }

    /// `(energy, log g)` pairs in ascending energy order.
    pub fn log_density_of_states_by_energy(&self) -> Vec<(f64, f64)> {
        let binning = self.parameters.binning;
        self.log_density_of_states
            .iter()
            .map(|(bin, value)| (binning.energy(bin), value))
            .collect()
    }

    /// Shares a cancellation token with the sampler.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.simulation.set_cancellation(token);
    }

    /// Installs a callback run after every sweep.
    pub fn on_sweep(&mut self, hook: impl FnMut(&EntropicSampling<C>) + 'static) {
        self.sweep_hook = Some(Box::new(hook));
    }

    /// Installs the callback run on a dump-status request.
    pub fn on_status(&mut self, hook: impl FnMut(&EntropicSampling<C>) + 'static) {
        self.status_hook = Some(Box::new(hook));
    }

    /// Performs `number` steps at the fixed `log g`, counting visits.
    pub fn do_entropic_sampling_steps(&mut self, number: u64) -> Result<(), McError> {
        let energy = self.simulation.configuration().energy();
        let mut rule = FlatHistogramRule {
            log_density_of_states: &mut self.log_density_of_states,
            incidence_counter: &mut self.incidence_counter,
            binning: self.parameters.binning,
            cutoff_lower: self.parameters.energy_cutoff_lower,
            cutoff_upper: self.parameters.energy_cutoff_upper,
            modification_factor: 0.0,
            algorithm: self.parameters.algorithm,
            energy,
        };
        self.simulation.do_steps(number, &mut rule)
    }

    /// Sweeps until one sweep's visits are flat.
    pub fn do_entropic_sampling_simulation(
        &mut self,
    ) -> Result<EntropicSamplingOutcome, McError> {
        log::info!(
            "entropic sampling run: {} steps per sweep, flatness {}",
            self.parameters.sweep_steps,
            self.parameters.flatness
        );
        let mut outcome = EntropicSamplingOutcome::default();
        if self.simulation.cancellation().is_terminated() {
            outcome.terminated = true;
            outcome.sweeps = self.sweep_counter;
            return Ok(outcome);
        }
        loop {
            self.do_entropic_sampling_steps(self.parameters.sweep_steps)?;
            self.sweep_counter += 1;
            for (bin, visits) in self.incidence_counter.iter() {
                if visits > 0.0 {
                    self.log_density_of_states.add(bin, visits.ln());
                }
            }
            self.flatness_current = self.incidence_counter.flatness();
            log::debug!(
                "sweep {}: flatness {:.4}",
                self.sweep_counter,
                self.flatness_current
            );

            if self.check_signals() {
                log::warn!(
                    "entropic sampling terminated after {} sweeps",
                    self.sweep_counter
                );
                outcome.terminated = true;
                break;
            }
            if let Some(mut hook) = self.sweep_hook.take() {
                hook(self);
                self.sweep_hook = Some(hook);
            }

            self.incidence_counter.reset_values();
            self.log_density_of_states.shift_lowest_bin_to_zero();
            if self.flatness_current >= self.parameters.flatness {
                break;
            }
        }
        outcome.sweeps = self.sweep_counter;
        outcome.flatness = self.flatness_current;
        log::info!(
            "entropic sampling finished after {} sweeps at flatness {:.4}",
            outcome.sweeps,
            outcome.flatness
        );
        Ok(outcome)
    }

    /// Services pending signals and reports whether termination was requested.
    pub fn check_signals(&mut self) -> bool {
        let poll = self.simulation.cancellation().poll();
        if poll.dump_status {
            if let Some(mut hook) = self.status_hook.take() {
                hook(self);
                self.status_hook = Some(hook);
            } else {
                log::info!(
                    "entropic sampling status: sweeps={} flatness={:.4}",
                    self.sweep_counter,
                    self.flatness_current
                );
            }
        }
        if poll.dump_histograms {
            for (energy, log_g) in self.log_density_of_states_by_energy() {
                let visits = self
                    .incidence_counter
                    .get(self.parameters.binning.bin(energy))
                    .unwrap_or(0.0);
                log::info!("E={energy} log_g={log_g:.6} visits={visits}");
            }
        }
        poll.terminate
    }
}
