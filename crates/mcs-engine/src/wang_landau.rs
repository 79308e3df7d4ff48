use std::fmt;

use mcs_core::{CancellationToken, Configuration, McError, Step};
use serde::{Deserialize, Serialize};

use crate::config::{EnergyBinning, StepAlgorithm, WangLandauParameters};
use crate::histogram::Histogram;
use crate::simulation::{Simulation, StepHandler};

/// Callback receiving the engine at a Wang-Landau event.
pub type WangLandauHook<C> = Box<dyn FnMut(&WangLandau<C>)>;

#[derive(Debug, Clone, Copy)]
enum HookKind {
    Sweep,
    Refinement,
    Status,
    Histograms,
}

/// Result of a complete Wang-Landau simulation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WangLandauOutcome {
    /// Modification factor refinements performed.
    pub refinements: u64,
    /// Sweeps performed over the lifetime of the engine.
    pub sweeps: u64,
    /// Modification factor when the run stopped.
    pub modification_factor: f64,
    /// Whether the run stopped on a termination request.
    pub terminated: bool,
}

/// Acceptance `min(1, g(E_old) / g(E_new))` that books every step into the
/// `log g` and incidence histograms.
///
/// The standard algorithm books the energy the walker ends up in. The
/// rejection-free algorithm reports the time spent before a step fires, so
/// that time is booked to the energy the walker leaves.
pub(crate) struct FlatHistogramRule<'a> {
    pub(crate) log_density_of_states: &'a mut Histogram,
    pub(crate) incidence_counter: &'a mut Histogram,
    pub(crate) binning: EnergyBinning,
    pub(crate) cutoff_lower: Option<f64>,
    pub(crate) cutoff_upper: Option<f64>,
    pub(crate) modification_factor: f64,
    pub(crate) algorithm: StepAlgorithm,
    pub(crate) energy: f64,
}

impl FlatHistogramRule<'_> {
    fn visit(&mut self, energy: f64, time: f64) {
        let bin = self.binning.bin(energy);
        self.log_density_of_states
            .add_from_minimum(bin, self.modification_factor * time);
        self.incidence_counter.add(bin, time);
    }

    fn outside_cutoff(&self, energy: f64) -> bool {
        self.cutoff_lower.map_or(false, |lower| energy < lower)
            || self.cutoff_upper.map_or(false, |upper| energy > upper)
    }
}

impl<C: Configuration> StepHandler<C> for FlatHistogramRule<'_> {
    fn acceptance_probability(&mut self, step: &C::Step) -> f64 {
        let target = self.energy + step.delta_e();
        if self.outside_cutoff(target) {
            return 0.0;
        }
        let floor = self.log_density_of_states.min_value().unwrap_or(0.0);
        let current = self
            .log_density_of_states
            .get(self.binning.bin(self.energy))
            .unwrap_or(floor);
        let proposed = self
            .log_density_of_states
            .get(self.binning.bin(target))
            .unwrap_or(floor);
        (current - proposed).exp()
    }

    fn handle_executed_step(&mut self, step: &C::Step, time: f64) {
        match self.algorithm {
            StepAlgorithm::Standard => {
                self.energy += step.delta_e();
                self.visit(self.energy, time);
            }
            StepAlgorithm::RejectionFree => {
                self.visit(self.energy, time);
                self.energy += step.delta_e();
            }
        }
    }

    fn handle_rejected_step(&mut self, _step: &C::Step, time: f64) {
        self.visit(self.energy, time);
    }
}

/// Flat-histogram estimator of the density of states.
///
/// Every attempted step adds the current modification factor to `log g` of
/// the energy the walker ends up in and counts the visit. Rejection-free
/// steps instead book their residence time to the energy being left. Once
/// the visit histogram is flat the counts are reset, `log g` is normalized
/// so that its lowest-energy bin is zero and the modification factor
/// shrinks. The run is converged when the factor reaches its final value.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: Deserialize<'de>"))]
pub struct WangLandau<C> {
    simulation: Simulation<C>,
    parameters: WangLandauParameters,
    modification_factor: f64,
    log_density_of_states: Histogram,
    incidence_counter: Histogram,
    sweep_counter: u64,
    #[serde(skip)]
    sweep_hook: Option<WangLandauHook<C>>,
    #[serde(skip)]
    refinement_hook: Option<WangLandauHook<C>>,
    #[serde(skip)]
    status_hook: Option<WangLandauHook<C>>,
    #[serde(skip)]
    histograms_hook: Option<WangLandauHook<C>>,
}

impl<C> fmt::Debug for WangLandau<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WangLandau")
            .field("parameters", &self.parameters)
            .field("modification_factor", &self.modification_factor)
            .field("sweep_counter", &self.sweep_counter)
            .field("bins", &self.log_density_of_states.len())
            .finish_non_exhaustive()
    }
}

impl<C: Configuration> WangLandau<C> {
    /// Creates an estimator owning `configuration`, seeded from `seed`.
    pub fn new(
        configuration: C,
        parameters: WangLandauParameters,
        seed: u64,
    ) -> Result<Self, McError> {
        parameters.validate()?;
        Ok(Self {
            simulation: Simulation::new(configuration, seed, parameters.algorithm),
            modification_factor: parameters.modification_factor_initial,
            parameters,
            log_density_of_states: Histogram::new(),
            incidence_counter: Histogram::new(),
            sweep_counter: 0,
            sweep_hook: None,
            refinement_hook: None,
            status_hook: None,
            histograms_hook: None,
        })
    }

    /// Underlying step engine.
    pub fn simulation(&self) -> &Simulation<C> {
        &self.simulation
    }

    /// Current configuration.
    pub fn configuration(&self) -> &C {
        self.simulation.configuration()
    }

    /// Active parameters.
    pub fn parameters(&self) -> &WangLandauParameters {
        &self.parameters
    }

    /// Current modification factor.
    pub fn modification_factor(&self) -> f64 {
        self.modification_factor
    }

    /// Estimate of `log g` per energy bin.
    pub fn log_density_of_states(&self) -> &Histogram {
        &self.log_density_of_states
    }

    /// Visits per energy bin since the last refinement.
    pub fn incidence_counter(&self) -> &Histogram {
        &self.incidence_counter
    }

    /// Flatness of the incidence counter.
    pub fn flatness(&self) -> f64 {
        self.incidence_counter.flatness()
    }

    /// Sweeps performed so far.
    pub fn sweep_counter(&self) -> u64 {
        self.sweep_counter
    }

    /// Consumes the estimator, returning its configuration and `log g`.
    pub fn into_parts(self) -> (C, Histogram) {
        (self.simulation.into_configuration(), self.log_density_of_states)
    }

    /// `(energy, log g)` pairs in ascending energy order.
    pub fn log_density_of_states_by_energy(&self) -> Vec<(f64, f64)> {
        let binning = self.parameters.binning;
        self.log_density_of_states
            .iter()
            .map(|(bin, value)| (binning.energy(bin), value))
            .collect()
    }

    /// Shares a cancellation token with the engine.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.simulation.set_cancellation(token);
    }

    /// Installs a callback run before every sweep.
    pub fn on_sweep(&mut self, hook: impl FnMut(&WangLandau<C>) + 'static) {
        self.sweep_hook = Some(Box::new(hook));
    }

    /// Installs a callback run whenever the modification factor is refined.
    pub fn on_refinement(&mut self, hook: impl FnMut(&WangLandau<C>) + 'static) {
        self.refinement_hook = Some(Box::new(hook));
    }

    /// Installs the callback run on a dump-status request.
    pub fn on_status(&mut self, hook: impl FnMut(&WangLandau<C>) + 'static) {
        self.status_hook = Some(Box::new(hook));
    }

    /// Installs the callback run on a dump-histograms request.
    pub fn on_dump_histograms(&mut self, hook: impl FnMut(&WangLandau<C>) + 'static) {
        self.histograms_hook = Some(Box::new(hook));
    }

    /// Performs `number` Wang-Landau steps at the current modification factor.
    pub fn do_wang_landau_steps(&mut self, number: u64) -> Result<(), McError> {
        let energy = self.simulation.configuration().energy();
        let mut rule = FlatHistogramRule {
            log_density_of_states: &mut self.log_density_of_states,
            incidence_counter: &mut self.incidence_counter,
            binning: self.parameters.binning,
            cutoff_lower: self.parameters.energy_cutoff_lower,
            cutoff_upper: self.parameters.energy_cutoff_upper,
            modification_factor: self.modification_factor,
            algorithm: self.parameters.algorithm,
            energy,
        };
        self.simulation.do_steps(number, &mut rule)
    }

    /// Sweeps until the incidence counter is flat.
    ///
    /// Returns `true` if the loop stopped on a termination request instead.
    pub fn do_wang_landau_steps_until_flat(&mut self) -> Result<bool, McError> {
        while self.flatness() < self.parameters.flatness {
            if self.check_signals() {
                return Ok(true);
            }
            self.fire(HookKind::Sweep);
            self.do_wang_landau_steps(self.parameters.sweep_steps)?;
            self.sweep_counter += 1;
        }
        Ok(false)
    }

    /// Refines the modification factor until it reaches its final value.
    pub fn do_wang_landau_simulation(&mut self) -> Result<WangLandauOutcome, McError> {
        log::info!(
            "wang-landau run: modification factor {} -> {} (x{}), flatness {}",
            self.modification_factor,
            self.parameters.modification_factor_final,
            self.parameters.modification_factor_multiplier,
            self.parameters.flatness
        );
        let mut outcome = WangLandauOutcome::default();
        while self.modification_factor > self.parameters.modification_factor_final {
            if self.do_wang_landau_steps_until_flat()? {
                log::warn!(
                    "wang-landau run terminated at modification factor {}",
                    self.modification_factor
                );
                outcome.terminated = true;
                break;
            }
            self.fire(HookKind::Refinement);

            self.incidence_counter.reset_values();
            self.log_density_of_states.shift_lowest_bin_to_zero();
            self.modification_factor *= self.parameters.modification_factor_multiplier;
            outcome.refinements += 1;
            log::debug!(
                "refined modification factor to {} after {} sweeps",
                self.modification_factor,
                self.sweep_counter
            );
        }
        outcome.sweeps = self.sweep_counter;
        outcome.modification_factor = self.modification_factor;
        log::info!(
            "wang-landau run finished: {} refinements, {} sweeps",
            outcome.refinements,
            outcome.sweeps
        );
        Ok(outcome)
    }

    /// Services pending signals and reports whether termination was requested.
    pub fn check_signals(&mut self) -> bool {
        let poll = self.simulation.cancellation().poll();
        if poll.dump_status {
            if self.status_hook.is_some() {
                self.fire(HookKind::Status);
            } else {
                log::info!(
                    "wang-landau status: sweeps={} modification_factor={} flatness={:.4}",
                    self.sweep_counter,
                    self.modification_factor,
                    self.flatness()
                );
            }
        }
        if poll.dump_histograms {
            if self.histograms_hook.is_some() {
                self.fire(HookKind::Histograms);
            } else {
                for (energy, log_g) in self.log_density_of_states_by_energy() {
                    let visits = self
                        .incidence_counter
                        .get(self.parameters.binning.bin(energy))
                        .unwrap_or(0.0);
                    log::info!("E={energy} log_g={log_g:.6} visits={visits}");
                }
            }
        }
        poll.terminate
    }

    fn hook_slot(&mut self, kind: HookKind) -> &mut Option<WangLandauHook<C>> {
        match kind {
            HookKind::Sweep => &mut self.sweep_hook,
            HookKind::Refinement => &mut self.refinement_hook,
            HookKind::Status => &mut self.status_hook,
            HookKind::Histograms => &mut self.histograms_hook,
        }
    }

    fn fire(&mut self, kind: HookKind) {
        if let Some(mut hook) = self.hook_slot(kind).take() {
            hook(self);
            *self.hook_slot(kind) = Some(hook);
        }
    }
}
