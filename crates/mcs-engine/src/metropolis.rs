use std::fmt;

use mcs_core::{Accumulator, CancellationToken, Configuration, McError, Observable, Step};
use serde::{Deserialize, Serialize};

use crate::config::MetropolisParameters;
use crate::simulation::{Simulation, StepHandler};

/// Boltzmann acceptance `exp(-beta * delta_e)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boltzmann {
    beta: f64,
}

impl Boltzmann {
    /// Creates the rule for inverse temperature `beta`.
    pub fn new(beta: f64) -> Self {
        Self { beta }
    }

    /// Inverse temperature of the rule.
    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl<C: Configuration> StepHandler<C> for Boltzmann {
    fn acceptance_probability(&mut self, step: &C::Step) -> f64 {
        (-self.beta * step.delta_e()).exp()
    }

    fn handle_executed_step(&mut self, _step: &C::Step, _time: f64) {}

    fn handle_rejected_step(&mut self, _step: &C::Step, _time: f64) {}
}

/// Wraps an arbitrary acceptance function of the proposed step.
pub struct AcceptanceRule<F>(pub F);

impl<C, F> StepHandler<C> for AcceptanceRule<F>
where
    C: Configuration,
    F: FnMut(&C::Step) -> f64,
{
    fn acceptance_probability(&mut self, step: &C::Step) -> f64 {
        (self.0)(step)
    }

    fn handle_executed_step(&mut self, _step: &C::Step, _time: f64) {}

    fn handle_rejected_step(&mut self, _step: &C::Step, _time: f64) {}
}

/// Result of a relaxation + measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetropolisOutcome {
    /// Measurement windows completed and recorded.
    pub measurements: u64,
    /// Whether the run stopped on a termination request.
    pub terminated: bool,
}

/// Callback invoked with the engine when a status dump is requested.
pub type StatusHook<E> = Box<dyn FnMut(&E)>;

/// Canonical-ensemble sampler.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: Deserialize<'de>"))]
pub struct Metropolis<C> {
    simulation: Simulation<C>,
    parameters: MetropolisParameters,
    measurements: u64,
    #[serde(skip)]
    status_hook: Option<StatusHook<Metropolis<C>>>,
}

impl<C> fmt::Debug for Metropolis<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metropolis")
            .field("parameters", &self.parameters)
            .field("measurements", &self.measurements)
            .finish_non_exhaustive()
    }
}

impl<C: Configuration> Metropolis<C> {
    /// Creates a sampler owning `configuration`, seeded from `seed`.
    pub fn new(
        configuration: C,
        parameters: MetropolisParameters,
        seed: u64,
    ) -> Result<Self, McError> {
        parameters.validate()?;
        Ok(Self {
            simulation: Simulation::new(configuration, seed, parameters.algorithm),
            parameters,
            measurements: 0,
            status_hook: None,
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
    pub fn parameters(&self) -> &MetropolisParameters {
        &self.parameters
    }

    /// Measurements recorded over the lifetime of the sampler.
    pub fn measurements(&self) -> u64 {
        self.measurements
    }

    /// Shares a cancellation token with the sampler.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.simulation.set_cancellation(token);
    }

    /// Installs the callback run on a dump-status request.
    pub fn on_status(&mut self, hook: impl FnMut(&Metropolis<C>) + 'static) {
        self.status_hook = Some(Box::new(hook));
    }

    /// Performs `number` Boltzmann steps at inverse temperature `beta`.
    pub fn do_metropolis_steps(&mut self, number: u64, beta: f64) -> Result<(), McError> {
        self.simulation.do_steps(number, &mut Boltzmann::new(beta))
    }

    /// Performs `number` steps under a custom acceptance rule.
    pub fn do_steps_with<H: StepHandler<C>>(
        &mut self,
        number: u64,
        handler: &mut H,
    ) -> Result<(), McError> {
        self.simulation.do_steps(number, handler)
    }

    /// Relaxes, then records one observable value per measurement window.
    pub fn do_metropolis_simulation<O, A>(
        &mut self,
        beta: f64,
        observable: &O,
        accumulator: &mut A,
    ) -> Result<MetropolisOutcome, McError>
    where
        O: Observable<C>,
        A: Accumulator<O::Value>,
    {
        self.do_simulation_with(&mut Boltzmann::new(beta), observable, accumulator)
    }

    /// Same protocol as [`Metropolis::do_metropolis_simulation`] with an
    /// arbitrary acceptance rule.
    pub fn do_simulation_with<H, O, A>(
        &mut self,
        handler: &mut H,
        observable: &O,
        accumulator: &mut A,
    ) -> Result<MetropolisOutcome, McError>
    where
        H: StepHandler<C>,
        O: Observable<C>,
        A: Accumulator<O::Value>,
    {
        let mut outcome = MetropolisOutcome::default();
        if self.simulation.cancellation().is_terminated() {
            outcome.terminated = true;
            return Ok(outcome);
        }
        log::debug!(
            "metropolis run: {} relaxation steps, {} x {} measurement steps",
            self.parameters.relaxation_steps,
            self.parameters.measurement_number,
            self.parameters.steps_between_measurement
        );

        self.simulation.do_steps(self.parameters.relaxation_steps, handler)?;
        for _ in 0..self.parameters.measurement_number {
            self.simulation
                .do_steps(self.parameters.steps_between_measurement, handler)?;
            accumulator.accumulate(observable.observe(self.simulation.configuration()))?;
            self.measurements += 1;
            outcome.measurements += 1;

            if self.check_signals() {
                log::warn!(
                    "metropolis run terminated after {} measurements",
                    outcome.measurements
                );
                outcome.terminated = true;
                break;
            }
        }
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
                let counters = self.simulation.counters();
                log::info!(
                    "metropolis status: measurements={} executed={} rejected={} energy={}",
                    self.measurements,
                    counters.executed,
                    counters.rejected,
                    self.simulation.configuration().energy()
                );
            }
        }
        if poll.dump_histograms {
            log::debug!("metropolis keeps no histograms; ignoring dump request");
        }
        poll.terminate
    }
}
