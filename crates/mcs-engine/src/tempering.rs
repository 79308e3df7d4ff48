use std::fmt;

use mcs_core::errors::ErrorInfo;
use mcs_core::{Accumulator, CancellationToken, Configuration, McError, Observable, RngHandle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{StepAlgorithm, TemperingParameters};
use crate::determinism;
use crate::ladder::{self, InverseTemperatureLadder};
use crate::metropolis::{Boltzmann, StatusHook};
use crate::simulation::Simulation;

/// Computes the Metropolis acceptance for exchanging the configurations of
/// two rungs.
///
/// Swapping the configurations at `beta_low < beta_high` is accepted with
/// `min(1, exp((beta_low - beta_high) * (energy_low - energy_high)))`, so a
/// lower energy on the hotter rung always moves down the ladder.
pub fn exchange_acceptance(
    beta_low: f64,
    energy_low: f64,
    beta_high: f64,
    energy_high: f64,
) -> f64 {
    ((beta_low - beta_high) * (energy_low - energy_high)).exp().min(1.0)
}

/// Attempts a replica exchange using the provided RNG handle.
pub fn attempt_exchange(
    beta_low: f64,
    energy_low: f64,
    beta_high: f64,
    energy_high: f64,
    rng: &mut RngHandle,
) -> (bool, f64) {
    let acceptance = exchange_acceptance(beta_low, energy_low, beta_high, energy_high);
    let accepted = acceptance >= 1.0 || rng.uniform() < acceptance;
    (accepted, acceptance)
}

/// Accepted and rejected exchange counts per adjacent pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaExchangeLog {
    executed: Vec<u64>,
    rejected: Vec<u64>,
}

impl ReplicaExchangeLog {
    /// Creates an empty log for `pairs` adjacent pairs.
    pub fn new(pairs: usize) -> Self {
        Self {
            executed: vec![0; pairs],
            rejected: vec![0; pairs],
        }
    }

    /// Records one exchange attempt.
    pub fn record(&mut self, pair: usize, accepted: bool) {
        let counts = if accepted {
            &mut self.executed
        } else {
            &mut self.rejected
        };
        if let Some(count) = counts.get_mut(pair) {
            *count += 1;
        }
    }

    /// Zeroes every counter.
    pub fn reset(&mut self) {
        self.executed.iter_mut().for_each(|count| *count = 0);
        self.rejected.iter_mut().for_each(|count| *count = 0);
    }

    /// Accepted exchanges per pair.
    pub fn executed(&self) -> &[u64] {
        &self.executed
    }

    /// Rejected exchanges per pair.
    pub fn rejected(&self) -> &[u64] {
        &self.rejected
    }

    /// Whether every pair has at least one accepted exchange.
    pub fn all_pairs_executed(&self) -> bool {
        self.executed.iter().all(|count| *count > 0)
    }

    /// Measured acceptance ratio per pair; `NaN` for pairs never attempted.
    pub fn acceptance(&self) -> Vec<f64> {
        self.executed
            .iter()
            .zip(&self.rejected)
            .map(|(executed, rejected)| *executed as f64 / (executed + rejected) as f64)
            .collect()
    }
}

/// Which ladder end a configuration visited last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Has not reached either end yet.
    #[default]
    Unlabelled,
    /// Last visited the smallest inverse temperature.
    Up,
    /// Last visited the largest inverse temperature.
    Down,
}

/// Per-rung counts of up- and down-moving configurations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionHistogram {
    up: Vec<f64>,
    down: Vec<f64>,
}

impl DirectionHistogram {
    /// Creates an empty histogram over `rungs` rungs.
    pub fn new(rungs: usize) -> Self {
        Self {
            up: vec![0.0; rungs],
            down: vec![0.0; rungs],
        }
    }

    /// Counts one configuration at `rung`.
    pub fn record(&mut self, rung: usize, direction: Direction) {
        let counts = match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
            Direction::Unlabelled => return,
        };
        if let Some(count) = counts.get_mut(rung) {
            *count += 1.0;
        }
    }

    /// Zeroes every counter.
    pub fn reset(&mut self) {
        self.up.iter_mut().for_each(|count| *count = 0.0);
        self.down.iter_mut().for_each(|count| *count = 0.0);
    }

    /// Up-moving counts per rung.
    pub fn up(&self) -> &[f64] {
        &self.up
    }

    /// Down-moving counts per rung.
    pub fn down(&self) -> &[f64] {
        &self.down
    }

    /// Fraction of down-moving configurations per rung.
    pub fn flow_fraction(&self) -> Vec<f64> {
        ladder::flow_fraction(&self.up, &self.down)
    }
}

/// Result of a parallel tempering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemperingOutcome {
    /// Measurement windows completed; each recorded one value per rung.
    pub measurements: u64,
    /// Whether the run stopped on a termination request.
    pub terminated: bool,
}

/// Ensemble of Metropolis replicas pinned to the rungs of an inverse
/// temperature ladder, periodically exchanging configurations.
///
/// Each rung owns a [`Simulation`] whose random stream stays with the rung;
/// an accepted exchange swaps the two configuration values and their
/// direction labels.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: Deserialize<'de>"))]
pub struct ParallelTempering<C> {
    replicas: Vec<Simulation<C>>,
    directions: Vec<Direction>,
    ladder: InverseTemperatureLadder,
    parameters: TemperingParameters,
    exchange_log: ReplicaExchangeLog,
    direction_histogram: DirectionHistogram,
    rng: RngHandle,
    measurements: u64,
    #[serde(skip)]
    cancellation: CancellationToken,
    #[serde(skip)]
    pool: Option<rayon::ThreadPool>,
    #[serde(skip)]
    status_hook: Option<StatusHook<ParallelTempering<C>>>,
}

impl<C> fmt::Debug for ParallelTempering<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelTempering")
            .field("ladder", &self.ladder)
            .field("parameters", &self.parameters)
            .field("exchange_log", &self.exchange_log)
            .field("measurements", &self.measurements)
            .finish_non_exhaustive()
    }
}

impl<C: Configuration> ParallelTempering<C> {
    /// Places one configuration on every rung of `ladder`.
    pub fn new(
        configurations: Vec<C>,
        ladder: InverseTemperatureLadder,
        parameters: TemperingParameters,
        seed: u64,
    ) -> Result<Self, McError> {
        parameters.validate()?;
        if configurations.len() != ladder.len() {
            return Err(McError::Config(
                ErrorInfo::new("replica-count", "one configuration per rung is required")
                    .with_context("rungs", ladder.len().to_string())
                    .with_context("configurations", configurations.len().to_string()),
            ));
        }
        let rungs = ladder.len();
        let replicas = configurations
            .into_iter()
            .enumerate()
            .map(|(rung, configuration)| {
                Simulation::new(
                    configuration,
                    determinism::replica_seed(seed, rung),
                    StepAlgorithm::Standard,
                )
            })
            .collect();
        Ok(Self {
            replicas,
            directions: vec![Direction::Unlabelled; rungs],
            ladder,
            parameters,
            exchange_log: ReplicaExchangeLog::new(rungs - 1),
            direction_histogram: DirectionHistogram::new(rungs),
            rng: RngHandle::from_seed(determinism::exchange_seed(seed)),
            measurements: 0,
            cancellation: CancellationToken::new(),
            pool: None,
            status_hook: None,
        })
    }

    /// Places a copy of `configuration` on every rung of `ladder`.
    pub fn from_configuration(
        configuration: &C,
        ladder: InverseTemperatureLadder,
        parameters: TemperingParameters,
        seed: u64,
    ) -> Result<Self, McError> {
        let configurations = vec![configuration.clone(); ladder.len()];
        Self::new(configurations, ladder, parameters, seed)
    }

    /// Current ladder.
    pub fn ladder(&self) -> &InverseTemperatureLadder {
        &self.ladder
    }

    /// Replaces the ladder; the rung count must stay the same.
    pub fn set_ladder(&mut self, ladder: InverseTemperatureLadder) -> Result<(), McError> {
        if ladder.len() != self.replicas.len() {
            return Err(McError::Ladder(
                ErrorInfo::new("ladder-size", "ladder size must match the replica count")
                    .with_context("rungs", ladder.len().to_string())
                    .with_context("replicas", self.replicas.len().to_string()),
            ));
        }
        self.ladder = ladder;
        Ok(())
    }

    /// Active parameters.
    pub fn parameters(&self) -> &TemperingParameters {
        &self.parameters
    }

    /// Replaces the parameters.
    pub fn set_parameters(&mut self, parameters: TemperingParameters) -> Result<(), McError> {
        parameters.validate()?;
        if parameters.process_number != self.parameters.process_number {
            self.pool = None;
        }
        self.parameters = parameters;
        Ok(())
    }

    /// Configurations in rung order.
    pub fn configurations(&self) -> impl Iterator<Item = &C> + '_ {
        self.replicas.iter().map(Simulation::configuration)
    }

    /// Configuration currently at `rung`.
    pub fn configuration(&self, rung: usize) -> Option<&C> {
        self.replicas.get(rung).map(Simulation::configuration)
    }

    /// Direction labels of the configurations in rung order.
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Exchange counts since the last reset.
    pub fn exchange_log(&self) -> &ReplicaExchangeLog {
        &self.exchange_log
    }

    /// Zeroes the exchange counts.
    pub fn reset_exchange_log(&mut self) {
        self.exchange_log.reset();
    }

    /// Direction counts since the last reset.
    pub fn direction_histogram(&self) -> &DirectionHistogram {
        &self.direction_histogram
    }

    /// Zeroes the direction counts; labels are kept.
    pub fn reset_direction_histogram(&mut self) {
        self.direction_histogram.reset();
    }

    /// Measurement windows completed over the lifetime of the ensemble.
    pub fn measurements(&self) -> u64 {
        self.measurements
    }

    /// Token polled between measurement windows.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shares a cancellation token with the ensemble.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    /// Installs the callback run on a dump-status request.
    pub fn on_status(&mut self, hook: impl FnMut(&ParallelTempering<C>) + 'static) {
        self.status_hook = Some(Box::new(hook));
    }

    /// Advances every replica by `steps` Metropolis steps at its own rung.
    pub fn do_replica_steps(&mut self, steps: u64) -> Result<(), McError> {
        if self.parameters.process_number <= 1 {
            for (replica, &beta) in self.replicas.iter_mut().zip(self.ladder.iter()) {
                replica.do_steps(steps, &mut Boltzmann::new(beta))?;
            }
            return Ok(());
        }

        if self.pool.is_none() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.parameters.process_number)
                .build()
                .map_err(|err| {
                    McError::Config(
                        ErrorInfo::new("thread-pool", err.to_string()).with_context(
                            "process_number",
                            self.parameters.process_number.to_string(),
                        ),
                    )
                })?;
            self.pool = Some(pool);
        }
        let betas = self.ladder.as_slice();
        let replicas = &mut self.replicas;
        match self.pool.as_ref() {
            Some(pool) => pool.install(|| {
                replicas
                    .par_iter_mut()
                    .zip(betas.par_iter())
                    .try_for_each(|(replica, &beta)| {
                        replica.do_steps(steps, &mut Boltzmann::new(beta))
                    })
            }),
            None => Ok(()),
        }
    }

    /// Proposes one exchange for every adjacent pair, from the hottest pair up.
    pub fn exchange_replicas(&mut self) {
        for pair in 0..self.replicas.len() - 1 {
            let energy_low = self.replicas[pair].configuration().energy();
            let energy_high = self.replicas[pair + 1].configuration().energy();
            let (accepted, _) = attempt_exchange(
                self.ladder[pair],
                energy_low,
                self.ladder[pair + 1],
                energy_high,
                &mut self.rng,
            );
            self.exchange_log.record(pair, accepted);
            if accepted {
                let (low, high) = self.replicas.split_at_mut(pair + 1);
                std::mem::swap(low[pair].configuration_mut(), high[0].configuration_mut());
                self.directions.swap(pair, pair + 1);
            }
        }

        let last = self.directions.len() - 1;
        self.directions[0] = Direction::Up;
        self.directions[last] = Direction::Down;
        for (rung, direction) in self.directions.iter().enumerate() {
            self.direction_histogram.record(rung, *direction);
        }
    }

    /// Advances the ensemble by `steps` steps per replica, exchanging after
    /// every `steps_between_replica_exchange` steps.
    pub fn advance(&mut self, steps: u64) -> Result<(), McError> {
        let interval = self.parameters.steps_between_replica_exchange;
        let mut remaining = steps;
        while remaining >= interval {
            self.do_replica_steps(interval)?;
            self.exchange_replicas();
            remaining -= interval;
        }
        if remaining > 0 {
            self.do_replica_steps(remaining)?;
        }
        Ok(())
    }

    /// Relaxes the ensemble, then records one observable value per rung and
    /// measurement window into the matching accumulator.
    pub fn do_parallel_tempering_simulation<O, A>(
        &mut self,
        observable: &O,
        accumulators: &mut [A],
    ) -> Result<TemperingOutcome, McError>
    where
        O: Observable<C>,
        A: Accumulator<O::Value>,
    {
        if accumulators.len() != self.replicas.len() {
            return Err(McError::Config(
                ErrorInfo::new("accumulator-count", "one accumulator per rung is required")
                    .with_context("rungs", self.replicas.len().to_string())
                    .with_context("accumulators", accumulators.len().to_string()),
            ));
        }
        self.exchange_log.reset();
        self.run_protocol(|replicas| {
            for (replica, accumulator) in replicas.iter().zip(accumulators.iter_mut()) {
                accumulator.accumulate(observable.observe(replica.configuration()))?;
            }
            Ok(())
        })
    }

    pub(crate) fn run_protocol<F>(&mut self, mut measure: F) -> Result<TemperingOutcome, McError>
    where
        F: FnMut(&[Simulation<C>]) -> Result<(), McError>,
    {
        let mut outcome = TemperingOutcome::default();
        if self.cancellation.is_terminated() {
            outcome.terminated = true;
            return Ok(outcome);
        }
        log::debug!(
            "parallel tempering run over {} rungs: {} relaxation steps, {} x {} measurement steps",
            self.replicas.len(),
            self.parameters.relaxation_steps,
            self.parameters.measurement_number,
            self.parameters.steps_between_measurement
        );

        self.advance(self.parameters.relaxation_steps)?;
        for _ in 0..self.parameters.measurement_number {
            self.advance(self.parameters.steps_between_measurement)?;
            measure(&self.replicas)?;
            self.measurements += 1;
            outcome.measurements += 1;

            if self.check_signals() {
                log::warn!(
                    "parallel tempering terminated after {} measurements",
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
        let poll = self.cancellation.poll();
        if poll.dump_status {
            if let Some(mut hook) = self.status_hook.take() {
                hook(self);
                self.status_hook = Some(hook);
            } else {
                log::info!(
                    "parallel tempering status: measurements={} ladder={:?} exchange acceptance={:?}",
                    self.measurements,
                    self.ladder.as_slice(),
                    self.exchange_log.acceptance()
                );
            }
        }
        if poll.dump_histograms {
            log::info!(
                "replica flow: up={:?} down={:?}",
                self.direction_histogram.up(),
                self.direction_histogram.down()
            );
        }
        poll.terminate
    }
}
