#![deny(missing_docs)]
#![doc = "Capability contracts and runtime plumbing for the Monte Carlo engine."]

/// Measurement sinks (in-memory and file-backed).
pub mod accumulator;
/// Cancellation token and signal wiring.
pub mod cancel;
pub mod errors;
pub mod rng;

pub use accumulator::{Accumulator, FileAccumulator};
pub use cancel::{CancellationToken, SignalPoll};
pub use errors::{ErrorInfo, McError};
pub use rng::{derive_substream_seed, RngHandle};

/// Elementary mutation proposed against a [`Configuration`].
///
/// Steps are plain values: they describe the mutation and carry the energy
/// difference computed at proposal time. The owning configuration applies
/// them through [`Configuration::commit`] and reverts them through
/// [`Configuration::undo`].
pub trait Step {
    /// Energy difference the step produces when committed.
    fn delta_e(&self) -> f64;

    /// Whether the step can be carried out at all.
    fn is_executable(&self) -> bool {
        true
    }

    /// Ratio of forward to backward selection probability.
    fn selection_probability_factor(&self) -> f64 {
        1.0
    }

    /// Simulation time of the configuration when the step was created.
    fn created_at(&self) -> Option<u64> {
        None
    }
}

/// Physical state sampled by the engines.
///
/// The engines own their configuration outright; parallel runs clone it once
/// per run and replica exchanges move whole values between rungs.
pub trait Configuration: Clone + Send {
    /// Elementary mutation type.
    type Step: Step;

    /// Total energy of the current state.
    fn energy(&self) -> f64;

    /// Draws a random elementary mutation.
    fn propose_step(&self, rng: &mut RngHandle) -> Self::Step;

    /// Enumerates every elementary mutation possible from the current state.
    ///
    /// Only the rejection-free algorithm calls this; configurations that do
    /// not support it may keep the empty default.
    fn all_steps(&self) -> Vec<Self::Step> {
        Vec::new()
    }

    /// Applies a step to the state.
    fn commit(&mut self, step: &Self::Step);

    /// Reverts a previously committed step.
    fn undo(&mut self, step: &Self::Step);

    /// Internal simulation-time counter, advanced by `commit`.
    fn simulation_time(&self) -> u64 {
        0
    }
}

/// Quantity sampled from a configuration once per measurement window.
pub trait Observable<C> {
    /// Measured value type.
    type Value;

    /// Samples the observable.
    fn observe(&self, configuration: &C) -> Self::Value;
}

impl<C, T, F> Observable<C> for F
where
    F: Fn(&C) -> T,
{
    type Value = T;

    fn observe(&self, configuration: &C) -> T {
        self(configuration)
    }
}

/// Observable returning the configuration energy.
pub fn energy<C: Configuration>(configuration: &C) -> f64 {
    configuration.energy()
}
