#![deny(missing_docs)]

//! Markov-chain Monte Carlo engines over pluggable configurations: Metropolis
//! sampling, Wang-Landau and entropic density-of-states estimation, and
//! parallel tempering with inverse-temperature ladder optimization.

/// Checkpoint persistence for every engine.
pub mod checkpoint;
/// YAML configuration schema and defaults.
pub mod config;
/// Multicanonical sampling at a fixed density-of-states estimate.
pub mod entropic;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Sparse energy histograms.
pub mod histogram;
/// Inverse temperature ladders and their update rules.
pub mod ladder;
/// Canonical-ensemble sampling at a fixed inverse temperature.
pub mod metropolis;
/// Ladder optimization driver and weighting policies.
pub mod optimization;
/// Independent Metropolis runs on a worker pool.
pub mod parallel;
/// Shared step-execution engine.
pub mod simulation;
/// Replica-exchange engine.
pub mod tempering;
/// Flat-histogram density-of-states estimation.
pub mod wang_landau;

pub use checkpoint::Checkpoint;
pub use config::{
    EnergyBinning, EngineConfig, EntropicSamplingParameters, MetropolisParameters,
    OptimizationAlgorithm, OptimizationConfig, StepAlgorithm, TemperingParameters,
    WangLandauParameters, WeightPolicy,
};
pub use entropic::{EntropicSampling, EntropicSamplingOutcome};
pub use histogram::Histogram;
pub use ladder::{berg_update, katzgraber_update, InverseTemperatureLadder};
pub use metropolis::{AcceptanceRule, Boltzmann, Metropolis, MetropolisOutcome};
pub use optimization::{
    weighted_ladder, OptimizationHistory, OptimizationOutcome, OptimizationRecord,
};
pub use parallel::{do_parallel_metropolis_simulation, ParallelOutcome};
pub use simulation::{Simulation, StepCounters, StepHandler};
pub use tempering::{
    exchange_acceptance, Direction, DirectionHistogram, ParallelTempering, ReplicaExchangeLog,
    TemperingOutcome,
};
pub use wang_landau::{WangLandau, WangLandauOutcome};
