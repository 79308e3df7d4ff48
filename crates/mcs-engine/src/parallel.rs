use mcs_core::errors::ErrorInfo;
use mcs_core::{Accumulator, CancellationToken, Configuration, McError, Observable};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MetropolisParameters;
use crate::determinism;
use crate::metropolis::{Metropolis, MetropolisOutcome};

/// Summary of a parallel Metropolis run, in run order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParallelOutcome {
    /// Outcome of every independent run.
    pub runs: Vec<MetropolisOutcome>,
    /// Total number of recorded measurements.
    pub measurements: u64,
    /// Whether any run stopped on a termination request.
    pub terminated: bool,
}

/// Runs `process_number` independent Metropolis simulations concurrently.
///
/// Run `i` starts from a copy of `configuration` and is seeded with
/// `base_seed + i`. Each run buffers its own measurements; once every worker
/// has joined, the buffers are fed to `accumulator` in run order. All runs
/// share `cancellation` and stop after their current measurement window when
/// termination is requested.
pub fn do_parallel_metropolis_simulation<C, O, A>(
    configuration: &C,
    parameters: &MetropolisParameters,
    base_seed: u64,
    beta: f64,
    observable: &O,
    accumulator: &mut A,
    cancellation: &CancellationToken,
) -> Result<ParallelOutcome, McError>
where
    C: Configuration + Sync,
    O: Observable<C> + Sync,
    O::Value: Send,
    A: Accumulator<O::Value>,
{
    parameters.validate()?;
    let process_number = parameters.process_number;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(process_number)
        .build()
        .map_err(|err| {
            McError::Config(
                ErrorInfo::new("thread-pool", err.to_string())
                    .with_context("process_number", process_number.to_string()),
            )
        })?;
    log::info!("starting {process_number} parallel metropolis runs at beta {beta}");

    let results: Result<Vec<_>, McError> = pool.install(|| {
        (0..process_number)
            .into_par_iter()
            .map(|index| -> Result<(usize, Vec<O::Value>, MetropolisOutcome), McError> {
                let seed = determinism::run_seed(base_seed, index);
                let mut run = Metropolis::new(configuration.clone(), parameters.clone(), seed)?;
                run.set_cancellation(cancellation.clone());
                let mut samples = Vec::new();
                let outcome = run.do_metropolis_simulation(beta, observable, &mut samples)?;
                Ok((index, samples, outcome))
            })
            .collect()
    });

    let mut ordered = results?;
    ordered.sort_by_key(|(index, _, _)| *index);

    let mut summary = ParallelOutcome::default();
    for (_, samples, outcome) in ordered {
        for sample in samples {
            accumulator.accumulate(sample)?;
        }
        summary.measurements += outcome.measurements;
        summary.terminated |= outcome.terminated;
        summary.runs.push(outcome);
    }
    log::info!(
        "parallel metropolis finished with {} measurements",
        summary.measurements
    );
    Ok(summary)
}
