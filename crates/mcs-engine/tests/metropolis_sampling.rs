mod common;

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{mean, Counter, IsingRing};
use mcs_core::{energy, CancellationToken, Configuration};
use mcs_engine::{
    do_parallel_metropolis_simulation, AcceptanceRule, Checkpoint, Metropolis,
    MetropolisParameters, StepAlgorithm,
};

fn parameters(measurements: u64) -> MetropolisParameters {
    MetropolisParameters {
        relaxation_steps: 200,
        measurement_number: measurements,
        steps_between_measurement: 50,
        ..MetropolisParameters::default()
    }
}

#[test]
fn infinite_temperature_ring_has_zero_mean_energy() {
    let mut sampler = Metropolis::new(IsingRing::new(8), parameters(2000), 7).unwrap();
    let mut energies: Vec<f64> = Vec::new();
    let outcome = sampler
        .do_metropolis_simulation(0.0, &energy::<IsingRing>, &mut energies)
        .unwrap();

    assert_eq!(outcome.measurements, 2000);
    assert!(!outcome.terminated);
    assert_eq!(energies.len(), 2000);
    let average = mean(&energies);
    assert!(average.abs() < 0.4, "mean energy {average}");
}

#[test]
fn low_temperature_ring_orders() {
    let mut sampler = Metropolis::new(IsingRing::new(8), parameters(200), 11).unwrap();
    let mut energies: Vec<f64> = Vec::new();
    sampler
        .do_metropolis_simulation(3.0, &energy::<IsingRing>, &mut energies)
        .unwrap();
    assert!(mean(&energies) < -6.0, "mean energy {}", mean(&energies));
}

#[test]
fn checkpoint_round_trip_preserves_configuration_and_stream() {
    for steps in [0u64, 1, 10_000] {
        let mut sampler = Metropolis::new(IsingRing::new(12), parameters(10), 99).unwrap();
        sampler.do_metropolis_steps(steps, 0.7).unwrap();

        let bytes = sampler.to_bytes().unwrap();
        let mut restored = Metropolis::<IsingRing>::from_bytes(&bytes).unwrap();
        assert_eq!(restored.configuration(), sampler.configuration());
        assert_eq!(restored.simulation().counters(), sampler.simulation().counters());

        sampler.do_metropolis_steps(500, 0.7).unwrap();
        restored.do_metropolis_steps(500, 0.7).unwrap();
        assert_eq!(restored.configuration(), sampler.configuration(), "after {steps} steps");
    }
}

#[test]
fn termination_keeps_only_completed_windows() {
    let token = CancellationToken::new();
    let calls = Cell::new(0u64);
    let observable = |ring: &IsingRing| {
        calls.set(calls.get() + 1);
        if calls.get() == 3 {
            token.request_termination();
        }
        ring.energy()
    };

    let mut sampler = Metropolis::new(IsingRing::new(8), parameters(100), 3).unwrap();
    sampler.set_cancellation(token.clone());
    let mut energies: Vec<f64> = Vec::new();
    let outcome = sampler
        .do_metropolis_simulation(0.5, &observable, &mut energies)
        .unwrap();

    assert!(outcome.terminated);
    assert_eq!(outcome.measurements, 3);
    assert_eq!(energies.len(), 3);
    assert_eq!(sampler.measurements(), 3);

    let again = sampler
        .do_metropolis_simulation(0.5, &observable, &mut energies)
        .unwrap();
    assert!(again.terminated);
    assert_eq!(again.measurements, 0);
    assert_eq!(energies.len(), 3);
}

#[test]
fn status_requests_reach_the_hook_and_are_cleared() {
    let token = CancellationToken::new();
    let mut sampler = Metropolis::new(IsingRing::new(8), parameters(5), 3).unwrap();
    sampler.set_cancellation(token.clone());
    let seen = std::rc::Rc::new(Cell::new(0));
    let counter = seen.clone();
    sampler.on_status(move |_| counter.set(counter.get() + 1));

    token.request_status_dump();
    let mut energies: Vec<f64> = Vec::new();
    let outcome = sampler
        .do_metropolis_simulation(0.5, &energy::<IsingRing>, &mut energies)
        .unwrap();

    assert_eq!(outcome.measurements, 5);
    assert_eq!(seen.get(), 1);
    assert!(!token.poll().dump_status);
}

#[test]
fn parallel_runs_match_serial_runs_with_consecutive_seeds() {
    let params = MetropolisParameters {
        process_number: 4,
        ..parameters(300)
    };
    let mut parallel: Vec<f64> = Vec::new();
    let summary = do_parallel_metropolis_simulation(
        &IsingRing::new(10),
        &params,
        0,
        0.4,
        &energy::<IsingRing>,
        &mut parallel,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(summary.runs.len(), 4);
    assert_eq!(summary.measurements, 1200);

    let mut serial: Vec<f64> = Vec::new();
    for seed in 0..4 {
        let mut run = Metropolis::new(IsingRing::new(10), params.clone(), seed).unwrap();
        run.do_metropolis_simulation(0.4, &energy::<IsingRing>, &mut serial)
            .unwrap();
    }

    assert_eq!(parallel.len(), serial.len());
    let squares = |values: &[f64]| values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
    assert!((mean(&parallel) - mean(&serial)).abs() < 1e-3);
    assert!((squares(&parallel) - squares(&serial)).abs() < 1e-3);
    assert_eq!(parallel, serial);
}

#[test]
fn parallel_termination_counts_completed_windows() {
    let token = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let observable = |ring: &IsingRing| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            token.request_termination();
        }
        ring.energy()
    };
    let params = MetropolisParameters {
        process_number: 4,
        ..parameters(1000)
    };

    let mut energies: Vec<f64> = Vec::new();
    let summary = do_parallel_metropolis_simulation(
        &IsingRing::new(8),
        &params,
        5,
        0.2,
        &observable,
        &mut energies,
        &token,
    )
    .unwrap();

    assert!(summary.terminated);
    let per_run: u64 = summary.runs.iter().map(|run| run.measurements).sum();
    assert_eq!(summary.measurements, per_run);
    assert_eq!(energies.len() as u64, summary.measurements);
    assert!(summary.runs.iter().all(|run| run.measurements <= 1));
    assert_eq!(calls.load(Ordering::SeqCst) as u64, summary.measurements);
}

#[test]
fn rejection_free_matches_standard_with_single_certain_step() {
    let mut standard = Metropolis::new(Counter::default(), parameters(1), 21).unwrap();
    let mut rejection_free = Metropolis::new(
        Counter::default(),
        MetropolisParameters {
            algorithm: StepAlgorithm::RejectionFree,
            ..parameters(1)
        },
        21,
    )
    .unwrap();

    standard
        .do_steps_with(1000, &mut AcceptanceRule(|_: &common::Increment| 1.0))
        .unwrap();
    rejection_free
        .do_steps_with(1000, &mut AcceptanceRule(|_: &common::Increment| 1.0))
        .unwrap();

    assert_eq!(standard.configuration().value, 1000);
    assert_eq!(rejection_free.configuration(), standard.configuration());
    assert_eq!(
        rejection_free.simulation().counters().executed,
        standard.simulation().counters().executed
    );
    assert_eq!(rejection_free.simulation().counters().rejected, 0);
}

#[test]
fn rejection_free_advances_time_at_the_acceptance_rate() {
    let rule = |_: &common::Increment| 0.25;
    let mut standard = Metropolis::new(Counter::default(), parameters(1), 4).unwrap();
    let mut rejection_free = Metropolis::new(
        Counter::default(),
        MetropolisParameters {
            algorithm: StepAlgorithm::RejectionFree,
            ..parameters(1)
        },
        4,
    )
    .unwrap();

    standard.do_steps_with(40_000, &mut AcceptanceRule(rule)).unwrap();
    rejection_free
        .do_steps_with(40_000, &mut AcceptanceRule(rule))
        .unwrap();

    let standard_count = standard.configuration().value as f64;
    let rejection_free_count = rejection_free.configuration().value as f64;
    assert!((standard_count - 10_000.0).abs() < 500.0, "{standard_count}");
    assert!((rejection_free_count - 10_000.0).abs() <= 1.0, "{rejection_free_count}");
}

#[test]
fn underflowing_rates_count_as_unit_time_rejections() {
    let mut sampler = Metropolis::new(
        Counter::default(),
        MetropolisParameters {
            algorithm: StepAlgorithm::RejectionFree,
            ..parameters(1)
        },
        6,
    )
    .unwrap();

    sampler
        .do_steps_with(5, &mut AcceptanceRule(|_: &common::Increment| (-1000f64).exp()))
        .unwrap();

    let counters = sampler.simulation().counters();
    assert_eq!(counters.executed, 0);
    assert_eq!(counters.rejected, 5);
    assert_eq!(counters.degenerate, 5);
    assert_eq!(sampler.configuration().value, 0);
}

#[test]
fn rejection_free_ring_samples_the_same_mean_energy() {
    let mut sampler = Metropolis::new(
        IsingRing::new(8),
        MetropolisParameters {
            algorithm: StepAlgorithm::RejectionFree,
            ..parameters(2000)
        },
        8,
    )
    .unwrap();
    let mut energies: Vec<f64> = Vec::new();
    sampler
        .do_metropolis_simulation(0.0, &energy::<IsingRing>, &mut energies)
        .unwrap();
    assert!(mean(&energies).abs() < 0.4, "mean energy {}", mean(&energies));
}

#[test]
fn rejection_free_requires_enumerated_steps() {
    #[derive(Debug, Clone)]
    struct Opaque(IsingRing);

    impl Configuration for Opaque {
        type Step = common::SpinFlip;

        fn energy(&self) -> f64 {
            self.0.energy()
        }

        fn propose_step(&self, rng: &mut mcs_core::RngHandle) -> common::SpinFlip {
            self.0.propose_step(rng)
        }

        fn commit(&mut self, step: &common::SpinFlip) {
            self.0.commit(step)
        }

        fn undo(&mut self, step: &common::SpinFlip) {
            self.0.undo(step)
        }
    }

    let mut sampler = Metropolis::new(
        Opaque(IsingRing::new(4)),
        MetropolisParameters {
            algorithm: StepAlgorithm::RejectionFree,
            ..parameters(1)
        },
        1,
    )
    .unwrap();
    let err = sampler.do_metropolis_steps(10, 1.0).unwrap_err();
    assert_eq!(err.info().code, "no-enumerated-steps");
}
