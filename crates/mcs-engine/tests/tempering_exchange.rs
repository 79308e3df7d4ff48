mod common;

use common::{mean, Counter, IsingRing};
use mcs_core::{energy, CancellationToken, RngHandle};
use mcs_engine::tempering::{attempt_exchange, exchange_acceptance, Direction};
use mcs_engine::{
    Checkpoint, InverseTemperatureLadder, Metropolis, MetropolisParameters, ParallelTempering,
    TemperingParameters,
};
use tempfile::tempdir;

fn parameters() -> TemperingParameters {
    TemperingParameters {
        process_number: 1,
        relaxation_steps: 100,
        measurement_number: 20,
        steps_between_measurement: 50,
        steps_between_replica_exchange: 10,
    }
}

fn ensemble(process_number: usize, seed: u64) -> ParallelTempering<IsingRing> {
    let ladder = InverseTemperatureLadder::linear(0.1, 1.0, 4).unwrap();
    ParallelTempering::from_configuration(
        &IsingRing::new(8),
        ladder,
        TemperingParameters {
            process_number,
            ..parameters()
        },
        seed,
    )
    .unwrap()
}

#[test]
fn exchange_probabilities_land_in_target_band() {
    let acceptance = exchange_acceptance(0.5, 2.0, 1.0, 0.0);
    assert!(
        acceptance > 0.2 && acceptance < 0.5,
        "unexpected acceptance {acceptance}"
    );
    assert_eq!(exchange_acceptance(0.5, 0.0, 1.0, 2.0), 1.0);

    let mut rng = RngHandle::from_seed(0xDEADBEEF);
    let (_accepted, prob) = attempt_exchange(0.5, 2.0, 1.0, 0.0, &mut rng);
    assert!((prob - acceptance).abs() < 1e-12);
}

#[test]
fn simulation_fills_one_accumulator_per_rung() {
    let mut tempering = ensemble(1, 13);
    let mut energies: Vec<Vec<f64>> = vec![Vec::new(); 4];
    let outcome = tempering
        .do_parallel_tempering_simulation(&energy::<IsingRing>, &mut energies)
        .unwrap();

    assert_eq!(outcome.measurements, 20);
    assert!(!outcome.terminated);
    assert!(energies.iter().all(|rung| rung.len() == 20));

    let log = tempering.exchange_log();
    for pair in 0..3 {
        assert_eq!(log.executed()[pair] + log.rejected()[pair], 110);
    }
    assert!(log.acceptance().iter().all(|a| (0.0..=1.0).contains(a)));
    assert!(mean(&energies[3]) < mean(&energies[0]));

    assert_eq!(tempering.directions()[0], Direction::Up);
    assert_eq!(tempering.directions()[3], Direction::Down);
    let histogram = tempering.direction_histogram();
    assert_eq!(histogram.up()[0], 110.0);
    assert_eq!(histogram.down()[0], 0.0);
    assert_eq!(histogram.down()[3], 110.0);
    assert_eq!(histogram.flow_fraction()[3], 1.0);
}

#[test]
fn accumulator_count_must_match_rungs() {
    let mut tempering = ensemble(1, 1);
    let mut energies: Vec<Vec<f64>> = vec![Vec::new(); 3];
    let err = tempering
        .do_parallel_tempering_simulation(&energy::<IsingRing>, &mut energies)
        .unwrap_err();
    assert_eq!(err.info().code, "accumulator-count");
}

#[test]
fn replica_threads_do_not_change_the_trajectory() {
    let mut serial = ensemble(1, 77);
    let mut threaded = ensemble(3, 77);
    let mut serial_energies: Vec<Vec<f64>> = vec![Vec::new(); 4];
    let mut threaded_energies: Vec<Vec<f64>> = vec![Vec::new(); 4];

    serial
        .do_parallel_tempering_simulation(&energy::<IsingRing>, &mut serial_energies)
        .unwrap();
    threaded
        .do_parallel_tempering_simulation(&energy::<IsingRing>, &mut threaded_energies)
        .unwrap();

    assert_eq!(serial_energies, threaded_energies);
    assert_eq!(serial.exchange_log(), threaded.exchange_log());
}

#[test]
fn termination_stops_after_the_current_window() {
    let token = CancellationToken::new();
    let mut tempering = ensemble(1, 5);
    tempering.set_cancellation(token.clone());
    let calls = std::cell::Cell::new(0);
    let observable = |ring: &IsingRing| {
        calls.set(calls.get() + 1);
        // Four rungs observed per window; stop inside the second window.
        if calls.get() == 6 {
            token.request_termination();
        }
        mcs_core::Configuration::energy(ring)
    };

    let mut energies: Vec<Vec<f64>> = vec![Vec::new(); 4];
    let outcome = tempering
        .do_parallel_tempering_simulation(&observable, &mut energies)
        .unwrap();
    assert!(outcome.terminated);
    assert_eq!(outcome.measurements, 2);
    assert!(energies.iter().all(|rung| rung.len() == 2));
}

#[test]
fn ladder_size_is_enforced() {
    let mut tempering = ensemble(1, 5);
    let err = tempering
        .set_ladder(InverseTemperatureLadder::linear(0.1, 1.0, 3).unwrap())
        .unwrap_err();
    assert_eq!(err.info().code, "ladder-size");

    let err = ParallelTempering::new(
        vec![IsingRing::new(8); 2],
        InverseTemperatureLadder::linear(0.1, 1.0, 4).unwrap(),
        parameters(),
        0,
    )
    .unwrap_err();
    assert_eq!(err.info().code, "replica-count");
}

#[test]
fn checkpoint_restores_ensemble() {
    let mut tempering = ensemble(1, 31);
    tempering.advance(500).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("pt.json");
    tempering.store(&path).unwrap();
    let mut restored = ParallelTempering::<IsingRing>::load(&path).unwrap();

    assert_eq!(restored.ladder(), tempering.ladder());
    assert_eq!(restored.exchange_log(), tempering.exchange_log());
    assert_eq!(restored.directions(), tempering.directions());
    assert!(restored.configurations().eq(tempering.configurations()));

    tempering.advance(500).unwrap();
    restored.advance(500).unwrap();
    assert!(restored.configurations().eq(tempering.configurations()));
}

#[test]
fn checkpoint_type_mismatch_is_a_hard_error() {
    let sampler = Metropolis::new(IsingRing::new(8), MetropolisParameters::default(), 1).unwrap();
    let bytes = sampler.to_bytes().unwrap();

    let err = Metropolis::<Counter>::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, mcs_core::McError::Checkpoint(_)));
    assert_eq!(err.info().code, "checkpoint-type-mismatch");

    let err = ParallelTempering::<IsingRing>::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.info().code, "checkpoint-type-mismatch");
    assert_eq!(err.info().context["found_kind"], "metropolis");

    let err = Metropolis::<IsingRing>::from_bytes(b"not json").unwrap_err();
    assert_eq!(err.info().code, "checkpoint-parse");
}
