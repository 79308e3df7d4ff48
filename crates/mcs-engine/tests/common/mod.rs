#![allow(dead_code)]

use mcs_core::{Configuration, RngHandle, Step};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Periodic 1-D Ising chain with energy `sum_i s_i * s_{i+1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsingRing {
    spins: Vec<i8>,
    time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinFlip {
    site: usize,
    delta_e: f64,
    created_at: u64,
}

impl IsingRing {
    pub fn new(sites: usize) -> Self {
        Self {
            spins: vec![1; sites],
            time: 0,
        }
    }

    pub fn with_flipped(sites: usize, flipped: &[usize]) -> Self {
        let mut ring = Self::new(sites);
        for site in flipped {
            ring.spins[*site] = -1;
        }
        ring
    }

    pub fn spins(&self) -> &[i8] {
        &self.spins
    }

    pub fn magnetization(&self) -> f64 {
        self.spins.iter().map(|s| f64::from(*s)).sum()
    }

    fn flip(&self, site: usize) -> SpinFlip {
        let n = self.spins.len();
        let left = self.spins[(site + n - 1) % n];
        let right = self.spins[(site + 1) % n];
        let spin = self.spins[site];
        SpinFlip {
            site,
            delta_e: -2.0 * f64::from(spin) * f64::from(left + right),
            created_at: self.time,
        }
    }
}

impl Step for SpinFlip {
    fn delta_e(&self) -> f64 {
        self.delta_e
    }

    fn created_at(&self) -> Option<u64> {
        Some(self.created_at)
    }
}

impl Configuration for IsingRing {
    type Step = SpinFlip;

    fn energy(&self) -> f64 {
        let n = self.spins.len();
        (0..n)
            .map(|i| f64::from(self.spins[i] * self.spins[(i + 1) % n]))
            .sum()
    }

    fn propose_step(&self, rng: &mut RngHandle) -> SpinFlip {
        let site = rng.gen_range(0..self.spins.len());
        self.flip(site)
    }

    fn all_steps(&self) -> Vec<SpinFlip> {
        (0..self.spins.len()).map(|site| self.flip(site)).collect()
    }

    fn commit(&mut self, step: &SpinFlip) {
        self.spins[step.site] = -self.spins[step.site];
        self.time += 1;
    }

    fn undo(&mut self, step: &SpinFlip) {
        self.spins[step.site] = -self.spins[step.site];
        self.time -= 1;
    }

    fn simulation_time(&self) -> u64 {
        self.time
    }
}

/// Configuration with exactly one possible step that never changes the energy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counter {
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Increment;

impl Step for Increment {
    fn delta_e(&self) -> f64 {
        0.0
    }
}

impl Configuration for Counter {
    type Step = Increment;

    fn energy(&self) -> f64 {
        0.0
    }

    fn propose_step(&self, _rng: &mut RngHandle) -> Increment {
        Increment
    }

    fn all_steps(&self) -> Vec<Increment> {
        vec![Increment]
    }

    fn commit(&mut self, _step: &Increment) {
        self.value += 1;
    }

    fn undo(&mut self, _step: &Increment) {
        self.value -= 1;
    }
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
