use mcs_core::derive_substream_seed;

/// Seed of the `index`-th independent run of a parallel simulation.
pub fn run_seed(base_seed: u64, index: usize) -> u64 {
    base_seed.wrapping_add(index as u64)
}

/// Derives the deterministic seed used for a specific tempering replica.
pub fn replica_seed(master_seed: u64, replica_index: usize) -> u64 {
    derive_substream_seed(master_seed, replica_index as u64)
}

/// Seed of the stream that decides replica exchanges.
pub fn exchange_seed(master_seed: u64) -> u64 {
    derive_substream_seed(master_seed ^ 0xA5A5_A5A5_A5A5_A5A5, u64::MAX)
}
