use std::collections::HashSet;

use log::debug;
use rand::Rng;

/// Seeds are read back by config consumers as signed 32-bit integers.
pub const SEED_MAX: u32 = i32::MAX as u32;

/// Attempts per diff-seed before the draw is declared stuck. The seed range
/// is astronomically larger than any realistic party count, so hitting this
/// bound signals a broken random source rather than bad luck.
const MAX_SEED_TRIALS: usize = 10_000;

/// Per-party randomness schedule. `shared_same_seed` is identical across all
/// parties of a run; `diff_seed` is unique per party.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartySeeds {
    pub shared_same_seed: u32,
    pub diff_seed: u32,
    pub same_set_size: u64,
}

/// Ring-topology endpoint assignment for one party. Party 1 is always the
/// server; party i listens on `base_port + i - 1` and forwards to its right
/// neighbor, closing a single directed ring.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartyTopology {
    pub index: usize,
    pub is_server: bool,
    pub listen_port: u16,
    pub server_address: String,
    pub right_neighbor_address: String,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum SynthesisError {
    #[display(fmt = "could not draw a fresh diff-seed after {} attempts", trials)]
    SeedSpaceExhausted { trials: usize },
}

/// Rejection-samples a seed from `[2, SEED_MAX]` that is not in `used`.
/// The collision set is explicit so the caller owns the uniqueness scope.
pub fn draw_distinct_seed(
    used: &HashSet<u32>,
    rng: &mut impl Rng,
) -> Result<u32, SynthesisError> {
    for _ in 0..MAX_SEED_TRIALS {
        let seed = rng.gen_range(2..=SEED_MAX);
        if !used.contains(&seed) {
            return Ok(seed);
        }
        debug!("diff-seed {} already assigned, redrawing", seed);
    }
    Err(SynthesisError::SeedSpaceExhausted {
        trials: MAX_SEED_TRIALS,
    })
}

/// Produces the seed schedule and ring topology for parties `1..=party_count`.
///
/// The same-set size shrinks by `max(set_size / party_count, 2)` per party,
/// floored at `set_size / 3`, so later parties hold smaller guaranteed
/// intersections. All returned diff-seeds are pairwise distinct.
pub fn synthesize(
    set_size: u64,
    party_count: usize,
    base_port: u16,
    host: &str,
    rng: &mut impl Rng,
) -> Result<Vec<(PartySeeds, PartyTopology)>, SynthesisError> {
    let shared_same_seed = rng.gen_range(1..=SEED_MAX);
    let diff_step = (set_size / party_count as u64).max(2);
    let floor_amount = set_size / 3;

    let mut used_seeds = HashSet::new();
    let mut parties = Vec::with_capacity(party_count);
    for i in 1..=party_count {
        let same_set_size = set_size
            .saturating_sub((i as u64 - 1) * diff_step)
            .max(floor_amount);
        let diff_seed = draw_distinct_seed(&used_seeds, rng)?;
        used_seeds.insert(diff_seed);

        let seeds = PartySeeds {
            shared_same_seed,
            diff_seed,
            same_set_size,
        };
        let topology = PartyTopology {
            index: i,
            is_server: i == 1,
            listen_port: base_port + (i as u16 - 1),
            server_address: format!("{}:{}", host, base_port),
            right_neighbor_address: format!(
                "{}:{}",
                host,
                base_port + (i % party_count) as u16
            ),
        };
        parties.push((seeds, topology));
    }
    Ok(parties)
}
