use log::{debug, info};
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::Rng;

use crate::arith::pow_mod;

/// Upper bound on generator candidates. Generator density in a group of prime
/// modulus is `phi(p-1)/(p-1)`, so a handful of trials suffices for honest
/// inputs; hitting this bound means the modulus is not prime or the supplied
/// factor set is incomplete.
pub const MAX_GENERATOR_TRIALS: usize = 50_000;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum GeneratorError {
    #[display(
        fmt = "no generator found after {} candidates; modulus is likely not prime or the factorization of modulus-1 is incomplete",
        trials
    )]
    SearchExhausted { trials: usize },
}

/// Subgroup-order test: `candidate` generates the full multiplicative group
/// mod `modulus` iff it lies in none of the maximal proper subgroups, whose
/// orders are `(modulus-1)/f` for the distinct prime factors `f` of
/// `modulus-1`.
///
/// `order_factors` must be the complete set of distinct prime factors of
/// `modulus - 1`; an incomplete set silently yields false positives.
pub fn is_generator(candidate: &BigUint, modulus: &BigUint, order_factors: &[BigUint]) -> bool {
    let order = modulus - 1u32;
    for factor in order_factors {
        if pow_mod(candidate, &(&order / factor), modulus).is_one() {
            return false;
        }
    }
    true
}

/// Draws uniform candidates from `[2, modulus)` until one passes
/// [`is_generator`], bounded by [`MAX_GENERATOR_TRIALS`].
pub fn find_generator(
    modulus: &BigUint,
    order_factors: &[BigUint],
    rng: &mut impl Rng,
) -> Result<BigUint, GeneratorError> {
    let low = BigUint::from(2u32);
    for trial in 1..=MAX_GENERATOR_TRIALS {
        let candidate = rng.gen_biguint_range(&low, modulus);
        if is_generator(&candidate, modulus, order_factors) {
            info!("found group generator after {} candidate(s)", trial);
            return Ok(candidate);
        }
        debug!("candidate {} rejected (trial {})", candidate, trial);
    }
    Err(GeneratorError::SearchExhausted {
        trials: MAX_GENERATOR_TRIALS,
    })
}
