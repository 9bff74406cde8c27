use std::f64::consts::LN_2;

use serde::{Deserialize, Serialize};

/// Which effective-count formula to use when scaling the set size by the
/// threshold window. Both appear across protocol variants and encode different
/// threshold semantics, so the choice is the caller's.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ThresholdMode {
    /// Scale by `upper - lower`.
    Strict,
    /// Scale by `upper - lower + 1`.
    Inclusive,
}

/// Bloom filter dimensions shared by all parties of a run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BloomFilterSpec {
    pub false_positive_rate: f64,
    pub effective_element_count: u64,
    pub bit_length: u64,
    pub hash_function_count: u32,
}

impl BloomFilterSpec {
    /// Sizes the filter for one protocol run. `false_positive_rate` must be
    /// strictly within `(0, 1)` and `threshold <= party_count`; both are
    /// enforced by input validation upstream.
    pub fn derive(
        set_size: u64,
        party_count: u64,
        threshold: u64,
        false_positive_rate: f64,
        mode: ThresholdMode,
    ) -> Self {
        let effective = effective_count(set_size, party_count, threshold, mode);
        Self {
            false_positive_rate,
            effective_element_count: effective,
            bit_length: bit_length(effective, false_positive_rate),
            hash_function_count: hash_function_count(false_positive_rate),
        }
    }
}

/// Element count the filter must be sized for: the set size scaled by the
/// threshold window `upper - lower` (plus one in inclusive mode), i.e. the
/// number of rounds over which false positives accumulate.
pub fn effective_count(set_size: u64, upper: u64, lower: u64, mode: ThresholdMode) -> u64 {
    let window = upper - lower;
    match mode {
        ThresholdMode::Strict => set_size * window,
        ThresholdMode::Inclusive => set_size * (window + 1),
    }
}

/// Optimal Bloom filter bit length: `ceil(-n * ln(p) / ln(2)^2)`.
pub fn bit_length(effective_count: u64, false_positive_rate: f64) -> u64 {
    let m = -(effective_count as f64) * false_positive_rate.ln() / (LN_2 * LN_2);
    m.ceil() as u64
}

/// Optimal hash function count at the sized capacity: `round(-log2(p))`.
pub fn hash_function_count(false_positive_rate: f64) -> u32 {
    (-false_positive_rate.log2()).round() as u32
}

#[cfg(test)]
mod tests {
    use super::{bit_length, effective_count, hash_function_count, ThresholdMode};

    #[test]
    fn known_hash_function_counts() {
        // -log2(0.01) = 6.64 rounds to 7
        assert_eq!(hash_function_count(0.01), 7);
        assert_eq!(hash_function_count(0.5), 1);
        assert_eq!(hash_function_count(0.001), 10);
    }

    #[test]
    fn known_bit_lengths() {
        // ceil(-32 * ln(0.01) / ln(2)^2) = ceil(306.72)
        assert_eq!(bit_length(32, 0.01), 307);
        assert_eq!(bit_length(0, 0.01), 0);
    }

    #[test]
    fn bit_length_monotone_in_element_count() {
        let mut previous = 0;
        for n in [1u64, 2, 10, 100, 1000, 10_000] {
            let m = bit_length(n, 0.01);
            assert!(m > previous);
            previous = m;
        }
    }

    #[test]
    fn bit_length_monotone_in_false_positive_rate() {
        let mut previous = u64::MAX;
        for p in [0.0001, 0.001, 0.01, 0.1, 0.5] {
            let m = bit_length(1000, p);
            assert!(m < previous);
            previous = m;
        }
    }

    #[test]
    fn effective_count_modes() {
        assert_eq!(effective_count(16, 2, 0, ThresholdMode::Strict), 32);
        assert_eq!(effective_count(16, 6, 2, ThresholdMode::Strict), 64);
        assert_eq!(effective_count(16, 6, 2, ThresholdMode::Inclusive), 80);
        // Window of zero: the strict variant needs no capacity at all.
        assert_eq!(effective_count(16, 6, 6, ThresholdMode::Strict), 0);
        assert_eq!(effective_count(16, 6, 6, ThresholdMode::Inclusive), 16);
    }
}
