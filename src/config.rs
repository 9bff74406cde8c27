use std::collections::HashSet;

use log::info;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::arith::is_probable_prime;
use crate::bloom::{BloomFilterSpec, ThresholdMode};
use crate::generator::{self, GeneratorError};
use crate::party::{self, PartySeeds, PartyTopology, SynthesisError, SEED_MAX};

/// Miller-Rabin rounds for the defensive modulus check.
const MODULUS_PRIMALITY_ROUNDS: usize = 32;
/// Miller-Rabin rounds for the supplied order factors.
const FACTOR_PRIMALITY_ROUNDS: usize = 16;

/// The multiplicative group every party works in. Shared read-only by all
/// per-party configs; the same modulus and generator are used system-wide.
///
/// `prime_factors` holds the large prime factors of `modulus - 1`;
/// `q`/`q_power` name the subgroup the protocol encrypts in. The factor 2 is
/// implicit and supplied to the generator test automatically.
#[derive(Clone, Debug)]
pub struct GroupParameters {
    pub modulus: BigUint,
    pub prime_factors: Vec<BigUint>,
    pub q: BigUint,
    pub q_power: u32,
}

impl GroupParameters {
    /// Distinct prime factors of `modulus - 1`, as needed by the
    /// subgroup-order test: the supplied large factors, `q`, and 2.
    pub fn order_factors(&self) -> Vec<BigUint> {
        let mut factors: Vec<BigUint> = Vec::new();
        for f in self.prime_factors.iter().chain(Some(&self.q)) {
            if !factors.contains(f) {
                factors.push(f.clone());
            }
        }
        let two = BigUint::from(2u32);
        if !factors.contains(&two) {
            factors.push(two);
        }
        factors
    }

    /// Checks that the listed factors account for all of `modulus - 1`:
    /// stripping every occurrence of every factor must leave 1. An incomplete
    /// factor set would make the generator test accept non-generators.
    pub fn factors_cover_order(&self) -> bool {
        let mut remainder = &self.modulus - 1u32;
        for factor in self.order_factors() {
            if factor.is_zero() || factor.is_one() {
                return false;
            }
            while (&remainder % &factor).is_zero() {
                remainder /= &factor;
            }
        }
        remainder.is_one()
    }
}

/// Everything the engine needs for one generation batch.
#[derive(Clone, Debug)]
pub struct GenerationInputs {
    pub set_size: u64,
    pub false_positive_rate: f64,
    pub party_count: usize,
    pub threshold: u64,
    pub benchmark_rounds: u64,
    pub base_port: u16,
    pub host: String,
    pub threshold_mode: ThresholdMode,
    pub group: GroupParameters,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum InputError {
    #[display(fmt = "set size must be positive")]
    ZeroSetSize,
    #[display(fmt = "false positive rate {} is outside (0, 1)", rate)]
    FalsePositiveRateOutOfRange { rate: f64 },
    #[display(fmt = "at least two parties are required, got {}", count)]
    TooFewParties { count: usize },
    #[display(fmt = "threshold {} is outside [1, {}]", threshold, party_count)]
    ThresholdOutOfRange { threshold: u64, party_count: usize },
    #[display(
        fmt = "party ports {}..={} do not fit the valid TCP port range",
        base_port,
        last_port
    )]
    PortRangeOverflow { base_port: u16, last_port: u64 },
    #[display(fmt = "modulus failed the probabilistic primality check")]
    CompositeModulus,
    #[display(fmt = "order factor {} failed the probabilistic primality check", factor)]
    CompositeOrderFactor { factor: String },
    #[display(fmt = "supplied factors do not multiply out to modulus - 1")]
    IncompleteFactorization,
}

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum GenError {
    #[display(fmt = "invalid input: {}", _0)]
    Input(InputError),
    #[display(fmt = "generator search failed: {}", _0)]
    Generator(GeneratorError),
    #[display(fmt = "party synthesis failed: {}", _0)]
    Synthesis(SynthesisError),
}

impl GenerationInputs {
    /// Fail-fast validation, run before any randomized search so that a bad
    /// input cannot hide inside an apparently-successful generator search.
    pub fn validate(&self, rng: &mut impl Rng) -> Result<(), InputError> {
        if self.set_size == 0 {
            return Err(InputError::ZeroSetSize);
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(InputError::FalsePositiveRateOutOfRange {
                rate: self.false_positive_rate,
            });
        }
        // N=1 would degenerate the ring into a self-loop, which the protocol
        // does not support.
        if self.party_count < 2 {
            return Err(InputError::TooFewParties {
                count: self.party_count,
            });
        }
        if self.threshold < 1 || self.threshold > self.party_count as u64 {
            return Err(InputError::ThresholdOutOfRange {
                threshold: self.threshold,
                party_count: self.party_count,
            });
        }
        let last_port = self.base_port as u64 + self.party_count as u64 - 1;
        if last_port > u16::MAX as u64 {
            return Err(InputError::PortRangeOverflow {
                base_port: self.base_port,
                last_port,
            });
        }
        if !is_probable_prime(&self.group.modulus, MODULUS_PRIMALITY_ROUNDS, rng) {
            return Err(InputError::CompositeModulus);
        }
        for factor in self.group.order_factors() {
            if !is_probable_prime(&factor, FACTOR_PRIMALITY_ROUNDS, rng) {
                return Err(InputError::CompositeOrderFactor {
                    factor: factor.to_string(),
                });
            }
        }
        if !self.group.factors_cover_order() {
            return Err(InputError::IncompleteFactorization);
        }
        Ok(())
    }
}

/// One per-party configuration document, in the exact field shape the
/// protocol runtime consumes. Big integers travel as decimal strings since
/// the transport does not support arbitrary-precision integers natively.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub set_size: u64,
    pub bloom_filter_size: u64,
    pub same_num: u64,
    pub same_seed: u32,
    pub diff_seed: u32,
    pub number_of_parties: usize,
    pub threshold: u64,
    pub benchmark_rounds: u64,
    pub number_of_hash_functions: u32,
    pub murmurhash_seeds: Vec<u32>,
    pub is_server: bool,
    pub port: u16,
    pub local_name: String,
    pub server_address: String,
    pub right_neighbor_address: String,
    pub all_parties: Vec<String>,
    pub p: String,
    pub phi_p_prime_factors: Vec<String>,
    pub q: String,
    pub q_power: String,
    pub alpha: String,
    pub buffer_size: u64,
}

/// Pure assembly of one record per party from the engine outputs. No
/// computation beyond field copying and string encoding.
pub fn build_records(
    inputs: &GenerationInputs,
    alpha: &BigUint,
    bloom: &BloomFilterSpec,
    murmurhash_seeds: &[u32],
    parties: &[(PartySeeds, PartyTopology)],
) -> Vec<ConfigRecord> {
    let all_parties: Vec<String> = (1..=inputs.party_count).map(|i| format!("P{}", i)).collect();

    let group = &inputs.group;
    let mut factor_strings: Vec<String> =
        group.prime_factors.iter().map(|f| f.to_string()).collect();
    factor_strings.push(group.q.to_string());
    if group.q != BigUint::from(2u32) {
        factor_strings.push("2".to_string());
    }
    let buffer_size = group.modulus.bits().div_ceil(8);

    parties
        .iter()
        .map(|(seeds, topology)| ConfigRecord {
            set_size: inputs.set_size,
            bloom_filter_size: bloom.bit_length,
            same_num: seeds.same_set_size,
            same_seed: seeds.shared_same_seed,
            diff_seed: seeds.diff_seed,
            number_of_parties: inputs.party_count,
            threshold: inputs.threshold,
            benchmark_rounds: inputs.benchmark_rounds,
            number_of_hash_functions: bloom.hash_function_count,
            murmurhash_seeds: murmurhash_seeds.to_vec(),
            is_server: topology.is_server,
            port: topology.listen_port,
            local_name: format!("P{}", topology.index),
            server_address: topology.server_address.clone(),
            right_neighbor_address: topology.right_neighbor_address.clone(),
            all_parties: all_parties.clone(),
            p: group.modulus.to_string(),
            phi_p_prime_factors: factor_strings.clone(),
            q: group.q.to_string(),
            q_power: group.q_power.to_string(),
            alpha: alpha.to_string(),
            buffer_size,
        })
        .collect()
}

/// Runs one generation batch: validation, generator search, Bloom sizing,
/// hash-seed draw, per-party synthesis, record assembly. All-or-nothing: any
/// failure yields no records.
pub fn generate(
    inputs: &GenerationInputs,
    rng: &mut impl Rng,
) -> Result<Vec<ConfigRecord>, GenError> {
    inputs.validate(rng)?;

    let order_factors = inputs.group.order_factors();
    let alpha = generator::find_generator(&inputs.group.modulus, &order_factors, rng)?;

    let bloom = BloomFilterSpec::derive(
        inputs.set_size,
        inputs.party_count as u64,
        inputs.threshold,
        inputs.false_positive_rate,
        inputs.threshold_mode,
    );
    info!(
        "bloom filter: {} bits, {} hash functions for {} effective elements",
        bloom.bit_length, bloom.hash_function_count, bloom.effective_element_count
    );
    let murmurhash_seeds: Vec<u32> = (0..bloom.hash_function_count)
        .map(|_| rng.gen_range(2..=SEED_MAX))
        .collect();

    let parties = party::synthesize(
        inputs.set_size,
        inputs.party_count,
        inputs.base_port,
        &inputs.host,
        rng,
    )?;
    info!("synthesized parameters for {} parties", parties.len());

    Ok(build_records(inputs, &alpha, &bloom, &murmurhash_seeds, &parties))
}

/// Sanity helper for callers that want to re-check a finished batch: all
/// diff-seeds must be pairwise distinct across the run.
pub fn diff_seeds_distinct(records: &[ConfigRecord]) -> bool {
    let mut seen = HashSet::new();
    records.iter().all(|r| seen.insert(r.diff_seed))
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use crate::bloom::{self, ThresholdMode};
    use crate::generator::is_generator;

    use super::{diff_seeds_distinct, generate, GenError, GenerationInputs, GroupParameters, InputError};

    fn small_group() -> GroupParameters {
        // 11 - 1 = 10 = 2 * 5
        GroupParameters {
            modulus: BigUint::from(11u32),
            prime_factors: vec![BigUint::from(5u32)],
            q: BigUint::from(2u32),
            q_power: 1,
        }
    }

    fn inputs() -> GenerationInputs {
        GenerationInputs {
            set_size: 16,
            false_positive_rate: 0.01,
            party_count: 6,
            threshold: 2,
            benchmark_rounds: 50,
            base_port: 20081,
            host: "127.0.0.1".to_string(),
            threshold_mode: ThresholdMode::Inclusive,
            group: small_group(),
        }
    }

    #[test]
    fn order_factors_include_implicit_two() {
        let factors = small_group().order_factors();
        assert_eq!(factors, vec![BigUint::from(5u32), BigUint::from(2u32)]);

        let group = GroupParameters {
            modulus: BigUint::from(23u32),
            prime_factors: vec![BigUint::from(11u32)],
            q: BigUint::from(11u32),
            q_power: 1,
        };
        // Duplicates collapse, 2 is appended once.
        assert_eq!(
            group.order_factors(),
            vec![BigUint::from(11u32), BigUint::from(2u32)]
        );
    }

    #[test]
    fn factor_coverage_detects_missing_primes() {
        assert!(small_group().factors_cover_order());
        let incomplete = GroupParameters {
            modulus: BigUint::from(11u32),
            prime_factors: vec![],
            q: BigUint::from(2u32),
            q_power: 1,
        };
        assert!(!incomplete.factors_cover_order());
    }

    #[test]
    fn validation_rejects_bad_false_positive_rates() {
        let mut rng = ChaCha20Rng::seed_from_u64(20);
        for rate in [0.0, 1.0, -0.5, f64::NAN] {
            let mut bad = inputs();
            bad.false_positive_rate = rate;
            assert!(matches!(
                bad.validate(&mut rng),
                Err(InputError::FalsePositiveRateOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn validation_rejects_threshold_outside_party_count() {
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        for threshold in [0u64, 7] {
            let mut bad = inputs();
            bad.threshold = threshold;
            assert!(matches!(
                bad.validate(&mut rng),
                Err(InputError::ThresholdOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn validation_rejects_single_party_runs() {
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let mut bad = inputs();
        bad.party_count = 1;
        bad.threshold = 1;
        assert!(matches!(
            bad.validate(&mut rng),
            Err(InputError::TooFewParties { count: 1 })
        ));
    }

    #[test]
    fn validation_rejects_composite_modulus() {
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let mut bad = inputs();
        // 15 - 1 = 14 = 2 * 7, but 15 itself is composite.
        bad.group = GroupParameters {
            modulus: BigUint::from(15u32),
            prime_factors: vec![BigUint::from(7u32)],
            q: BigUint::from(2u32),
            q_power: 1,
        };
        assert!(matches!(
            bad.validate(&mut rng),
            Err(InputError::CompositeModulus)
        ));
    }

    #[test]
    fn validation_rejects_incomplete_factorizations() {
        let mut rng = ChaCha20Rng::seed_from_u64(24);
        let mut bad = inputs();
        // 2 alone does not cover 11 - 1 = 2 * 5.
        bad.group.prime_factors = vec![];
        assert!(matches!(
            bad.validate(&mut rng),
            Err(InputError::IncompleteFactorization)
        ));
    }

    #[test]
    fn validation_rejects_port_overflow() {
        let mut rng = ChaCha20Rng::seed_from_u64(25);
        let mut bad = inputs();
        bad.base_port = 65534;
        assert!(matches!(
            bad.validate(&mut rng),
            Err(InputError::PortRangeOverflow { .. })
        ));
    }

    #[test]
    fn generate_produces_consistent_records() {
        let mut rng = ChaCha20Rng::seed_from_u64(30);
        let records = generate(&inputs(), &mut rng).unwrap();
        assert_eq!(records.len(), 6);
        assert!(diff_seeds_distinct(&records));

        // Inclusive mode: 16 * (6 - 2 + 1) = 80 effective elements.
        let expected_bits = bloom::bit_length(80, 0.01);
        assert_eq!(expected_bits, 767);
        for record in &records {
            assert_eq!(record.bloom_filter_size, expected_bits);
            assert_eq!(record.number_of_hash_functions, 7);
            assert_eq!(record.murmurhash_seeds.len(), 7);
            assert_eq!(record.p, "11");
            assert_eq!(record.q, "2");
            assert_eq!(record.phi_p_prime_factors, vec!["5", "2"]);
            // ceil(4 bits / 8)
            assert_eq!(record.buffer_size, 1);
            assert_eq!(record.server_address, "127.0.0.1:20081");
            assert_eq!(
                record.all_parties,
                vec!["P1", "P2", "P3", "P4", "P5", "P6"]
            );
        }

        // The published alpha is a verified generator of the group.
        let alpha: BigUint = records[0].alpha.parse().unwrap();
        assert!(is_generator(
            &alpha,
            &BigUint::from(11u32),
            &small_group().order_factors()
        ));

        // Ring check from spec'd topology: party 3 forwards to party 4.
        assert_eq!(records[2].right_neighbor_address, "127.0.0.1:20084");
        assert_eq!(records[3].port, 20084);
        assert!(records[0].is_server);
        assert_eq!(records.iter().filter(|r| r.is_server).count(), 1);

        let sizes: Vec<u64> = records.iter().map(|r| r.same_num).collect();
        assert_eq!(sizes, vec![16, 14, 12, 10, 8, 6]);
    }

    #[test]
    fn generate_strict_mode_uses_smaller_window() {
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let mut strict = inputs();
        strict.threshold_mode = ThresholdMode::Strict;
        let records = generate(&strict, &mut rng).unwrap();
        // 16 * (6 - 2) = 64 effective elements.
        assert_eq!(records[0].bloom_filter_size, bloom::bit_length(64, 0.01));
        assert_eq!(records[0].bloom_filter_size, 614);
    }

    #[test]
    fn odd_q_groups_list_two_explicitly() {
        let mut rng = ChaCha20Rng::seed_from_u64(34);
        let mut odd = inputs();
        // 59 - 1 = 58 = 2 * 29
        odd.group = GroupParameters {
            modulus: BigUint::from(59u32),
            prime_factors: vec![],
            q: BigUint::from(29u32),
            q_power: 1,
        };
        let records = generate(&odd, &mut rng).unwrap();
        assert_eq!(records[0].phi_p_prime_factors, vec!["29", "2"]);
        assert_eq!(records[0].q, "29");
        assert_eq!(records[0].q_power, "1");
    }

    #[test]
    fn generate_is_all_or_nothing_on_bad_input() {
        let mut rng = ChaCha20Rng::seed_from_u64(32);
        let mut bad = inputs();
        bad.false_positive_rate = 2.0;
        assert!(matches!(
            generate(&bad, &mut rng),
            Err(GenError::Input(InputError::FalsePositiveRateOutOfRange { .. }))
        ));
    }

    #[test]
    fn records_serialize_with_transport_field_names() {
        let mut rng = ChaCha20Rng::seed_from_u64(33);
        let records = generate(&inputs(), &mut rng).unwrap();
        let value = serde_json::to_value(&records[0]).unwrap();
        for key in [
            "setSize",
            "bloomFilterSize",
            "sameNum",
            "sameSeed",
            "diffSeed",
            "numberOfParties",
            "threshold",
            "benchmarkRounds",
            "numberOfHashFunctions",
            "murmurhashSeeds",
            "isServer",
            "port",
            "localName",
            "serverAddress",
            "rightNeighborAddress",
            "allParties",
            "p",
            "phiPPrimeFactors",
            "q",
            "qPower",
            "alpha",
            "bufferSize",
        ] {
            assert!(value.get(key).is_some(), "missing field {}", key);
        }
        assert_eq!(value["localName"], "P1");
    }
}
