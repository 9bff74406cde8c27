use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::One;
use rand::Rng;

/// Computes `base^exponent mod modulus` by left-to-right square-and-multiply.
///
/// The accumulator is reduced after every multiplication, so intermediate
/// values never exceed `modulus^2`. Correct for operands of several thousand
/// bits. Panics if `modulus` is zero.
pub fn pow_mod(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    let mut acc = BigUint::one() % modulus;
    for bit in (0..exponent.bits()).rev() {
        acc = &acc * &acc % modulus;
        if exponent.bit(bit) {
            acc = acc * base % modulus;
        }
    }
    acc
}

/// Miller-Rabin primality test with `rounds` random bases.
///
/// Probabilistic: a `true` verdict is wrong with probability at most
/// `4^-rounds`. Used to reject composite moduli before the generator search
/// would spin on them.
pub fn is_probable_prime(n: &BigUint, rounds: usize, rng: &mut impl Rng) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);
    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if n.is_even() {
        return false;
    }

    // n - 1 = d * 2^s with d odd
    let n_minus_1 = n - &one;
    let mut d = n_minus_1.clone();
    let mut s = 0u32;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = pow_mod(&a, &d, n);
        if x == one || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = &x * &x % n;
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
