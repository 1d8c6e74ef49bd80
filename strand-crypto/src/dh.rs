//! Diffie-Hellman parameter validation and the shared-secret computation.
//!
//! A server-chosen group is only accepted when `p` is a 2048-bit safe prime,
//! `g` generates the subgroup of order `(p-1)/2`, and both public values lie
//! well inside `(1, p-1)`.

use num_bigint::BigUint;
use num_traits::One;

use crate::CryptoError;

/// Required bit length of the DH prime.
pub const DH_PRIME_BITS: u64 = 2048;

/// Miller-Rabin rounds per primality test.
const MILLER_RABIN_ROUNDS: usize = 24;

/// The group every production server currently sends. Checking it by value
/// skips two 2048-bit primality tests on every handshake.
const KNOWN_PRIME: &str = concat!(
    "c71caeb9c6b1c9048e6c522f70f13f73980d40238e3e21c14934d037563d930f",
    "48198a0aa7c14058229493d22530f4dbfa336f6e0ac925139543aed44cce7c37",
    "20fd51f69458705ac68cd4fe6b6b13abdc9746512969328454f18faf8c595f64",
    "2477fe96bb2a941d5bcd1d4ac8cc49880708fa9b378e3c4f3a9060bee67cf9a4",
    "a4a695811051907e162753b56b0f6b410dba74d8a84b2a14b3144e0ef1284754",
    "fd17ed950d5965b4b9dd46582db1178d169c6bc465b0d6ff9ca3928fef5b9ae4",
    "e418fc15e83ebea0f87fa9ff5eed70050ded2849f47bf959d956850ce929851f",
    "0d8115f635b105ee2e4e15d04b2454bf6f4fadf034b10403119cd8e3b92fcc5b",
);

/// The well-known 2048-bit server prime.
pub fn known_prime() -> BigUint {
    BigUint::parse_bytes(KNOWN_PRIME.as_bytes(), 16).unwrap_or_default()
}

fn invalid(reason: &'static str) -> CryptoError {
    CryptoError::InvalidDhParameters { reason }
}

/// Check `p` and `g` as received in `server_DH_inner_data`.
pub fn check_prime_and_generator(prime: &BigUint, g: u32) -> Result<(), CryptoError> {
    if prime.bits() != DH_PRIME_BITS {
        return Err(invalid("prime is not 2048 bits"));
    }

    // g must be a quadratic residue condition-wise, so that it generates the
    // (p-1)/2 subgroup.
    let residue_ok = match g {
        2 => rem(prime, 8) == 7,
        3 => rem(prime, 3) == 2,
        4 => true,
        5 => matches!(rem(prime, 5), 1 | 4),
        6 => matches!(rem(prime, 24), 19 | 23),
        7 => matches!(rem(prime, 7), 3 | 5 | 6),
        _ => return Err(invalid("generator outside 2..=7")),
    };
    if !residue_ok {
        return Err(invalid("generator does not match prime residue"));
    }

    if *prime != known_prime() {
        if !is_probable_prime(prime)? {
            return Err(invalid("modulus is not prime"));
        }
        let half = (prime - 1u32) >> 1;
        if !is_probable_prime(&half)? {
            return Err(invalid("modulus is not a safe prime"));
        }
    }
    Ok(())
}

/// Check that a public value (`g_a` or `g_b`) is safely inside the group:
/// `1 < v < p-1` and `2^{2048-64} < v < p - 2^{2048-64}`.
pub fn check_public_value(value: &BigUint, prime: &BigUint) -> Result<(), CryptoError> {
    let one = BigUint::one();
    if *value <= one || *value >= prime - &one {
        return Err(invalid("public value outside (1, p-1)"));
    }
    let margin = BigUint::one() << (DH_PRIME_BITS - 64);
    if *value <= margin || *value >= prime - &margin {
        return Err(invalid("public value too close to the group bounds"));
    }
    Ok(())
}

/// Validate the server's group and `g_a`, then derive our half and the secret.
///
/// Returns `(g_b, g_ab)`, i.e. `g^b mod p` and `g_a^b mod p`.
pub fn compute_shared_secret(
    g: u32,
    prime: &BigUint,
    b: &BigUint,
    g_a: &BigUint,
) -> Result<(BigUint, BigUint), CryptoError> {
    check_prime_and_generator(prime, g)?;
    check_public_value(g_a, prime)?;

    let g_b = BigUint::from(g).modpow(b, prime);
    check_public_value(&g_b, prime)?;

    let g_ab = g_a.modpow(b, prime);
    Ok((g_b, g_ab))
}

fn rem(n: &BigUint, m: u32) -> u32 {
    let r = n % m;
    r.iter_u32_digits().next().unwrap_or(0)
}

// ─── Primality ───────────────────────────────────────────────────────────────

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Miller-Rabin with random bases, after trial division by small primes.
pub fn is_probable_prime(n: &BigUint) -> Result<bool, CryptoError> {
    let two = BigUint::from(2u32);
    if *n < two {
        return Ok(false);
    }
    for p in SMALL_PRIMES {
        if *n == BigUint::from(p) {
            return Ok(true);
        }
        if rem(n, p) == 0 {
            return Ok(false);
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    // Random bases in [2, n-2].
    let span = n - 3u32;
    let width = n.to_bytes_be().len();
    let mut raw = vec![0u8; width];

    'rounds: for _ in 0..MILLER_RABIN_ROUNDS {
        getrandom::getrandom(&mut raw).map_err(|_| CryptoError::Rng)?;
        let a = BigUint::from_bytes_be(&raw) % &span + &two;

        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'rounds;
            }
            if x.is_one() {
                return Ok(false);
            }
        }
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prime_parses_to_2048_bits() {
        assert_eq!(known_prime().bits(), 2048);
    }

    #[test]
    fn generator_residue_rules() {
        let p = known_prime();
        assert!(check_prime_and_generator(&p, 3).is_ok());
        assert!(check_prime_and_generator(&p, 4).is_ok());
        assert!(check_prime_and_generator(&p, 7).is_ok());
        assert!(check_prime_and_generator(&p, 2).is_err());
        assert!(check_prime_and_generator(&p, 5).is_err());
        assert!(check_prime_and_generator(&p, 9).is_err());
    }

    #[test]
    fn composite_modulus_is_rejected() {
        // known_prime() + 2 is composite and still 2048 bits; g = 4 has no
        // residue condition so only the primality test can reject it.
        let p = known_prime() + 2u32;
        assert_eq!(
            check_prime_and_generator(&p, 4),
            Err(CryptoError::InvalidDhParameters { reason: "modulus is not prime" })
        );
    }

    #[test]
    fn prime_that_is_not_safe_is_rejected() {
        // 2^2047 + 2895 is prime but (p-1)/2 is not.
        let p = (BigUint::one() << 2047u32) + 2895u32;
        assert_eq!(
            check_prime_and_generator(&p, 4),
            Err(CryptoError::InvalidDhParameters { reason: "modulus is not a safe prime" })
        );
    }

    #[test]
    fn short_prime_is_rejected() {
        let p = BigUint::from(23u32);
        assert!(check_prime_and_generator(&p, 4).is_err());
    }

    #[test]
    fn public_value_bounds() {
        let p = known_prime();
        assert!(check_public_value(&BigUint::one(), &p).is_err());
        assert!(check_public_value(&(&p - 1u32), &p).is_err());
        assert!(check_public_value(&BigUint::from(12345u32), &p).is_err());
        assert!(check_public_value(&(&p >> 1), &p).is_ok());
    }

    #[test]
    fn small_primality() {
        assert!(is_probable_prime(&BigUint::from(1_000_000_007u32)).unwrap());
        assert!(!is_probable_prime(&BigUint::from(1_000_000_008u32)).unwrap());
        assert!(!is_probable_prime(&BigUint::from(561u32)).unwrap());
        assert!(is_probable_prime(&BigUint::from(97u32)).unwrap());
    }

    #[test]
    fn both_sides_agree() {
        let p = known_prime();
        let a = BigUint::from_bytes_be(&[0x5a; 256]) % &p;
        let b = BigUint::from_bytes_be(&[0xa5; 256]) % &p;
        let g_a = BigUint::from(3u32).modpow(&a, &p);
        let (g_b, secret) = compute_shared_secret(3, &p, &b, &g_a).unwrap();
        assert_eq!(g_b.modpow(&a, &p), secret);
    }
}
