//! Pollard-rho (Brent variant) factorization of the `pq` challenge.

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn abs_sub(a: u128, b: u128) -> u128 { a.max(b) - a.min(b) }

fn step(y: u128, c: u128, n: u128) -> u128 { (y * y % n + c) % n }

/// One Brent run with polynomial `x² + c`. Returns a divisor of `n`, which
/// may be trivial (`1` or `n`).
fn brent(n: u128, c: u128) -> u128 {
    const BATCH: u128 = 128;

    let mut y = 2u128;
    let mut x = y;
    let mut ys = y;
    let mut g = 1u128;
    let mut r = 1u128;
    let mut q = 1u128;

    while g == 1 {
        x = y;
        for _ in 0..r {
            y = step(y, c, n);
        }
        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..BATCH.min(r - k) {
                y = step(y, c, n);
                q = q * abs_sub(x, y) % n;
            }
            g = gcd(q, n);
            k += BATCH;
        }
        r *= 2;
    }

    if g == n {
        // The batch overshot; replay it one step at a time.
        loop {
            ys = step(ys, c, n);
            g = gcd(abs_sub(x, ys), n);
            if g > 1 {
                break;
            }
        }
    }
    g
}

/// Split `pq` into two factors `(p, q)` with `p ≤ q`.
///
/// Returns `None` when no non-trivial split is found (`pq` prime, or below 4).
pub fn factorize(pq: u64) -> Option<(u64, u64)> {
    if pq < 4 {
        return None;
    }
    if pq % 2 == 0 {
        return Some((2, pq / 2));
    }
    let n = pq as u128;
    for c in [1u128, 3, 5, 7, 11, 13, 17, 19] {
        let g = brent(n, c);
        if g != 1 && g != n {
            let (a, b) = (g as u64, (n / g) as u64);
            return Some((a.min(b), a.max(b)));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_handshake_sized_products() {
        assert_eq!(factorize(1470626929934143021), Some((1206429347, 1218991343)));
        assert_eq!(factorize(2363612107535801713), Some((1518968219, 1556064227)));
    }

    #[test]
    fn even_and_tiny_inputs() {
        assert_eq!(factorize(10), Some((2, 5)));
        assert_eq!(factorize(3), None);
    }

    #[test]
    fn prime_has_no_split() {
        assert_eq!(factorize(1_000_000_007), None);
    }
}
