/*! Reed-Solomon codec over GF(256).

The field is defined by the reducing polynomial x⁸+x⁴+x³+x²+1 (0x11D)
with primitive element α=2, and the generator polynomials start at the
first consecutive root α¹ (FCR=1). These parameters match the FX.25
specification, and are the same field the kernel librs and Dire Wolf
use.

Decoding is the classic Berlekamp-Massey / Chien / Forney sequence. Up
to T/2 symbol errors are corrected for T parity bytes; beyond that the
decode fails without touching the buffer.
 */
use log::trace;

use crate::{Error, Result};

const PRIM_POLY: u16 = 0x11d;

// exp table doubled so gf_mul can skip the mod 255.
const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= PRIM_POLY;
        }
        i += 1;
    }
    let mut j = 255;
    while j < 512 {
        exp[j] = exp[j - 255];
        j += 1;
    }
    (exp, log)
}

static GF: ([u8; 512], [u8; 256]) = build_tables();

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF.0[GF.1[a as usize] as usize + GF.1[b as usize] as usize]
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0);
    GF.0[255 - GF.1[a as usize] as usize]
}

// α^p for p < 255.
#[inline]
fn gf_exp(p: usize) -> u8 {
    GF.0[p % 255]
}

// Evaluate a polynomial (ascending coefficient order) at x.
fn poly_eval(poly: &[u8], x: u8) -> u8 {
    poly.iter()
        .rev()
        .fold(0u8, |acc, &c| gf_mul(acc, x) ^ c)
}

/// A Reed-Solomon codec for a fixed parity length.
///
/// The generator polynomial is built once at construction; FX.25 keeps
/// three of these around (T = 16, 32, 64) so the hot path never
/// recomputes it.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    nroots: usize,
    // Descending coefficient order, monic: genpoly[0] == 1.
    genpoly: Vec<u8>,
}

impl ReedSolomon {
    /// Create a codec appending `nroots` parity bytes.
    pub fn new(nroots: usize) -> Self {
        // generator = Π (x - α^i) for i in 1..=nroots (FCR = 1).
        let mut g = vec![1u8];
        for i in 1..=nroots {
            let root = gf_exp(i);
            let mut ng = vec![0u8; g.len() + 1];
            for (j, &c) in g.iter().enumerate() {
                ng[j] ^= c;
                ng[j + 1] ^= gf_mul(c, root);
            }
            g = ng;
        }
        trace!("ReedSolomon: generator for {nroots} roots ready");
        Self { nroots, genpoly: g }
    }

    /// Parity bytes appended by this codec.
    pub fn parity_len(&self) -> usize {
        self.nroots
    }

    /// Systematic encode: compute parity over `buf[..k]` and write it
    /// into `buf[k..k + parity_len()]`.
    pub fn encode(&self, buf: &mut [u8], k: usize) {
        assert!(buf.len() >= k + self.nroots);
        let mut rem = vec![0u8; self.nroots];
        for i in 0..k {
            let coef = buf[i] ^ rem[0];
            rem.rotate_left(1);
            rem[self.nroots - 1] = 0;
            if coef != 0 {
                for (r, &g) in rem.iter_mut().zip(&self.genpoly[1..]) {
                    *r ^= gf_mul(g, coef);
                }
            }
        }
        buf[k..k + self.nroots].copy_from_slice(&rem);
    }

    /// Decode `buf[..k + parity_len()]` in place.
    ///
    /// Returns the number of corrected byte errors, or
    /// [`Error::FecUncorrectable`] when there are more than T/2 of
    /// them. On failure the buffer is left untouched.
    pub fn decode(&self, buf: &mut [u8], k: usize) -> Result<usize> {
        let n = k + self.nroots;
        assert!(buf.len() >= n);
        let msg = &buf[..n];

        // Syndromes S_j = c(α^(1+j)).
        let mut synd = vec![0u8; self.nroots];
        let mut clean = true;
        for (j, s) in synd.iter_mut().enumerate() {
            let x = gf_exp(1 + j);
            *s = msg.iter().fold(0u8, |acc, &b| gf_mul(acc, x) ^ b);
            if *s != 0 {
                clean = false;
            }
        }
        if clean {
            return Ok(0);
        }

        let lambda = self.error_locator(&synd)?;
        let nerrs = lambda.len() - 1;

        // Chien search: an error at degree d means Λ(α^-d) == 0. The
        // buffer index is n-1-d.
        let mut err_pos = Vec::new();
        for d in 0..n {
            let x = gf_exp(255 - (d % 255));
            if poly_eval(&lambda, x) == 0 {
                err_pos.push(n - 1 - d);
            }
        }
        if err_pos.len() != nerrs {
            trace!(
                "ReedSolomon: locator degree {} but {} roots",
                nerrs,
                err_pos.len()
            );
            return Err(Error::FecUncorrectable);
        }

        // Forney: Ω(x) = S(x)·Λ(x) mod x^nroots, and with FCR=1 the
        // magnitude at X is Ω(X⁻¹) / Λ'(X⁻¹).
        let mut omega = vec![0u8; self.nroots];
        for (i, &s) in synd.iter().enumerate() {
            for (j, &l) in lambda.iter().enumerate() {
                if i + j < self.nroots {
                    omega[i + j] ^= gf_mul(s, l);
                }
            }
        }
        // Formal derivative of Λ: only odd-power terms survive in
        // characteristic 2.
        let mut dlambda = vec![0u8; lambda.len().saturating_sub(1)];
        for (i, d) in dlambda.iter_mut().enumerate() {
            if i.is_multiple_of(2) {
                *d = lambda[i + 1];
            }
        }

        let mut fixes = Vec::with_capacity(nerrs);
        for &pos in &err_pos {
            let d = n - 1 - pos;
            let x_inv = gf_exp(255 - (d % 255));
            let den = poly_eval(&dlambda, x_inv);
            if den == 0 {
                return Err(Error::FecUncorrectable);
            }
            let mag = gf_mul(poly_eval(&omega, x_inv), gf_inv(den));
            fixes.push((pos, mag));
        }
        for &(pos, mag) in &fixes {
            buf[pos] ^= mag;
        }
        trace!("ReedSolomon: corrected {} bytes", fixes.len());
        Ok(fixes.len())
    }

    // Berlekamp-Massey. Returns Λ in ascending coefficient order,
    // Λ[0] == 1.
    fn error_locator(&self, synd: &[u8]) -> Result<Vec<u8>> {
        let mut lambda = vec![1u8];
        let mut prev = vec![1u8];
        let mut l = 0usize;
        let mut m = 1usize;
        let mut b = 1u8;
        for n in 0..self.nroots {
            let mut delta = synd[n];
            for i in 1..lambda.len() {
                if i <= n {
                    delta ^= gf_mul(lambda[i], synd[n - i]);
                }
            }
            if delta == 0 {
                m += 1;
                continue;
            }
            let scale = gf_mul(delta, gf_inv(b));
            // λ(x) ← λ(x) - δ/b · x^m · B(x)
            let mut next = lambda.clone();
            if next.len() < prev.len() + m {
                next.resize(prev.len() + m, 0);
            }
            for (i, &c) in prev.iter().enumerate() {
                next[i + m] ^= gf_mul(scale, c);
            }
            if 2 * l <= n {
                prev = lambda;
                b = delta;
                l = n + 1 - l;
                m = 1;
            } else {
                m += 1;
            }
            lambda = next;
        }
        // Trim trailing zeros so degree matches the error count.
        while lambda.len() > 1 && *lambda.last().unwrap() == 0 {
            lambda.pop();
        }
        if 2 * l > self.nroots || lambda.len() - 1 != l {
            return Err(Error::FecUncorrectable);
        }
        Ok(lambda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn codeword(rs: &ReedSolomon, k: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut buf = vec![0u8; k + rs.parity_len()];
        rng.fill(&mut buf[..k]);
        rs.encode(&mut buf, k);
        buf
    }

    #[test]
    fn field_sanity() {
        // α^255 = 1, and inverses invert.
        assert_eq!(gf_exp(0), 1);
        assert_eq!(gf_exp(255), 1);
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1);
        }
        // 0x11d reduction: α^8 = α^4+α^3+α^2+1 = 0x1d.
        assert_eq!(gf_exp(8), 0x1d);
    }

    #[test]
    fn clean_round_trip() -> crate::Result<()> {
        for &t in &[16usize, 32, 64] {
            let rs = ReedSolomon::new(t);
            for &k in &[32usize, 64, 128, 191, 223, 239] {
                if k + t > 255 {
                    continue;
                }
                let mut buf = codeword(&rs, k, 7);
                let orig = buf.clone();
                assert_eq!(rs.decode(&mut buf, k)?, 0);
                assert_eq!(buf, orig);
            }
        }
        Ok(())
    }

    #[test]
    fn corrects_up_to_half_parity() -> crate::Result<()> {
        let mut rng = StdRng::seed_from_u64(42);
        for &(k, t) in &[(239usize, 16usize), (128, 32), (64, 64), (32, 16)] {
            let rs = ReedSolomon::new(t);
            let orig = codeword(&rs, k, 99);
            for nerr in [1, t / 4, t / 2] {
                let mut buf = orig.clone();
                let mut positions: Vec<usize> = (0..k + t).collect();
                positions.shuffle(&mut rng);
                for &p in positions.iter().take(nerr) {
                    buf[p] ^= rng.random_range(1..=255u8) as u8;
                }
                let fixed = rs.decode(&mut buf, k)?;
                assert_eq!(fixed, nerr);
                assert_eq!(buf, orig);
            }
        }
        Ok(())
    }

    #[test]
    fn too_many_errors_fails_without_corruption() {
        let mut rng = StdRng::seed_from_u64(3);
        let rs = ReedSolomon::new(16);
        let k = 64;
        let orig = codeword(&rs, k, 1);
        let mut buf = orig.clone();
        // Way beyond T errors.
        let mut positions: Vec<usize> = (0..k + 16).collect();
        positions.shuffle(&mut rng);
        for &p in positions.iter().take(20) {
            buf[p] ^= rng.random_range(1..=255u8) as u8;
        }
        let damaged = buf.clone();
        match rs.decode(&mut buf, k) {
            Err(Error::FecUncorrectable) => assert_eq!(buf, damaged),
            Ok(n) => {
                // A decode "success" on garbage is a miscorrection; it
                // must at least stay within the claimed error budget.
                assert!(n <= 8);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn eight_errors_fx25_largest_mode() -> crate::Result<()> {
        // The (239,16) FX.25 mode with 8 byte errors, the headline FEC
        // case.
        let mut rng = StdRng::seed_from_u64(5);
        let rs = ReedSolomon::new(16);
        let orig = codeword(&rs, 239, 11);
        let mut buf = orig.clone();
        let mut positions: Vec<usize> = (0..255).collect();
        positions.shuffle(&mut rng);
        for &p in positions.iter().take(8) {
            buf[p] ^= 0x5a;
        }
        assert_eq!(rs.decode(&mut buf, 239)?, 8);
        assert_eq!(buf, orig);
        Ok(())
    }

    #[test]
    fn parity_region_errors_corrected() -> crate::Result<()> {
        let rs = ReedSolomon::new(32);
        let k = 128;
        let orig = codeword(&rs, k, 8);
        let mut buf = orig.clone();
        for p in [k, k + 5, k + 31] {
            buf[p] ^= 0xff;
        }
        assert_eq!(rs.decode(&mut buf, k)?, 3);
        assert_eq!(buf, orig);
        Ok(())
    }
}
