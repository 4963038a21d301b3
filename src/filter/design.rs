//! Filter design.
//!
//! **IIR**: Butterworth in second-order sections, matching
//! `scipy.signal.butter(order, Wn, btype, output='sos')`:
//!   • analog prototype poles on the unit circle (`buttap`)
//!   • frequency pre-warp + lowpass→{low,high,band,stop} transform
//!   • bilinear transform (fs = 2)
//!   • pole/zero pairing into sections (`zpk2sos`, "nearest" pairing)
//!
//! **FIR**: Hamming-windowed sinc with MNE-style automatic transition
//! bandwidth and length.
use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use crate::config::FilterBand;
use crate::error::{ErpError, Result};

/// One second-order section: `[b0, b1, b2, a0, a1, a2]`.
pub type Sos = [f64; 6];

// ── Butterworth ──────────────────────────────────────────────────────────────

/// Design a digital Butterworth filter of `order` for `band` at `sfreq`.
///
/// Band filters have `2 * order` poles.  Every cutoff must lie strictly
/// between 0 and Nyquist.
pub fn butter(order: usize, sfreq: f64, band: FilterBand) -> Result<Vec<Sos>> {
    if order < 1 {
        return Err(ErpError::config(format!("filter order < 1: {order}")));
    }
    let nyq = sfreq / 2.0;
    let mut wn = Vec::with_capacity(2);
    for f in band.cutoffs() {
        if !(f > 0.0 && f < nyq) {
            return Err(ErpError::config(format!(
                "{} cutoff {f} Hz must lie in (0, {nyq}) Hz",
                band.name()
            )));
        }
        wn.push(f / nyq);
    }

    // Pre-warp for the bilinear transform at fs = 2.
    let fs = 2.0;
    let warped: Vec<f64> = wn.iter().map(|w| 2.0 * fs * (PI * w / fs).tan()).collect();

    let (z, p, k) = buttap(order);
    let (z, p, k) = match band {
        FilterBand::Lowpass(_) => lp2lp_zpk(&z, &p, k, warped[0]),
        FilterBand::Highpass(_) => lp2hp_zpk(&z, &p, k, warped[0]),
        FilterBand::Bandpass(..) => {
            let (bw, wo) = (warped[1] - warped[0], (warped[0] * warped[1]).sqrt());
            lp2bp_zpk(&z, &p, k, wo, bw)
        }
        FilterBand::Bandstop(..) => {
            let (bw, wo) = (warped[1] - warped[0], (warped[0] * warped[1]).sqrt());
            lp2bs_zpk(&z, &p, k, wo, bw)
        }
    };
    let (z, p, k) = bilinear_zpk(&z, &p, k, fs);
    Ok(zpk2sos(z, p, k))
}

type Zpk = (Vec<Complex64>, Vec<Complex64>, f64);

/// Analog Butterworth prototype: no zeros, `n` poles on the left half of
/// the unit circle, unit gain.
fn buttap(n: usize) -> Zpk {
    let n_i = n as i64;
    let p = (-n_i + 1..n_i)
        .step_by(2)
        .map(|m| -Complex64::from_polar(1.0, PI * m as f64 / (2.0 * n as f64)))
        .collect();
    (vec![], p, 1.0)
}

fn prod(v: impl Iterator<Item = Complex64>) -> Complex64 {
    v.fold(Complex64::new(1.0, 0.0), |acc, x| acc * x)
}

fn lp2lp_zpk(z: &[Complex64], p: &[Complex64], k: f64, wo: f64) -> Zpk {
    let degree = (p.len() - z.len()) as i32;
    (
        z.iter().map(|&v| v * wo).collect(),
        p.iter().map(|&v| v * wo).collect(),
        k * wo.powi(degree),
    )
}

fn lp2hp_zpk(z: &[Complex64], p: &[Complex64], k: f64, wo: f64) -> Zpk {
    let degree = p.len() - z.len();
    let mut z_hp: Vec<Complex64> = z.iter().map(|&v| wo / v).collect();
    z_hp.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    let p_hp = p.iter().map(|&v| wo / v).collect();
    let k_hp = k * (prod(z.iter().map(|&v| -v)) / prod(p.iter().map(|&v| -v))).re;
    (z_hp, p_hp, k_hp)
}

/// `x ± sqrt(x² − wo²)` for every root, "+" branch first.
fn split_roots(roots: &[Complex64], wo: f64) -> Vec<Complex64> {
    let wo2 = Complex64::new(wo * wo, 0.0);
    let plus = roots.iter().map(|&v| v + (v * v - wo2).sqrt());
    let minus = roots.iter().map(|&v| v - (v * v - wo2).sqrt());
    plus.chain(minus).collect()
}

fn lp2bp_zpk(z: &[Complex64], p: &[Complex64], k: f64, wo: f64, bw: f64) -> Zpk {
    let degree = p.len() - z.len();
    let z_lp: Vec<Complex64> = z.iter().map(|&v| v * bw / 2.0).collect();
    let p_lp: Vec<Complex64> = p.iter().map(|&v| v * bw / 2.0).collect();
    let mut z_bp = split_roots(&z_lp, wo);
    z_bp.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    (z_bp, split_roots(&p_lp, wo), k * bw.powi(degree as i32))
}

fn lp2bs_zpk(z: &[Complex64], p: &[Complex64], k: f64, wo: f64, bw: f64) -> Zpk {
    let degree = p.len() - z.len();
    let z_hp: Vec<Complex64> = z.iter().map(|&v| (bw / 2.0) / v).collect();
    let p_hp: Vec<Complex64> = p.iter().map(|&v| (bw / 2.0) / v).collect();
    let mut z_bs = split_roots(&z_hp, wo);
    z_bs.extend(std::iter::repeat(Complex64::new(0.0, wo)).take(degree));
    z_bs.extend(std::iter::repeat(Complex64::new(0.0, -wo)).take(degree));
    let k_bs = k * (prod(z.iter().map(|&v| -v)) / prod(p.iter().map(|&v| -v))).re;
    (z_bs, split_roots(&p_hp, wo), k_bs)
}

fn bilinear_zpk(z: &[Complex64], p: &[Complex64], k: f64, fs: f64) -> Zpk {
    let degree = p.len() - z.len();
    let fs2 = Complex64::new(2.0 * fs, 0.0);
    let mut z_z: Vec<Complex64> = z.iter().map(|&v| (fs2 + v) / (fs2 - v)).collect();
    z_z.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
    let p_z = p.iter().map(|&v| (fs2 + v) / (fs2 - v)).collect();
    let k_z = k * (prod(z.iter().map(|&v| fs2 - v)) / prod(p.iter().map(|&v| fs2 - v))).re;
    (z_z, p_z, k_z)
}

// ── zpk → second-order sections ──────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Any,
    Real,
    Complex,
}

#[inline]
fn is_real(c: &Complex64) -> bool {
    c.im == 0.0
}

/// Keep one root per conjugate pair (positive imaginary part) followed by
/// the real roots, which are snapped to the real axis.
fn cplxreal(roots: &[Complex64]) -> Vec<Complex64> {
    let tol = 100.0 * f64::EPSILON;
    let mut cplx = Vec::new();
    let mut real = Vec::new();
    for r in roots {
        if r.im.abs() <= tol * r.norm() {
            real.push(Complex64::new(r.re, 0.0));
        } else if r.im > 0.0 {
            cplx.push(*r);
        }
    }
    cplx.sort_by(|a, b| a.re.total_cmp(&b.re).then(a.im.total_cmp(&b.im)));
    real.sort_by(|a, b| a.re.total_cmp(&b.re));
    cplx.extend(real);
    cplx
}

/// Index of the root in `from` closest to `to`, restricted to `kind`.
fn nearest(from: &[Complex64], to: Complex64, kind: Kind) -> Option<usize> {
    let mut order: Vec<usize> = (0..from.len()).collect();
    order.sort_by(|&a, &b| (from[a] - to).norm().total_cmp(&(from[b] - to).norm()));
    order.into_iter().find(|&i| match kind {
        Kind::Any => true,
        Kind::Real => is_real(&from[i]),
        Kind::Complex => !is_real(&from[i]),
    })
}

fn take_nearest(from: &mut Vec<Complex64>, to: Complex64, kind: Kind) -> Complex64 {
    let idx = nearest(from, to, kind)
        .or_else(|| nearest(from, to, Kind::Any))
        .unwrap_or(0);
    from.remove(idx)
}

/// Real polynomial coefficients of `prod(x - r)`.
fn poly(roots: &[Complex64]) -> Vec<f64> {
    let mut c = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        let mut next = c.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 0..c.len() {
            next[i + 1] -= r * c[i];
        }
        c = next;
    }
    c.into_iter().map(|v| v.re).collect()
}

/// One section from up to two zeros and two poles, right-aligned as scipy does.
fn single_sos(z: &[Complex64], p: &[Complex64]) -> Sos {
    let (b, a) = (poly(z), poly(p));
    let mut sos = [0.0; 6];
    sos[3 - b.len()..3].copy_from_slice(&b);
    sos[6 - a.len()..6].copy_from_slice(&a);
    sos
}

/// Pair poles and zeros into second-order sections.
///
/// Poles closest to the unit circle go into the **last** sections, each
/// paired with its nearest zeros.  The overall gain lands in section 0.
pub fn zpk2sos(mut z: Vec<Complex64>, mut p: Vec<Complex64>, k: f64) -> Vec<Sos> {
    let zero = Complex64::new(0.0, 0.0);
    if z.len() < p.len() {
        z.resize(p.len(), zero);
    } else {
        p.resize(z.len(), zero);
    }
    let n_sections = (p.len() + 1) / 2;
    if p.len() % 2 == 1 {
        p.push(zero);
        z.push(zero);
    }
    let mut z = cplxreal(&z);
    let mut p = cplxreal(&p);

    let mut sos = vec![[0.0; 6]; n_sections];
    for si in (0..n_sections).rev() {
        let p1_idx = (0..p.len())
            .min_by(|&a, &b| (1.0 - p[a].norm()).abs().total_cmp(&(1.0 - p[b].norm()).abs()))
            .unwrap_or(0);
        let p1 = p.remove(p1_idx);
        let n_real_p = p.iter().filter(|c| is_real(c)).count();
        let n_real_z = z.iter().filter(|c| is_real(c)).count();

        sos[si] = if is_real(&p1) && n_real_p == 0 {
            // Lone real pole.
            let z1 = take_nearest(&mut z, p1, Kind::Real);
            single_sos(&[z1, zero], &[p1, zero])
        } else if p.len() + 1 == z.len() && !is_real(&p1) && n_real_p == 1 && n_real_z == 1 {
            // Complex pole must pair with a complex zero so the last real
            // pole keeps its real zero.
            let z1 = take_nearest(&mut z, p1, Kind::Complex);
            single_sos(&[z1, z1.conj()], &[p1, p1.conj()])
        } else {
            let p2 = if is_real(&p1) {
                let idx = (0..p.len())
                    .filter(|&i| is_real(&p[i]))
                    .min_by(|&a, &b| (p[a].norm() - 1.0).abs().total_cmp(&(p[b].norm() - 1.0).abs()))
                    .unwrap_or(0);
                p.remove(idx)
            } else {
                p1.conj()
            };
            if z.is_empty() {
                single_sos(&[], &[p1, p2])
            } else {
                let z1 = take_nearest(&mut z, p1, Kind::Any);
                if !is_real(&z1) {
                    single_sos(&[z1, z1.conj()], &[p1, p2])
                } else if !z.is_empty() {
                    let z2 = take_nearest(&mut z, p1, Kind::Real);
                    single_sos(&[z1, z2], &[p1, p2])
                } else {
                    single_sos(&[z1], &[p1, p2])
                }
            }
        };
    }
    if let Some(first) = sos.first_mut() {
        first[..3].iter_mut().for_each(|b| *b *= k);
    }
    sos
}

// ── FIR ──────────────────────────────────────────────────────────────────────

/// MNE-compatible lower transition bandwidth: `min(max(0.25 * f, 2), f)`.
pub fn auto_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// MNE-compatible upper transition bandwidth:
/// `min(max(0.25 * f, 2), nyq - f)`.
pub fn auto_upper_trans_bandwidth(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of FIR taps for a transition bandwidth: `ceil(3.3 / trans_bw * sfreq)`
/// rounded up to odd.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n_raw = (3.3 / trans_bw * sfreq).ceil() as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

/// Design a zero-phase FIR filter for `band` at `sfreq`.
///
/// Built from DC-normalised lowpass kernels, so highpass and bandpass
/// kernels sum to exactly zero and lowpass and bandstop kernels to one.
/// The −6 dB points sit in the middle of each transition band; for
/// band-stop filters they sit on the band edges.
pub fn design_fir(band: FilterBand, sfreq: f64) -> Result<Vec<f64>> {
    let nyq = sfreq / 2.0;
    for f in band.cutoffs() {
        if !(f > 0.0 && f < nyq) {
            return Err(ErpError::config(format!(
                "{} cutoff {f} Hz must lie in (0, {nyq}) Hz",
                band.name()
            )));
        }
    }
    let trans_bw = match band {
        FilterBand::Highpass(l) => auto_trans_bandwidth(l),
        FilterBand::Lowpass(h) => auto_upper_trans_bandwidth(h, sfreq),
        FilterBand::Bandpass(l, h) | FilterBand::Bandstop(l, h) => {
            auto_trans_bandwidth(l).min(auto_upper_trans_bandwidth(h, sfreq))
        }
    };
    if !(trans_bw > 0.0) {
        return Err(ErpError::config(format!("{band} leaves no room for a transition band")));
    }
    let n = auto_filter_length(trans_bw, sfreq);

    let h = match band {
        FilterBand::Lowpass(h) => firwin(n, h + auto_upper_trans_bandwidth(h, sfreq) / 2.0, sfreq, true),
        FilterBand::Highpass(l) => firwin(n, l - auto_trans_bandwidth(l) / 2.0, sfreq, false),
        FilterBand::Bandpass(l, h) => {
            let lo = firwin(n, l - auto_trans_bandwidth(l) / 2.0, sfreq, true);
            let hi = firwin(n, h + auto_upper_trans_bandwidth(h, sfreq) / 2.0, sfreq, true);
            hi.iter().zip(&lo).map(|(a, b)| a - b).collect()
        }
        FilterBand::Bandstop(l, h) => {
            // delta − bandpass(l, h)
            let lo = firwin(n, l, sfreq, true);
            let hi = firwin(n, h, sfreq, true);
            let mut k: Vec<f64> = lo.iter().zip(&hi).map(|(a, b)| a - b).collect();
            k[n / 2] += 1.0;
            k
        }
    };
    Ok(h)
}

/// Hamming-windowed sinc with a single cutoff, normalised to unit DC gain.
///
/// `pass_zero=true` gives a lowpass; `false` a highpass by spectral
/// inversion.  `n` must be odd.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64, pass_zero: bool) -> Vec<f64> {
    debug_assert!(n % 2 == 1, "firwin requires odd N for linear-phase filter");
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);
    let win = hamming(n);

    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            // sin(π·fc·x) / (π·x), → fc at x = 0
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();

    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);

    if !pass_zero {
        h.iter_mut().for_each(|v| *v = -*v);
        h[n / 2] += 1.0;
    }
    h
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}
