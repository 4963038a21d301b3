//! Zero-phase filter application.
//!
//! **IIR**: forward-backward second-order-section filtering, matching
//! `scipy.signal.sosfiltfilt(sos, x, padtype='constant')`.  Each side is
//! padded with `3 * ntaps` copies of the edge sample and both passes start
//! from steady-state initial conditions (`sosfilt_zi`), so a constant input
//! comes out unchanged by a unity-DC-gain filter.
//!
//! **FIR**: overlap-add FFT convolution, matching MNE's
//! `_overlap_add_filter`.  Zero phase comes from shifting the output left by
//! `(N-1)/2` samples; edges are reflect-limited padded by `N-1` samples.
use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

use super::design::{butter, design_fir, Sos};
use crate::config::{FilterMethod, FilterSpec};
use crate::error::{ErpError, Result};

/// Filter every channel of `data` ([C, T]) with `spec`, returning a new array.
pub fn apply_filter(data: &Array2<f32>, spec: &FilterSpec, sfreq: f64) -> Result<Array2<f32>> {
    let mut out = data.clone();
    apply_filter_inplace(&mut out, spec, sfreq)?;
    Ok(out)
}

/// In-place variant of [`apply_filter`].
pub fn apply_filter_inplace(data: &mut Array2<f32>, spec: &FilterSpec, sfreq: f64) -> Result<()> {
    match spec.method {
        FilterMethod::Iir => {
            let sos = butter(spec.order, sfreq, spec.band)?;
            apply_sos_zero_phase(data, &sos)
        }
        FilterMethod::Fir => {
            let h = design_fir(spec.band, sfreq)?;
            apply_fir_zero_phase(data, &h)
        }
    }
}

fn filter_rows(data: &mut Array2<f32>, f: impl Fn(&[f64]) -> Result<Vec<f64>>) -> Result<()> {
    for mut row in data.rows_mut() {
        let x: Vec<f64> = row.iter().map(|&v| v as f64).collect();
        let y = f(&x)?;
        row.iter_mut().zip(y).for_each(|(o, v)| *o = v as f32);
    }
    Ok(())
}

// ── IIR ──────────────────────────────────────────────────────────────────────

/// Forward-backward SOS filtering of each channel of `data` ([C, T]).
pub fn apply_sos_zero_phase(data: &mut Array2<f32>, sos: &[Sos]) -> Result<()> {
    filter_rows(data, |x| sosfiltfilt(sos, x))
}

/// Steady-state initial conditions for a step response, one `[z0, z1]` per
/// section, scaled by the DC gain of the preceding sections.
pub fn sosfilt_zi(sos: &[Sos]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    let mut zi = Vec::with_capacity(sos.len());
    for s in sos {
        let [b0, b1, b2, _, a1, a2] = normalise(s);
        let (r0, r1) = (b1 - a1 * b0, b2 - a2 * b0);
        let z0 = (r0 + r1) / (1.0 + a1 + a2);
        let z1 = r1 - a2 * z0;
        zi.push([scale * z0, scale * z1]);
        scale *= (b0 + b1 + b2) / (1.0 + a1 + a2);
    }
    zi
}

fn normalise(s: &Sos) -> Sos {
    let a0 = s[3];
    [s[0] / a0, s[1] / a0, s[2] / a0, 1.0, s[4] / a0, s[5] / a0]
}

/// Cascade of transposed direct-form II sections.
///
/// `zi` holds the per-section state and is updated in place.
pub fn sosfilt(sos: &[Sos], x: &[f64], zi: &mut [[f64; 2]]) -> Vec<f64> {
    let sections: Vec<Sos> = sos.iter().map(normalise).collect();
    x.iter()
        .map(|&v| {
            let mut v = v;
            for (s, z) in sections.iter().zip(zi.iter_mut()) {
                let y = s[0] * v + z[0];
                z[0] = s[1] * v - s[4] * y + z[1];
                z[1] = s[2] * v - s[5] * y;
                v = y;
            }
            v
        })
        .collect()
}

/// Edge padding length used by `sosfiltfilt`: `3 * ntaps`, where sections
/// whose trailing coefficients are zero do not count towards `ntaps`.
pub fn sos_padlen(sos: &[Sos]) -> usize {
    let zero_b2 = sos.iter().filter(|s| s[2] == 0.0).count();
    let zero_a2 = sos.iter().filter(|s| s[5] == 0.0).count();
    3 * (2 * sos.len() + 1 - zero_b2.min(zero_a2))
}

/// Zero-phase forward-backward filtering of one signal.
///
/// Fails if the signal is not longer than the edge padding.
pub fn sosfiltfilt(sos: &[Sos], x: &[f64]) -> Result<Vec<f64>> {
    let n = x.len();
    let edge = sos_padlen(sos);
    if n <= edge {
        return Err(ErpError::processing(format!(
            "signal of {n} samples is too short for filtering (needs more than {edge})"
        )));
    }

    let mut ext = Vec::with_capacity(n + 2 * edge);
    ext.extend(std::iter::repeat(x[0]).take(edge));
    ext.extend_from_slice(x);
    ext.extend(std::iter::repeat(x[n - 1]).take(edge));

    let zi = sosfilt_zi(sos);
    let with_x0 = |x0: f64| -> Vec<[f64; 2]> { zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect() };

    let mut state = with_x0(ext[0]);
    let mut y = sosfilt(sos, &ext, &mut state);
    y.reverse();

    let mut state = with_x0(y[0]);
    let mut y = sosfilt(sos, &y, &mut state);
    y.reverse();

    Ok(y[edge..edge + n].to_vec())
}

// ── FIR ──────────────────────────────────────────────────────────────────────

/// Apply a zero-phase FIR filter to each channel of `data` ([C, T]) in-place.
///
/// `h` must have odd length (guaranteed by `design_fir`).
pub fn apply_fir_zero_phase(data: &mut Array2<f32>, h: &[f64]) -> Result<()> {
    filter_rows(data, |x| Ok(filter_1d(x, h)))
}

/// Filter a single signal with the overlap-add algorithm.
///
/// Returns a vector of the same length as `x`.
pub fn filter_1d(x: &[f64], h: &[f64]) -> Vec<f64> {
    let n_x = x.len();
    let n_h = h.len();
    if n_x == 0 || n_h == 0 {
        return x.to_vec();
    }

    let shift = (n_h - 1) / 2;
    let n_edge = n_h - 1;

    let x_ext = reflect_limited_pad(x, n_edge);
    let n_ext = x_ext.len();

    let n_fft = choose_fft_len(n_h, n_ext);
    let n_seg = n_fft - n_h + 1;
    let n_segments = n_ext.div_ceil(n_seg);

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fft_fwd = planner.plan_fft_forward(n_fft);
    let fft_inv = planner.plan_fft_inverse(n_fft);
    let inv_scale = 1.0 / n_fft as f64;

    let mut h_fft = zero_padded(h, n_fft);
    fft_fwd.process(&mut h_fft);

    let mut x_filtered = vec![0.0_f64; n_ext];
    for seg_idx in 0..n_segments {
        let start = seg_idx * n_seg;
        let stop = (start + n_seg).min(n_ext);

        let mut buf = zero_padded(&x_ext[start..stop], n_fft);
        fft_fwd.process(&mut buf);
        for (b, &hf) in buf.iter_mut().zip(h_fft.iter()) {
            *b *= hf;
        }
        fft_inv.process(&mut buf);

        // Accumulate, shifted left for zero phase.
        let out_start = start.saturating_sub(shift);
        let out_end = (start + n_fft).saturating_sub(shift).min(n_ext);
        let prod_start = shift.saturating_sub(start);
        for (o, p) in (out_start..out_end).zip(prod_start..n_fft) {
            x_filtered[o] += buf[p].re * inv_scale;
        }
    }

    x_filtered[n_edge..n_edge + n_x].to_vec()
}

fn zero_padded(x: &[f64], n: usize) -> Vec<Complex<f64>> {
    x.iter()
        .map(|&v| Complex { re: v, im: 0.0 })
        .chain(std::iter::repeat(Complex::default()))
        .take(n)
        .collect()
}

/// Reflect-limited padding (MNE's `_smart_pad`) of `n_pad` samples per side.
///
/// Left:  `2*x[0] - x[i]`, right: `2*x[-1] - x[-1-i]`.  Padding beyond the
/// signal length is filled with zeros.
fn reflect_limited_pad(x: &[f64], n_pad: usize) -> Vec<f64> {
    let n = x.len();
    let reach = n_pad.min(n - 1);
    let (first, last) = (x[0], x[n - 1]);

    let mut out = Vec::with_capacity(n + 2 * n_pad);
    out.extend(std::iter::repeat(0.0).take(n_pad - reach));
    out.extend((1..=reach).rev().map(|i| 2.0 * first - x[i]));
    out.extend_from_slice(x);
    out.extend((1..=reach).map(|i| 2.0 * last - x[n - 1 - i]));
    out.extend(std::iter::repeat(0.0).take(n_pad - reach));
    out
}

/// Power-of-two FFT block size minimising MNE's cost function:
/// `ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`.
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;
    let max_pow = (n_x as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow.max(min_pow);
    let mut best_cost = f64::INFINITY;
    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft {
            continue;
        }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}
