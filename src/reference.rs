//! Average reference: subtract the mean across good channels at each time point.
//!
//! `data`: [C, T]  →  `data[c, t] -= mean(data[good, t])`
//!
//! Bad channels (1-based indices) are left out of the mean but are still
//! re-referenced themselves.
use ndarray::{Array1, Array2, Axis};

use crate::error::{ErpError, Result};

pub fn average_reference_inplace(data: &mut Array2<f32>, bads: &[usize]) -> Result<()> {
    let good: Vec<usize> = (0..data.nrows()).filter(|c| !bads.contains(&(c + 1))).collect();
    if good.is_empty() {
        return Err(ErpError::processing("No good channels from which to build reference"));
    }

    let mut reference = Array1::<f64>::zeros(data.ncols());
    for &c in &good {
        reference.zip_mut_with(&data.row(c), |r, &v| *r += v as f64);
    }
    let reference = reference.mapv(|r| (r / good.len() as f64) as f32);
    for mut row in data.axis_iter_mut(Axis(0)) {
        row -= &reference;
    }
    Ok(())
}
