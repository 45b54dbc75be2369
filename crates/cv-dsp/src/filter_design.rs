//! Fixed-pole parallel filter design
//!
//! Pole pairs are placed on a logarithmic frequency grid (optionally warped
//! towards low or high frequencies), with radii set by the spacing of
//! neighbouring poles so adjacent resonances overlap. With the poles fixed the
//! numerators and the FIR part are linear in the target, so they are found by
//! one least-squares solve against the IR head.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use cv_core::{ConvError, ConvResult, Sample};

use crate::filter_bank::{FilterBank, SecondOrderSection};

/// Upper bound on pole pairs per bank
pub const MAX_SECTIONS: usize = 512;
/// Upper bound on taps of the direct FIR path
pub const MAX_FIR_TAPS: usize = 256;
/// Highest pole angle as a fraction of Nyquist
const MAX_POLE_FRACTION: f64 = 0.95;
/// Relative singular value cutoff for the least-squares solve
const SOLVE_EPSILON: f64 = 1e-12;

/// Parallel filter approximation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelFilterConfig {
    /// Number of second-order sections (pole pairs)
    pub sections: usize,
    /// Taps of the parallel FIR path
    pub fir_order: usize,
    /// Lowest pole frequency in Hz
    pub min_frequency: f64,
    /// Allpass warping coefficient in (-1, 1); positive moves poles up
    pub warp: f64,
    /// Longest IR the fit accepts, in samples; the fit always spans the whole IR
    pub fit_length: usize,
}

impl Default for ParallelFilterConfig {
    fn default() -> Self {
        Self {
            sections: 64,
            fir_order: 8,
            min_frequency: 20.0,
            warp: 0.0,
            fit_length: 16384,
        }
    }
}

impl ParallelFilterConfig {
    pub fn validate(&self) -> ConvResult<()> {
        if self.sections == 0 && self.fir_order == 0 {
            return Err(ConvError::FilterDesign("no sections and no FIR taps".into()));
        }
        if self.sections > MAX_SECTIONS {
            return Err(ConvError::FilterDesign(format!(
                "{} sections (max {MAX_SECTIONS})",
                self.sections
            )));
        }
        if self.fir_order > MAX_FIR_TAPS {
            return Err(ConvError::FilterDesign(format!(
                "FIR order {} (max {MAX_FIR_TAPS})",
                self.fir_order
            )));
        }
        if !self.min_frequency.is_finite() || self.min_frequency <= 0.0 {
            return Err(ConvError::FilterDesign(format!(
                "min frequency {} Hz",
                self.min_frequency
            )));
        }
        if self.warp.is_nan() || self.warp.abs() >= 1.0 {
            return Err(ConvError::FilterDesign(format!("warp {}", self.warp)));
        }
        if self.fit_length == 0 {
            return Err(ConvError::FilterDesign("empty fit length".into()));
        }
        Ok(())
    }
}

/// Frequency mapping of the first-order allpass `(z^-1 - λ) / (1 - λ z^-1)`
#[inline]
pub fn warp_frequency(omega: f64, lambda: f64) -> f64 {
    omega + 2.0 * (lambda * omega.sin() / (1.0 - lambda * omega.cos())).atan()
}

/// Pole angles in rad/sample, ascending
fn pole_angles(config: &ParallelFilterConfig, sample_rate: f64) -> Vec<f64> {
    let k = config.sections;
    if k == 0 {
        return Vec::new();
    }
    let max = MAX_POLE_FRACTION * PI;
    let min = (2.0 * PI * config.min_frequency / sample_rate).min(max);

    (0..k)
        .map(|i| {
            let t = if k > 1 { i as f64 / (k - 1) as f64 } else { 0.0 };
            let theta = min * (max / min).powf(t);
            if config.warp == 0.0 {
                theta
            } else {
                warp_frequency(theta, config.warp).clamp(f64::EPSILON, max)
            }
        })
        .collect()
}

/// Denominators `(a1, a2)` of every section
///
/// Each pole sits at angle `θ_k` with radius `exp(-Δθ_k / 2)`, where `Δθ_k`
/// is half the distance between its neighbours (one-sided at the ends).
pub fn design_poles(config: &ParallelFilterConfig, sample_rate: f64) -> ConvResult<Vec<(f64, f64)>> {
    config.validate()?;
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(ConvError::InvalidSampleRate(sample_rate));
    }

    let theta = pole_angles(config, sample_rate);
    let k = theta.len();

    let poles = (0..k)
        .map(|i| {
            let spacing = match (i, k) {
                (_, 1) => theta[0],
                (0, _) => theta[1] - theta[0],
                (i, k) if i == k - 1 => theta[i] - theta[i - 1],
                (i, _) => (theta[i + 1] - theta[i - 1]) / 2.0,
            };
            let radius = (-spacing.max(f64::EPSILON) / 2.0).exp();
            (-2.0 * radius * theta[i].cos(), radius * radius)
        })
        .collect();

    Ok(poles)
}

/// All-pole impulse response `1 / (1 + a1 z^-1 + a2 z^-2)`
fn all_pole_response(a1: f64, a2: f64, len: usize) -> Vec<f64> {
    let mut h = vec![0.0; len];
    for n in 0..len {
        let x = if n == 0 { 1.0 } else { 0.0 };
        let y1 = if n >= 1 { h[n - 1] } else { 0.0 };
        let y2 = if n >= 2 { h[n - 2] } else { 0.0 };
        h[n] = x - a1 * y1 - a2 * y2;
    }
    h
}

/// Fit a parallel filter bank to one IR channel
///
/// The fit covers every sample of `target`. A target longer than
/// `config.fit_length` is rejected instead of being cut short.
pub fn design(target: &[Sample], config: &ParallelFilterConfig, sample_rate: f64) -> ConvResult<FilterBank> {
    let poles = design_poles(config, sample_rate)?;
    let len = target.len();
    if len > config.fit_length {
        return Err(ConvError::ImpulseTooLong {
            len,
            max: config.fit_length,
        });
    }
    if len == 0 {
        return Ok(FilterBank::default());
    }

    // Basis: per section its all-pole response and the same delayed by one,
    // then unit impulses for the FIR taps
    let fir_order = config.fir_order.min(len);
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(2 * poles.len() + fir_order);
    for &(a1, a2) in &poles {
        let u = all_pole_response(a1, a2, len);
        let mut delayed = vec![0.0; len];
        delayed[1..].copy_from_slice(&u[..len - 1]);
        basis.push(u);
        basis.push(delayed);
    }
    for tap in 0..fir_order {
        let mut delta = vec![0.0; len];
        delta[tap] = 1.0;
        basis.push(delta);
    }

    let m = DMatrix::from_fn(len, basis.len(), |r, c| basis[c][r]);
    let h = DVector::from_column_slice(target);

    let svd = m.svd(true, true);
    let eps = svd.singular_values.max() * SOLVE_EPSILON;
    let solution = svd
        .solve(&h, eps)
        .map_err(|e| ConvError::FilterDesign(e.to_string()))?;

    if solution.iter().any(|v| !v.is_finite()) {
        return Err(ConvError::FilterDesign("non-finite coefficients".into()));
    }

    let sections = poles
        .iter()
        .enumerate()
        .map(|(k, &(a1, a2))| SecondOrderSection::new(solution[2 * k], solution[2 * k + 1], 0.0, a1, a2))
        .collect::<Vec<_>>();
    let fir = (0..fir_order).map(|j| solution[2 * poles.len() + j]).collect();

    let bank = FilterBank::new(sections, fir);
    log::debug!(
        "Parallel filter design: {} sections, {} FIR taps over {} samples",
        bank.len(),
        fir_order,
        len
    );
    Ok(bank)
}
