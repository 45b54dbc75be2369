//! Parallel second-order sections
//!
//! A `FilterBank` is the IR representation used by the parallel-filter
//! engine: the input runs through every section independently and the
//! section outputs are summed with a short FIR part. Sections are processed
//! in Transposed Direct Form II.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use cv_core::Sample;

/// Second-order section coefficients, `a0` normalized to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondOrderSection {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
    /// Output gain applied after the section
    pub gain: f64,
}

impl Default for SecondOrderSection {
    fn default() -> Self {
        Self::bypass()
    }
}

impl SecondOrderSection {
    pub fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            gain: 1.0,
        }
    }

    /// Unity pass-through
    pub fn bypass() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 0.0)
    }

    /// Both poles strictly inside the unit circle (stability triangle)
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }

    /// Complex response at normalized angular frequency `omega` (rad/sample)
    pub fn frequency_response(&self, omega: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        num / den * self.gain
    }

    /// First `len` samples of the section's impulse response
    pub fn impulse_response(&self, len: usize) -> Vec<Sample> {
        let mut state = SectionState::default();
        (0..len)
            .map(|n| state.tick(self, if n == 0 { 1.0 } else { 0.0 }))
            .collect()
    }
}

/// Running state of one section
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionState {
    z1: f64,
    z2: f64,
}

impl SectionState {
    #[inline(always)]
    pub fn tick(&mut self, c: &SecondOrderSection, input: Sample) -> Sample {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output * c.gain
    }

    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Sections summed in parallel plus a direct FIR path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterBank {
    sections: Vec<SecondOrderSection>,
    fir: Vec<Sample>,
}

impl FilterBank {
    pub fn new(sections: Vec<SecondOrderSection>, fir: Vec<Sample>) -> Self {
        Self { sections, fir }
    }

    pub fn sections(&self) -> &[SecondOrderSection] {
        &self.sections
    }

    pub fn fir(&self) -> &[Sample] {
        &self.fir
    }

    /// Number of sections
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// No sections and no FIR taps: the bank is an empty kernel
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.fir.is_empty()
    }

    pub fn is_stable(&self) -> bool {
        self.sections.iter().all(SecondOrderSection::is_stable)
    }

    /// Summed response at `omega` (rad/sample)
    pub fn frequency_response(&self, omega: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -omega);
        let mut zk = Complex::new(1.0, 0.0);
        let mut fir = Complex::new(0.0, 0.0);
        for &tap in &self.fir {
            fir += zk * tap;
            zk *= z1;
        }
        self.sections
            .iter()
            .fold(fir, |acc, s| acc + s.frequency_response(omega))
    }

    /// First `len` samples of the bank's impulse response
    pub fn impulse_response(&self, len: usize) -> Vec<Sample> {
        let mut out = vec![0.0; len];
        for (y, &tap) in out.iter_mut().zip(self.fir.iter()) {
            *y += tap;
        }
        for section in &self.sections {
            for (y, h) in out.iter_mut().zip(section.impulse_response(len)) {
                *y += h;
            }
        }
        out
    }
}
