//! Fourier transform abstraction
//!
//! Engines only see `FourierTransform`: a fixed power-of-two real transform
//! producing the non-redundant half spectrum (`size / 2 + 1` bins). The
//! inverse is scaled by `1 / size`, so `inverse(forward(x)) == x`.
//!
//! Two backends are provided:
//! - `RealFourierTransform` (realfft, the default)
//! - `ComplexFourierTransform` (rustfft, full complex transform reduced to the half spectrum)

use std::sync::Arc;

use parking_lot::Mutex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use cv_core::{ConvError, ConvResult, Sample};

/// Largest supported transform order (size = 1 << order)
pub const MAX_FFT_ORDER: u32 = 24;

/// Fixed-size real-input transform
pub trait FourierTransform: Send {
    /// Time-domain block length
    fn size(&self) -> usize;

    /// Number of half-spectrum bins
    fn spectrum_len(&self) -> usize {
        self.size() / 2 + 1
    }

    /// Time block → half spectrum. `input` is used as scratch.
    fn forward(&mut self, input: &mut [Sample], spectrum: &mut [Complex<Sample>]) -> ConvResult<()>;

    /// Half spectrum → time block (scaled by 1/size). `spectrum` is used as scratch.
    fn inverse(&mut self, spectrum: &mut [Complex<Sample>], output: &mut [Sample]) -> ConvResult<()>;
}

/// Creates correctly sized transforms
pub trait FourierTransformFactory: Send + Sync {
    fn create(&self, size: usize) -> ConvResult<Box<dyn FourierTransform>>;

    /// Create a transform of size `1 << order`
    fn create_order(&self, order: u32) -> ConvResult<Box<dyn FourierTransform>> {
        if order == 0 || order > MAX_FFT_ORDER {
            return Err(ConvError::InvalidFftSize(1usize.checked_shl(order).unwrap_or(0)));
        }
        self.create(1 << order)
    }
}

fn check_size(size: usize) -> ConvResult<()> {
    if size < 2 || !size.is_power_of_two() || size > (1 << MAX_FFT_ORDER) {
        return Err(ConvError::InvalidFftSize(size));
    }
    Ok(())
}

fn check_lengths(size: usize, time: usize, spectrum: usize) -> ConvResult<()> {
    if time != size || spectrum != size / 2 + 1 {
        return Err(ConvError::Fft(format!(
            "buffer length mismatch: time {time}, spectrum {spectrum} for size {size}"
        )));
    }
    Ok(())
}

// ============ realfft backend ============

/// Real-input FFT (realfft), half the work of a complex transform
pub struct RealFourierTransform {
    size: usize,
    forward: Arc<dyn RealToComplex<Sample>>,
    inverse: Arc<dyn ComplexToReal<Sample>>,
    forward_scratch: Vec<Complex<Sample>>,
    inverse_scratch: Vec<Complex<Sample>>,
    scale: Sample,
}

impl RealFourierTransform {
    pub fn new(size: usize) -> ConvResult<Self> {
        let mut planner = RealFftPlanner::<Sample>::new();
        Self::with_planner(size, &mut planner)
    }

    fn with_planner(size: usize, planner: &mut RealFftPlanner<Sample>) -> ConvResult<Self> {
        check_size(size)?;
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();

        Ok(Self {
            size,
            forward,
            inverse,
            forward_scratch,
            inverse_scratch,
            scale: 1.0 / size as Sample,
        })
    }
}

impl FourierTransform for RealFourierTransform {
    fn size(&self) -> usize {
        self.size
    }

    fn forward(&mut self, input: &mut [Sample], spectrum: &mut [Complex<Sample>]) -> ConvResult<()> {
        check_lengths(self.size, input.len(), spectrum.len())?;
        self.forward
            .process_with_scratch(input, spectrum, &mut self.forward_scratch)
            .map_err(|e| ConvError::Fft(e.to_string()))
    }

    fn inverse(&mut self, spectrum: &mut [Complex<Sample>], output: &mut [Sample]) -> ConvResult<()> {
        check_lengths(self.size, output.len(), spectrum.len())?;

        // DC and Nyquist bins of a real signal are real
        spectrum[0].im = 0.0;
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.0;
        }

        self.inverse
            .process_with_scratch(spectrum, output, &mut self.inverse_scratch)
            .map_err(|e| ConvError::Fft(e.to_string()))?;

        for x in output.iter_mut() {
            *x *= self.scale;
        }
        Ok(())
    }
}

// ============ rustfft backend ============

/// Complex FFT (rustfft) exposing the same half-spectrum layout
pub struct ComplexFourierTransform {
    size: usize,
    forward: Arc<dyn Fft<Sample>>,
    inverse: Arc<dyn Fft<Sample>>,
    buffer: Vec<Complex<Sample>>,
    scratch: Vec<Complex<Sample>>,
    scale: Sample,
}

impl ComplexFourierTransform {
    pub fn new(size: usize) -> ConvResult<Self> {
        let mut planner = FftPlanner::<Sample>::new();
        Self::with_planner(size, &mut planner)
    }

    fn with_planner(size: usize, planner: &mut FftPlanner<Sample>) -> ConvResult<Self> {
        check_size(size)?;
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Ok(Self {
            size,
            forward,
            inverse,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            scale: 1.0 / size as Sample,
        })
    }
}

impl FourierTransform for ComplexFourierTransform {
    fn size(&self) -> usize {
        self.size
    }

    fn forward(&mut self, input: &mut [Sample], spectrum: &mut [Complex<Sample>]) -> ConvResult<()> {
        check_lengths(self.size, input.len(), spectrum.len())?;

        for (bin, &x) in self.buffer.iter_mut().zip(input.iter()) {
            *bin = Complex::new(x, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        spectrum.copy_from_slice(&self.buffer[..self.size / 2 + 1]);
        Ok(())
    }

    fn inverse(&mut self, spectrum: &mut [Complex<Sample>], output: &mut [Sample]) -> ConvResult<()> {
        check_lengths(self.size, output.len(), spectrum.len())?;
        let half = self.size / 2;

        // Rebuild the conjugate-symmetric full spectrum
        self.buffer[0] = Complex::new(spectrum[0].re, 0.0);
        self.buffer[half] = Complex::new(spectrum[half].re, 0.0);
        for k in 1..half {
            self.buffer[k] = spectrum[k];
            self.buffer[self.size - k] = spectrum[k].conj();
        }

        self.inverse
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (x, bin) in output.iter_mut().zip(self.buffer.iter()) {
            *x = bin.re * self.scale;
        }
        Ok(())
    }
}

// ============ Factories ============

/// realfft-backed factory; plans are cached by the shared planner
pub struct RealFftFactory {
    planner: Mutex<RealFftPlanner<Sample>>,
}

impl RealFftFactory {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(RealFftPlanner::new()),
        }
    }
}

impl Default for RealFftFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FourierTransformFactory for RealFftFactory {
    fn create(&self, size: usize) -> ConvResult<Box<dyn FourierTransform>> {
        let mut planner = self.planner.lock();
        Ok(Box::new(RealFourierTransform::with_planner(size, &mut planner)?))
    }
}

/// rustfft-backed factory
pub struct ComplexFftFactory {
    planner: Mutex<FftPlanner<Sample>>,
}

impl ComplexFftFactory {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for ComplexFftFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FourierTransformFactory for ComplexFftFactory {
    fn create(&self, size: usize) -> ConvResult<Box<dyn FourierTransform>> {
        let mut planner = self.planner.lock();
        Ok(Box::new(ComplexFourierTransform::with_planner(size, &mut planner)?))
    }
}

/// Factory used when callers do not supply one
pub fn default_factory() -> Arc<dyn FourierTransformFactory> {
    Arc::new(RealFftFactory::new())
}

/// Allocate a zeroed half spectrum for a transform of `size`
pub fn spectrum_buffer(size: usize) -> Vec<Complex<Sample>> {
    vec![Complex::new(0.0, 0.0); size / 2 + 1]
}
