//! Impulse response preparation tools
//!
//! All tools run on the loader thread and return a new `ImpulseResponse`.
//! Spectral tools zero-pad each channel to a power of two, work on the half
//! spectrum, and return the padded length.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

use cv_core::{ConvResult, Sample, db_to_gain};

use crate::fourier::{FourierTransformFactory, spectrum_buffer};
use crate::impulse::ImpulseResponse;

/// Magnitude floor used by `invert_magnitude`
const INVERT_FLOOR: f64 = 1e-4;

/// Smallest average magnitude `normalize` divides by
const NORMALIZE_FLOOR: f64 = 1e-4;

/// Normalization weighting band
const NORMALIZE_HP_HZ: f64 = 50.0;
const NORMALIZE_LP_HZ: f64 = 20000.0;

// ============ Time-domain tools ============

/// Average all channels into one
pub fn make_mono(ir: &ImpulseResponse) -> ConvResult<ImpulseResponse> {
    let scale = 1.0 / ir.num_channels() as Sample;
    let mono = (0..ir.len())
        .map(|i| ir.channels().iter().map(|c| c[i]).sum::<Sample>() * scale)
        .collect();
    ir.derive(vec![mono])
}

/// Zero-pad to the next power of two (no-op for empty or power-of-two lengths)
pub fn zero_pad_to_pow2(ir: &ImpulseResponse) -> ConvResult<ImpulseResponse> {
    if ir.is_empty() || ir.len().is_power_of_two() {
        return Ok(ir.clone());
    }
    let len = ir.len().next_power_of_two();
    let channels = ir
        .channels()
        .iter()
        .map(|c| {
            let mut padded = c.clone();
            padded.resize(len, 0.0);
            padded
        })
        .collect();
    ir.derive(channels)
}

/// Drop the tail whose relative RMS (tail energy over total, worst channel)
/// is below `db_threshold`. An all-silent IR keeps a single zero tap.
pub fn truncate(ir: &ImpulseResponse, db_threshold: f64) -> ConvResult<ImpulseResponse> {
    if ir.is_empty() {
        return Ok(ir.clone());
    }
    let threshold = db_to_gain(db_threshold);
    let full = ir.energy();

    let mut tail = vec![0.0; ir.num_channels()];
    let mut new_len = 1;
    for i in (0..ir.len()).rev() {
        for (ch, acc) in tail.iter_mut().enumerate() {
            let s = ir.channels()[ch][i];
            *acc += s * s;
        }
        let relative = tail
            .iter()
            .zip(full.iter())
            .filter(|&(_, &f)| f > 0.0)
            .map(|(t, f)| t / f)
            .fold(0.0, f64::max)
            .sqrt();

        if relative >= threshold {
            new_len = i + 1;
            break;
        }
    }

    if new_len == ir.len() {
        return Ok(ir.clone());
    }
    let channels = ir.channels().iter().map(|c| c[..new_len].to_vec()).collect();
    ir.derive(channels)
}

/// Hann-windowed sinc resampling to `target_rate`
///
/// Band-limited to the lower of the two rates; sample values are scaled so
/// the kernel keeps its DC gain.
pub fn resample(ir: &ImpulseResponse, target_rate: f64, window_width: usize) -> ConvResult<ImpulseResponse> {
    let source_rate = ir.sample_rate();
    if (target_rate - source_rate).abs() < f64::EPSILON {
        return Ok(ir.clone());
    }

    let ratio = target_rate / source_rate;
    let source_len = ir.len();
    let target_len = (ratio * source_len as f64).round() as usize;
    let cutoff = ratio.min(1.0);
    let window_width = window_width.max(2);
    let windowed = source_len > window_width;

    let channels = ir
        .channels()
        .iter()
        .map(|source| {
            (0..target_len)
                .map(|i| {
                    let center = i as f64 / ratio;
                    let (k_min, k_max) = if windowed {
                        let half = 0.5 * window_width as f64;
                        (
                            ((center - half).floor().max(0.0)) as usize,
                            ((center + half).ceil() as usize).min(source_len - 1),
                        )
                    } else {
                        (0, source_len - 1)
                    };
                    let span = (k_max - k_min) as f64 + 1e-4;

                    let mut acc = 0.0;
                    for k in k_min..=k_max {
                        let x = (center - k as f64) * cutoff;
                        let mut w = if x.abs() < 1e-6 {
                            1.0
                        } else {
                            (PI * x).sin() / (PI * x)
                        };
                        if windowed {
                            w *= 0.5 * (1.0 - (2.0 * PI * (k - k_min) as f64 / span).cos());
                        }
                        acc += w * source[k];
                    }
                    acc * cutoff / ratio
                })
                .collect()
        })
        .collect();

    let resampled = ImpulseResponse::new(channels, target_rate)?;
    Ok(resampled.with_gain(ir.gain()))
}

/// Combined magnitude of one-pole high-pass and low-pass responses at `f`
pub fn frequency_weight(f: f64, fs: f64, f_hp: f64, f_lp: f64, hp_order: u32, lp_order: u32) -> f64 {
    let z_inv = Complex::from_polar(1.0, -2.0 * PI * f / fs);

    let b_lp = 1.0 - (-2.0 * PI * f_lp / fs).exp();
    let b_hp = 1.0 - (-2.0 * PI * f_hp / fs).exp();

    let one = Complex::new(1.0, 0.0);
    let h_lp = (z_inv * 0.5 + 0.5) * b_lp / (one + z_inv * (b_lp - 1.0));
    let h_hp = one - b_hp / (one + z_inv * (b_hp - 1.0));

    h_hp.norm().powi(hp_order as i32) * h_lp.norm().powi(lp_order as i32)
}

// ============ Spectral tools ============

/// Half-spectrum bin multiplicity when summing over the full spectrum
#[inline]
fn bin_multiplicity(k: usize, half: usize) -> f64 {
    if k == 0 || k == half { 1.0 } else { 2.0 }
}

/// Run `op` on the half spectrum of every channel (padded to a power of two)
fn map_spectra<F>(ir: &ImpulseResponse, factory: &dyn FourierTransformFactory, mut op: F) -> ConvResult<ImpulseResponse>
where
    F: FnMut(&mut [Complex<Sample>], usize),
{
    if ir.len() < 2 {
        return Ok(ir.clone());
    }
    let size = ir.len().next_power_of_two();
    let mut fft = factory.create(size)?;
    let mut spectrum = spectrum_buffer(size);

    let mut channels = Vec::with_capacity(ir.num_channels());
    for source in ir.channels() {
        let mut time = source.clone();
        time.resize(size, 0.0);
        fft.forward(&mut time, &mut spectrum)?;
        op(&mut spectrum, size);
        fft.inverse(&mut spectrum, &mut time)?;
        channels.push(time);
    }
    ir.derive(channels)
}

/// Invert the magnitude response, keeping the phase
pub fn invert_magnitude(ir: &ImpulseResponse, factory: &dyn FourierTransformFactory) -> ConvResult<ImpulseResponse> {
    map_spectra(ir, factory, |spectrum, _| {
        for bin in spectrum.iter_mut() {
            let magnitude = bin.norm().max(INVERT_FLOOR);
            *bin /= magnitude * magnitude;
        }
    })
}

/// Fade the magnitude response toward its weighted average outside the
/// `f_hp`..`f_lp` band. Phase is kept.
pub fn fade_out(
    ir: &ImpulseResponse,
    f_hp: f64,
    f_lp: f64,
    hp_order: u32,
    lp_order: u32,
    factory: &dyn FourierTransformFactory,
) -> ConvResult<ImpulseResponse> {
    let fs = ir.sample_rate();
    map_spectra(ir, factory, |spectrum, size| {
        let half = size / 2;
        let weights: Vec<f64> = (0..=half)
            .map(|k| frequency_weight(fs * k as f64 / size as f64, fs, f_hp, f_lp, hp_order, lp_order))
            .collect();

        let mut x_sum = 0.0;
        let mut w_sum = 0.0;
        for (k, (bin, w)) in spectrum.iter().zip(weights.iter()).enumerate() {
            let m = bin_multiplicity(k, half);
            x_sum += m * bin.norm() * w;
            w_sum += m * w;
        }
        if w_sum <= 0.0 {
            return;
        }
        let average = x_sum / w_sum;

        for (bin, w) in spectrum.iter_mut().zip(weights.iter()) {
            let magnitude = w * bin.norm() + (1.0 - w) * average;
            *bin = Complex::from_polar(magnitude, bin.arg());
        }
    })
}

/// Fractional-octave smoothing of the magnitude response (box window of
/// `width` octaves). Phase is kept.
pub fn octave_smooth(ir: &ImpulseResponse, width: f64, factory: &dyn FourierTransformFactory) -> ConvResult<ImpulseResponse> {
    let width = width.max(0.0);
    if width == 0.0 {
        return Ok(ir.clone());
    }
    let spread = 2.0_f64.powf(0.5 * width);

    map_spectra(ir, factory, |spectrum, size| {
        let half = size / 2;

        // Prefix sums make each window O(1)
        let mut prefix = Vec::with_capacity(half + 2);
        prefix.push(0.0);
        for bin in spectrum.iter() {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + bin.norm());
        }
        let nyquist_magnitude = spectrum[half].norm();

        let smoothed: Vec<f64> = (0..=half)
            .map(|i| {
                let f_max = i as f64 * spread;
                let f_min = i as f64 / spread;
                let lo = f_min.ceil() as usize;
                let hi = lo + (f_max - f_min).floor() as usize;

                let inside = hi.min(half);
                let mut sum = prefix[inside + 1] - prefix[lo.min(inside)];
                if hi > half {
                    sum += (hi - half) as f64 * nyquist_magnitude;
                }
                sum / (hi - lo + 1) as f64
            })
            .collect();

        for (bin, magnitude) in spectrum.iter_mut().zip(smoothed) {
            *bin = Complex::from_polar(magnitude, bin.arg());
        }
    })
}

/// Scale so the weighted average spectral magnitude is 1. The applied gain is
/// recorded on the result.
pub fn normalize(ir: &ImpulseResponse, factory: &dyn FourierTransformFactory) -> ConvResult<ImpulseResponse> {
    if ir.len() < 2 {
        return Ok(ir.clone());
    }
    let fs = ir.sample_rate();
    let size = ir.len().next_power_of_two();
    let half = size / 2;
    let weighted = ir.len() > 16;

    let mut fft = factory.create(size)?;
    let mut spectrum = spectrum_buffer(size);
    let mut average = 0.0;

    for source in ir.channels() {
        let mut time = source.clone();
        time.resize(size, 0.0);
        fft.forward(&mut time, &mut spectrum)?;

        let mut x_sum = 0.0;
        let mut w_sum = 0.0;
        for (k, bin) in spectrum.iter().enumerate() {
            let w = if weighted {
                let f = fs * k as f64 / size as f64;
                frequency_weight(f, fs, NORMALIZE_HP_HZ, NORMALIZE_LP_HZ, 2, 2)
            } else {
                1.0
            };
            let m = bin_multiplicity(k, half);
            x_sum += m * bin.norm() * w;
            w_sum += m * w;
        }
        if w_sum > 0.0 {
            average += x_sum / w_sum;
        }
    }

    average = (average / ir.num_channels() as f64).max(NORMALIZE_FLOOR);
    let gain = 1.0 / average;

    let channels = ir
        .channels()
        .iter()
        .map(|c| c.iter().map(|s| s * gain).collect())
        .collect();
    Ok(ir.derive(channels)?.with_gain(ir.gain() * gain))
}

/// Minimum-phase version with the same magnitude response (real cepstrum folding)
pub fn make_min_phase(ir: &ImpulseResponse, factory: &dyn FourierTransformFactory) -> ConvResult<ImpulseResponse> {
    if ir.len() < 2 {
        return Ok(ir.clone());
    }
    let size = ir.len().next_power_of_two();
    let half = size / 2;
    let min_magnitude = (-60.0_f64).exp();

    let mut fft = factory.create(size)?;
    let mut spectrum = spectrum_buffer(size);
    let mut channels = Vec::with_capacity(ir.num_channels());

    for source in ir.channels() {
        let mut time = source.clone();
        time.resize(size, 0.0);
        fft.forward(&mut time, &mut spectrum)?;

        // Log magnitude → real cepstrum
        for bin in spectrum.iter_mut() {
            *bin = Complex::new(bin.norm().max(min_magnitude).ln(), 0.0);
        }
        fft.inverse(&mut spectrum, &mut time)?;

        // Fold the anti-causal part onto the causal part
        for (n, c) in time.iter_mut().enumerate() {
            *c *= match n {
                0 => 1.0,
                n if n < half => 2.0,
                n if n == half => 1.0,
                _ => 0.0,
            };
        }

        fft.forward(&mut time, &mut spectrum)?;
        for bin in spectrum.iter_mut() {
            *bin = bin.exp();
        }
        fft.inverse(&mut spectrum, &mut time)?;
        channels.push(time);
    }
    ir.derive(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourier::RealFftFactory;

    const FS: f64 = 48000.0;

    fn dirac(len: usize, at: usize, gain: f64) -> ImpulseResponse {
        let mut samples = vec![0.0; len];
        samples[at] = gain;
        ImpulseResponse::mono(samples, FS).unwrap()
    }

    #[test]
    fn test_make_mono_averages() {
        let ir = ImpulseResponse::stereo(vec![1.0, 0.0], vec![0.0, 1.0], FS).unwrap();
        let mono = make_mono(&ir).unwrap();
        assert_eq!(mono.num_channels(), 1);
        assert_eq!(mono.channel(0), &[0.5, 0.5]);
    }

    #[test]
    fn test_zero_pad_to_pow2() {
        let ir = ImpulseResponse::mono(vec![1.0; 5], FS).unwrap();
        let padded = zero_pad_to_pow2(&ir).unwrap();
        assert_eq!(padded.len(), 8);
        assert_eq!(&padded.channel(0)[5..], &[0.0, 0.0, 0.0]);

        let empty = ImpulseResponse::mono(Vec::new(), FS).unwrap();
        assert!(zero_pad_to_pow2(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_drops_silent_tail() {
        let mut samples: Vec<f64> = (0..64).map(|i| 0.5_f64.powi(i)).collect();
        samples.extend(std::iter::repeat_n(0.0, 192));
        let ir = ImpulseResponse::mono(samples, FS).unwrap();

        let cut = truncate(&ir, -60.0).unwrap();
        assert!(cut.len() < 20, "len {}", cut.len());
        assert_eq!(cut.channel(0)[0], 1.0);

        let silent = ImpulseResponse::mono(vec![0.0; 32], FS).unwrap();
        assert_eq!(truncate(&silent, -60.0).unwrap().channel(0), &[0.0]);
    }

    #[test]
    fn test_invert_magnitude_of_scaled_dirac() {
        let factory = RealFftFactory::new();
        let inverted = invert_magnitude(&dirac(16, 0, 2.0), &factory).unwrap();
        assert!((inverted.channel(0)[0] - 0.5).abs() < 1e-9);
        assert!(inverted.channel(0)[1..].iter().all(|s| s.abs() < 1e-9));
    }

    #[test]
    fn test_fade_out_with_unit_weight_is_identity() {
        let factory = RealFftFactory::new();
        let ir = ImpulseResponse::mono((0..32).map(|i| (i as f64 * 0.3).sin() * 0.9_f64.powi(i)).collect(), FS).unwrap();
        let faded = fade_out(&ir, 0.0, 0.0, 0, 0, &factory).unwrap();
        for (a, b) in ir.channel(0).iter().zip(faded.channel(0)) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_octave_smooth_keeps_flat_response() {
        let factory = RealFftFactory::new();
        let smoothed = octave_smooth(&dirac(64, 0, 1.0), 1.0 / 3.0, &factory).unwrap();
        assert!((smoothed.channel(0)[0] - 1.0).abs() < 1e-9);
        assert!(smoothed.channel(0)[1..].iter().all(|s| s.abs() < 1e-9));
    }

    #[test]
    fn test_normalize_records_gain() {
        let factory = RealFftFactory::new();
        let normalized = normalize(&dirac(64, 0, 4.0), &factory).unwrap();
        assert!((normalized.gain() - 0.25).abs() < 1e-9);
        assert!((normalized.peak() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_phase_moves_energy_to_front() {
        let factory = RealFftFactory::new();

        let delayed = make_min_phase(&dirac(64, 5, 1.0), &factory).unwrap();
        assert!((delayed.channel(0)[0] - 1.0).abs() < 1e-6);
        assert!(delayed.channel(0)[1..].iter().all(|s| s.abs() < 1e-6));

        // 0.5 + z^-1 has its zero outside the unit circle
        let mut samples = vec![0.0; 64];
        samples[0] = 0.5;
        samples[1] = 1.0;
        let ir = ImpulseResponse::mono(samples, FS).unwrap();
        let min = make_min_phase(&ir, &factory).unwrap();
        assert!((min.channel(0)[0] - 1.0).abs() < 1e-6);
        assert!((min.channel(0)[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_keeps_dc_gain() {
        let len = 256;
        let pulse: Vec<f64> = (0..len)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / len as f64).cos()))
            .collect();
        let dc: f64 = pulse.iter().sum();
        let ir = ImpulseResponse::mono(pulse, 48000.0).unwrap();

        let up = resample(&ir, 96000.0, 64).unwrap();
        assert_eq!(up.len(), 512);
        assert_eq!(up.sample_rate(), 96000.0);
        let up_dc: f64 = up.channel(0).iter().sum();
        assert!((up_dc - dc).abs() / dc < 0.05, "up {up_dc} vs {dc}");

        let down = resample(&ir, 24000.0, 64).unwrap();
        assert_eq!(down.len(), 128);
        let down_dc: f64 = down.channel(0).iter().sum();
        assert!((down_dc - dc).abs() / dc < 0.05, "down {down_dc} vs {dc}");

        assert_eq!(resample(&ir, 48000.0, 64).unwrap(), ir);
    }

    #[test]
    fn test_frequency_weight() {
        assert!((frequency_weight(1000.0, FS, 20.0, 20000.0, 0, 0) - 1.0).abs() < 1e-12);
        assert!(frequency_weight(0.0, FS, 50.0, 20000.0, 2, 0) < 1e-9);
        assert!((frequency_weight(1000.0, FS, 50.0, 20000.0, 2, 2) - 1.0).abs() < 0.1);
        assert!(frequency_weight(23000.0, FS, 0.0, 5000.0, 0, 2) < 0.1);
    }
}
