//! IR preparation pipeline
//!
//! Order: resample to host rate, mono, invert, fade, smooth, normalize,
//! min-phase, truncate. Each step after resampling is optional.

use cv_core::{ConvError, ConvResult};
use cv_dsp::{FourierTransformFactory, ImpulseResponse, ir_tools};

use crate::config::PreprocessConfig;

/// Sinc window used when converting the IR to the host rate
pub const RESAMPLE_WINDOW: usize = 64;

/// Filter order of the low and high fades
const FADE_ORDER: u32 = 2;

/// Run the enabled steps. `host_rate` resamples the IR first when it differs.
pub fn preprocess(
    ir: &ImpulseResponse,
    config: &PreprocessConfig,
    host_rate: Option<f64>,
    max_len: usize,
    factory: &dyn FourierTransformFactory,
) -> ConvResult<ImpulseResponse> {
    let mut ir = match host_rate {
        Some(rate) if rate != ir.sample_rate() => {
            log::debug!("Resampling IR from {} Hz to {} Hz", ir.sample_rate(), rate);
            ir_tools::resample(ir, rate, RESAMPLE_WINDOW)?
        }
        _ => ir.clone(),
    };

    if config.mono && ir.num_channels() > 1 {
        ir = ir_tools::make_mono(&ir)?;
    }
    if config.invert {
        ir = ir_tools::invert_magnitude(&ir, factory)?;
    }
    if config.low_fade_hz.is_some() || config.high_fade_hz.is_some() {
        let (f_hp, hp_order) = config.low_fade_hz.map_or((0.0, 0), |f| (f, FADE_ORDER));
        let (f_lp, lp_order) = config
            .high_fade_hz
            .map_or((ir.sample_rate() / 2.0, 0), |f| (f, FADE_ORDER));
        ir = ir_tools::fade_out(&ir, f_hp, f_lp, hp_order, lp_order, factory)?;
    }
    if let Some(width) = config.smoothing_octaves {
        ir = ir_tools::octave_smooth(&ir, width, factory)?;
    }
    if config.normalize {
        ir = ir_tools::normalize(&ir, factory)?;
    }
    if config.min_phase {
        ir = ir_tools::make_min_phase(&ir, factory)?;
    }
    if let Some(db) = config.truncate_db {
        ir = ir_tools::truncate(&ir, db)?;
    }

    if ir.len() > max_len {
        return Err(ConvError::ImpulseTooLong {
            len: ir.len(),
            max: max_len,
        });
    }
    Ok(ir)
}
