//! Loader Integration Tests
//!
//! Drives the processor and its loader thread together:
//! - WAV files through the full pipeline
//! - Failed loads keep the previous engine
//! - Request coalescing and stale result dropping
//! - Rebuild on host setup changes

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use cv_core::{ConvResult, Sample};
use cv_dsp::{ConvolutionEngine, Convolver, EngineKind, ImpulseResponse};
use cv_engine::{
    BusyState, ChannelListener, ConvolutionProcessor, IrLoader, IrSource, LoadEvent, LoadFailure, LoaderConfig,
    MemorySource,
};

const SAMPLE_RATE: f64 = 48000.0;
const TIMEOUT: Duration = Duration::from_secs(10);

fn setup(num_channels: usize, engine: EngineKind) -> (ConvolutionProcessor, IrLoader, Receiver<LoadEvent>) {
    let (listener, events) = ChannelListener::new();
    let config = LoaderConfig {
        engine,
        ..Default::default()
    };
    let (processor, loader) = ConvolutionProcessor::new(num_channels, config, Arc::new(listener)).unwrap();
    (processor, loader, events)
}

fn write_wav(path: &Path, channels: u16, frames: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in frames {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

/// Collect events until a final one for `generation` arrives
fn wait_final(events: &Receiver<LoadEvent>, generation: u64) -> LoadEvent {
    loop {
        let event = events.recv_timeout(TIMEOUT).expect("loader went quiet");
        if event.generation() == generation && event.is_final() {
            return event;
        }
    }
}

fn impulse_block(len: usize) -> Vec<Sample> {
    let mut block = vec![0.0; len];
    block[0] = 1.0;
    block
}

fn mono(taps: Vec<Sample>) -> Arc<dyn IrSource> {
    Arc::new(MemorySource::new("memory", ImpulseResponse::mono(taps, SAMPLE_RATE).unwrap()))
}

/// Source whose `load` blocks until the test releases it
#[derive(Debug)]
struct GatedSource {
    gate: Receiver<()>,
    ir: ImpulseResponse,
}

impl GatedSource {
    fn new(taps: Vec<Sample>) -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = bounded(1);
        let source = Self {
            gate: rx,
            ir: ImpulseResponse::mono(taps, SAMPLE_RATE).unwrap(),
        };
        (Arc::new(source), tx)
    }
}

impl IrSource for GatedSource {
    fn load(&self) -> ConvResult<ImpulseResponse> {
        let _ = self.gate.recv_timeout(TIMEOUT);
        Ok(self.ir.clone())
    }

    fn describe(&self) -> String {
        "gated".into()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FILE LOADING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_wav_file_through_non_uniform_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("room.wav");
    // Stereo IR: left halves, right delays by one
    write_wav(&path, 2, &[16384, 0, 0, 32767, 8192, 0]);

    let (mut processor, loader, events) = setup(2, EngineKind::NonUniform);
    processor.configure(128, SAMPLE_RATE).unwrap();

    let generation = loader.load_file(&path);
    let info = match wait_final(&events, generation) {
        LoadEvent::Succeeded { info, .. } => info,
        other => panic!("load failed: {other:?}"),
    };
    assert_eq!(info.channels, 2);
    assert_eq!(info.length, 3);
    assert_eq!(info.engine, EngineKind::NonUniform);
    assert_eq!(info.sample_rate, SAMPLE_RATE);

    let input = impulse_block(128);
    let mut left_out = Vec::new();
    let mut right_out = Vec::new();
    for i in 0..4 {
        let block = if i == 0 { input.clone() } else { vec![0.0; 128] };
        let mut left = vec![0.0; 128];
        let mut right = vec![0.0; 128];
        processor.process(&[&block, &block], &mut [left.as_mut_slice(), right.as_mut_slice()]);
        left_out.extend(left);
        right_out.extend(right);
    }

    let latency = processor.latency();
    assert_eq!(latency, info.latency);
    approx::assert_abs_diff_eq!(left_out[latency], 0.5, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(left_out[latency + 2], 0.25, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(right_out[latency], 0.0, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(right_out[latency + 1], 32767.0 / 32768.0, epsilon = 1e-9);
}

// ═══════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_malformed_file_keeps_previous_engine() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("broken.wav");
    std::fs::write(&garbage, b"definitely not RIFF data").unwrap();

    let (mut processor, loader, events) = setup(1, EngineKind::Direct);
    processor.configure(64, SAMPLE_RATE).unwrap();

    let first = loader.load(mono(vec![0.0, 0.0, 0.75]));
    assert!(matches!(wait_final(&events, first), LoadEvent::Succeeded { .. }));

    let second = loader.load_file(&garbage);
    match wait_final(&events, second) {
        LoadEvent::Failed { reason, message, .. } => {
            assert_eq!(reason, LoadFailure::Malformed);
            assert!(!message.is_empty());
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(loader.wait_idle(TIMEOUT));
    assert_eq!(loader.busy_state(), BusyState::Idle);

    let mut output = vec![0.0; 64];
    processor.process_mono(&impulse_block(64), &mut output);
    assert_eq!(output[2], 0.75);
}

#[test]
fn test_missing_file_reports_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let (_processor, loader, events) = setup(1, EngineKind::Direct);

    let generation = loader.load_file(dir.path().join("nowhere.wav"));
    assert!(matches!(
        wait_final(&events, generation),
        LoadEvent::Failed {
            reason: LoadFailure::Unreadable,
            ..
        }
    ));
}

#[test]
fn test_too_long_ir_rejected() {
    let (listener, events) = ChannelListener::new();
    let config = LoaderConfig {
        engine: EngineKind::Uniform,
        max_ir_length: 1000,
        ..Default::default()
    };
    let (mut processor, loader) = ConvolutionProcessor::new(1, config, Arc::new(listener)).unwrap();
    processor.configure(256, SAMPLE_RATE).unwrap();

    let generation = loader.load(mono(vec![0.1; 1001]));
    assert!(matches!(
        wait_final(&events, generation),
        LoadEvent::Failed {
            reason: LoadFailure::TooLong,
            ..
        }
    ));
    assert!(processor.active().is_none());
}

#[test]
fn test_rejected_ir_does_not_replace_last_good_one() {
    let (listener, events) = ChannelListener::new();
    let config = LoaderConfig {
        engine: EngineKind::Uniform,
        max_ir_length: 1000,
        ..Default::default()
    };
    let (mut processor, loader) = ConvolutionProcessor::new(1, config, Arc::new(listener)).unwrap();
    processor.configure(256, SAMPLE_RATE).unwrap();

    let good = loader.load(mono(vec![0.25; 100]));
    assert!(matches!(wait_final(&events, good), LoadEvent::Succeeded { .. }));

    let rejected = loader.load(mono(vec![0.1; 1001]));
    assert!(matches!(
        wait_final(&events, rejected),
        LoadEvent::Failed {
            reason: LoadFailure::TooLong,
            ..
        }
    ));

    // A host rate change rebuilds from the 100 tap IR, not the rejected one
    processor.configure(256, 96000.0).unwrap();
    let rebuild = loader.control().latest_generation();
    assert!(rebuild > rejected);
    match wait_final(&events, rebuild) {
        LoadEvent::Succeeded { info, .. } => {
            assert_eq!(info.sample_rate, 96000.0);
            assert_eq!(info.length, 200);
        }
        other => panic!("rebuild failed: {other:?}"),
    }

    let config = LoaderConfig {
        engine: EngineKind::Direct,
        max_ir_length: 1000,
        ..Default::default()
    };
    let reconfigured = loader.set_config(config).unwrap();
    match wait_final(&events, reconfigured) {
        LoadEvent::Succeeded { info, .. } => {
            assert_eq!(info.engine, EngineKind::Direct);
            assert_eq!(info.length, 200);
        }
        other => panic!("reconfigure failed: {other:?}"),
    }
}

#[test]
fn test_parallel_filter_rejects_ir_beyond_fit_length() {
    let (listener, events) = ChannelListener::new();
    let mut config = LoaderConfig {
        engine: EngineKind::ParallelFilter,
        ..Default::default()
    };
    config.parallel.fit_length = 4096;
    let (mut processor, loader) = ConvolutionProcessor::new(1, config, Arc::new(listener)).unwrap();
    processor.configure(64, SAMPLE_RATE).unwrap();

    let mut taps = vec![0.0; 10_000];
    taps[0] = 1.0;
    taps[8000] = 0.8;
    let generation = loader.load(mono(taps));
    match wait_final(&events, generation) {
        LoadEvent::Failed { reason, message, .. } => {
            assert_eq!(reason, LoadFailure::TooLong);
            assert!(message.contains("10000"));
        }
        other => panic!("long IR was accepted: {other:?}"),
    }
    assert!(processor.active().is_none());
    assert!(!loader.control().has_ir());
}

#[test]
fn test_zero_length_ir_passes_audio_through() {
    let (mut processor, loader, events) = setup(2, EngineKind::NonUniform);
    processor.configure(128, SAMPLE_RATE).unwrap();

    let generation = loader.load(mono(Vec::new()));
    match wait_final(&events, generation) {
        LoadEvent::Succeeded { info, .. } => {
            assert_eq!(info.length, 0);
            assert_eq!(info.latency, 0);
        }
        other => panic!("empty IR rejected: {other:?}"),
    }

    let input: Vec<Sample> = (0..128).map(|n| (n as f64 * 0.1).sin()).collect();
    let mut left = vec![0.0; 128];
    let mut right = vec![0.0; 128];
    processor.process(&[&input, &input], &mut [left.as_mut_slice(), right.as_mut_slice()]);
    assert_eq!(processor.active().map(Convolver::kind), Some(EngineKind::NonUniform));
    assert_eq!(processor.latency(), 0);
    assert_eq!(left, input);
    assert_eq!(right, input);
}

// ═══════════════════════════════════════════════════════════════════════════
// GENERATIONS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_superseded_requests_never_publish() {
    let (mut processor, loader, events) = setup(1, EngineKind::Direct);
    processor.configure(32, SAMPLE_RATE).unwrap();

    let (gated, release) = GatedSource::new(vec![0.1]);
    let first = loader.load(gated);
    match events.recv_timeout(TIMEOUT).unwrap() {
        LoadEvent::Started { generation, .. } => assert_eq!(generation, first),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(loader.busy_state(), BusyState::Busy);

    // Both queue up behind the blocked load
    let second = loader.load(mono(vec![0.2]));
    let third = loader.load(mono(vec![0.3]));
    assert!(third > second && second > first);
    release.send(()).unwrap();

    assert!(loader.wait_idle(TIMEOUT));
    assert_eq!(loader.busy_state(), BusyState::Idle);

    let mut finals = Vec::new();
    let mut started = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            LoadEvent::Started { generation, .. } => started.push(generation),
            event => finals.push(event),
        }
    }
    assert_eq!(started, vec![third]);
    assert_eq!(finals.len(), 1);
    assert!(matches!(finals[0], LoadEvent::Succeeded { generation, .. } if generation == third));

    let mut output = vec![0.0; 32];
    processor.process_mono(&impulse_block(32), &mut output);
    approx::assert_abs_diff_eq!(output[0], 0.3, epsilon = 1e-12);
}

#[test]
fn test_set_config_rebuilds_last_ir() {
    let (mut processor, loader, events) = setup(1, EngineKind::Direct);
    processor.configure(64, SAMPLE_RATE).unwrap();

    let taps: Vec<Sample> = (0..512).map(|n| 0.97f64.powi(n)).collect();
    let first = loader.load(mono(taps));
    assert!(matches!(wait_final(&events, first), LoadEvent::Succeeded { .. }));

    let config = LoaderConfig {
        engine: EngineKind::ParallelFilter,
        ..Default::default()
    };
    let second = loader.set_config(config).unwrap();
    match wait_final(&events, second) {
        LoadEvent::Succeeded { info, .. } => {
            assert_eq!(info.engine, EngineKind::ParallelFilter);
            assert_eq!(info.latency, 0);
        }
        other => panic!("rebuild failed: {other:?}"),
    }

    let mut output = vec![0.0; 64];
    processor.process_mono(&impulse_block(64), &mut output);
    assert_eq!(processor.active().map(Convolver::kind), Some(EngineKind::ParallelFilter));
    assert!(output.iter().all(|v| v.is_finite()));
}

// ═══════════════════════════════════════════════════════════════════════════
// HOST SETUP CHANGES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_sample_rate_change_resamples_ir() {
    let (mut processor, loader, events) = setup(1, EngineKind::Uniform);
    processor.configure(256, SAMPLE_RATE).unwrap();

    let taps: Vec<Sample> = (0..480).map(|n| 0.99f64.powi(n)).collect();
    let first = loader.load(mono(taps));
    match wait_final(&events, first) {
        LoadEvent::Succeeded { info, .. } => assert_eq!(info.sample_rate, SAMPLE_RATE),
        other => panic!("load failed: {other:?}"),
    }

    processor.configure(256, 96000.0).unwrap();
    let rebuild = loader.control().latest_generation();
    assert!(rebuild > first);
    match wait_final(&events, rebuild) {
        LoadEvent::Succeeded { info, .. } => {
            assert_eq!(info.sample_rate, 96000.0);
            assert_eq!(info.length, 960);
        }
        other => panic!("rebuild failed: {other:?}"),
    }
}

#[test]
fn test_same_setup_does_not_rebuild() {
    let (mut processor, loader, events) = setup(1, EngineKind::Direct);
    processor.configure(128, SAMPLE_RATE).unwrap();

    let first = loader.load(mono(vec![1.0]));
    assert!(matches!(wait_final(&events, first), LoadEvent::Succeeded { .. }));

    processor.configure(128, SAMPLE_RATE).unwrap();
    assert_eq!(loader.control().latest_generation(), first);
}
