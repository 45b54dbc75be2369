//! Convolution renderer
//!
//! Usage:
//!   cv-render --ir room.wav --input dry.wav --output wet.wav
//!   cv-render --ir room.wav --input dry.wav --output wet.wav --engine uniform --block-size 128
//!   cv-render --ir room.wav --input dry.wav --output wet.wav --config loader.json
//!
//! The input is fed through the real-time processor in host-sized blocks.
//! The convolution tail is rendered and the reported latency is removed, so
//! the output is aligned with the input and `input + ir - 1` frames long.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;

use cv_core::Sample;
use cv_dsp::{ConvolutionEngine, EngineKind, MAX_ENGINE_CHANNELS};
use cv_engine::{ChannelListener, ConvolutionProcessor, IrInfo, LoadEvent, LoaderConfig};

/// Longest wait for the loader to finish
const LOAD_TIMEOUT: Duration = Duration::from_secs(120);

const ENGINE_KINDS: [EngineKind; 4] = [
    EngineKind::Direct,
    EngineKind::Uniform,
    EngineKind::NonUniform,
    EngineKind::ParallelFilter,
];

#[derive(Parser, Debug)]
#[command(name = "cv-render", about = "Render a WAV file through an impulse response")]
struct Cli {
    /// Impulse response (WAV)
    #[arg(long)]
    ir: PathBuf,

    /// Dry input (WAV)
    #[arg(short, long)]
    input: PathBuf,

    /// Rendered output (32-bit float WAV)
    #[arg(short, long)]
    output: PathBuf,

    /// Strategy: direct, uniform, non_uniform, parallel_filter
    #[arg(short, long, value_parser = parse_engine)]
    engine: Option<EngineKind>,

    /// Host block size used to feed the processor
    #[arg(short, long, default_value_t = 512)]
    block_size: usize,

    /// Loader configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_engine(name: &str) -> Result<EngineKind, String> {
    ENGINE_KINDS.into_iter().find(|kind| kind.name() == name).ok_or_else(|| {
        let names: Vec<&str> = ENGINE_KINDS.iter().map(|k| k.name()).collect();
        format!("unknown engine '{name}' (expected one of: {})", names.join(", "))
    })
}

/// Decoded planar audio
struct Audio {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl Audio {
    fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

fn read_audio(path: &Path) -> Result<Audio> {
    let reader = hound::WavReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    if num_channels == 0 || num_channels > MAX_ENGINE_CHANNELS {
        bail!("{} has {} channels, at most {} supported", path.display(), num_channels, MAX_ENGINE_CHANNELS);
    }

    let interleaved: Vec<Sample> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| v as Sample))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as Sample;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as Sample / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mut channels = vec![Vec::with_capacity(interleaved.len() / num_channels); num_channels];
    for frame in interleaved.chunks_exact(num_channels) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    Ok(Audio {
        channels,
        sample_rate: spec.sample_rate,
    })
}

fn write_audio(path: &Path, audio: &Audio) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels.len() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("Failed to create {}", path.display()))?;
    for i in 0..audio.frames() {
        for channel in &audio.channels {
            writer.write_sample(channel[i] as f32)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<LoaderConfig> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path).with_context(|| format!("Invalid config {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }
    Ok(config)
}

/// Render `cli.input` through `cli.ir`. Returns the loaded IR description.
fn render(cli: &Cli) -> Result<IrInfo> {
    if cli.block_size == 0 {
        bail!("Block size must be positive");
    }
    let config = load_config(cli)?;
    let input = read_audio(&cli.input)?;
    let num_channels = input.channels.len();

    let (listener, events) = ChannelListener::new();
    let (mut processor, loader) = ConvolutionProcessor::new(num_channels, config, Arc::new(listener))?;
    processor.configure(cli.block_size, input.sample_rate as f64)?;

    let started = Instant::now();
    let generation = loader.load_file(&cli.ir);
    let info = loop {
        match events.recv_timeout(LOAD_TIMEOUT).context("Timed out loading the impulse response")? {
            LoadEvent::Succeeded { generation: g, info } if g == generation => break info,
            LoadEvent::Failed {
                generation: g,
                reason,
                message,
            } if g == generation => bail!("Failed to load {} ({:?}): {}", cli.ir.display(), reason, message),
            _ => {}
        }
    };
    log::info!(
        "Loaded {} in {:.1} ms: {} ch, {} samples, {} engine, latency {}",
        cli.ir.display(),
        started.elapsed().as_secs_f64() * 1000.0,
        info.channels,
        info.length,
        info.engine,
        info.latency
    );

    let frames = input.frames();
    let wet_frames = frames + info.length.saturating_sub(1);
    let total = wet_frames + info.latency;

    let mut rendered = vec![Vec::with_capacity(total); num_channels];
    let mut in_block = vec![vec![0.0; cli.block_size]; num_channels];
    let mut out_block = vec![vec![0.0; cli.block_size]; num_channels];

    let started = Instant::now();
    let mut pos = 0;
    while pos < total {
        let n = cli.block_size.min(total - pos);
        for (block, channel) in in_block.iter_mut().zip(&input.channels) {
            block[..n].fill(0.0);
            if pos < frames {
                let avail = n.min(frames - pos);
                block[..avail].copy_from_slice(&channel[pos..pos + avail]);
            }
        }

        let inputs: Vec<&[Sample]> = in_block.iter().map(|b| &b[..n]).collect();
        let mut outputs: Vec<&mut [Sample]> = out_block.iter_mut().map(|b| &mut b[..n]).collect();
        processor.process(&inputs, &mut outputs);

        for (dest, block) in rendered.iter_mut().zip(&out_block) {
            dest.extend_from_slice(&block[..n]);
        }
        pos += n;
    }
    log::info!(
        "Rendered {} frames in {:.1} ms",
        wet_frames,
        started.elapsed().as_secs_f64() * 1000.0
    );

    let output = Audio {
        channels: rendered.into_iter().map(|c| c[info.latency..].to_vec()).collect(),
        sample_rate: input.sample_rate,
    };
    write_audio(&cli.output, &output)?;
    Ok(info)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let info = render(&cli)?;
    println!(
        "Wrote {} ({} engine, {} samples IR)",
        cli.output.display(),
        info.engine,
        info.length
    );
    Ok(())
}
