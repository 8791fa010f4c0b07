//! rt-audio-queue - loopback session over the audio and parameter rings
//!
//! A synth thread renders a sine into the audio ring, a render thread drains
//! it once per render quantum the way an audio device callback would, and the
//! main thread acts as the control surface, sending scheduled parameter
//! changes to the synth.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;

use rt_audio_queue::config::{SessionConfig, PARAM_AMPLITUDE, PARAM_FREQUENCY};
use rt_audio_queue::{
    audio_channel, deinterleave, parameter_channel, AudioReader, AudioWriter, ParameterChange,
    ParameterReader, RENDER_QUANTUM_FRAMES,
};

/// How often the control thread wakes up to send changes and check stats.
const CONTROL_TICK: Duration = Duration::from_millis(5);

/// Parsed command line arguments
struct Args {
    config: Option<PathBuf>,
    duration_ms: Option<u64>,
    channels: Option<u16>,
    buffer_quanta: Option<usize>,
    frequency: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    let config = load_config(&args)?;

    info!("rt-audio-queue session starting...");
    info!("  Sample rate:     {} Hz", config.sample_rate);
    info!("  Channels:        {}", config.channels);
    info!(
        "  Audio ring:      {} quanta ({} samples)",
        config.buffer_quanta,
        config.audio_capacity()
    );
    info!("  Parameter ring:  {} records", config.parameter_records);
    if config.duration_ms > 0 {
        info!("  Duration:        {}ms", config.duration_ms);
    } else {
        info!("  Duration:        until Ctrl+C");
    }

    let report = run_session(&config)?;
    info!("Session report: {}", serde_json::to_string(&report)?);
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: rt-audio-queue [--config <path>] [--duration <ms>] [--channels <n>] [--buffer <quanta>] [--frequency <hz>]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  --config <path>     JSON session description (see SessionConfig)");
    eprintln!("  --duration <ms>     Session length in milliseconds, 0 to run until Ctrl+C");
    eprintln!("  --channels <n>      Interleaved channel count, must divide 128");
    eprintln!("  --buffer <quanta>   Audio ring capacity in 128-frame quanta");
    eprintln!("  --frequency <hz>    Initial oscillator frequency");
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();

    let mut parsed = Args {
        config: None,
        duration_ms: None,
        channels: None,
        buffer_quanta: None,
        frequency: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                parsed.config = args.get(i).map(PathBuf::from);
            }
            "--duration" => {
                i += 1;
                parsed.duration_ms = Some(parse_value(&args, i, "--duration")?);
            }
            "--channels" => {
                i += 1;
                parsed.channels = Some(parse_value(&args, i, "--channels")?);
            }
            "--buffer" => {
                i += 1;
                parsed.buffer_quanta = Some(parse_value(&args, i, "--buffer")?);
            }
            "--frequency" => {
                i += 1;
                parsed.frequency = Some(parse_value(&args, i, "--frequency")?);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                return Err(anyhow::anyhow!("Unknown argument: {}", args[i]));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    let raw = args
        .get(i)
        .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", flag, raw))
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(duration_ms) = args.duration_ms {
        config.duration_ms = duration_ms;
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    if let Some(buffer_quanta) = args.buffer_quanta {
        config.buffer_quanta = buffer_quanta;
    }
    if let Some(frequency) = args.frequency {
        config.frequency = frequency;
    }

    config.validate().context("Invalid session configuration")?;
    Ok(config)
}

/// Counters shared by the three threads. Updated with relaxed atomics so
/// the render thread never waits on them.
#[derive(Default)]
struct SessionStats {
    callbacks: AtomicU64,
    underflows: AtomicU64,
    missing_samples: AtomicU64,
    /// Peak absolute sample, as `f32` bits.
    peak_bits: AtomicU32,
    blocks_rendered: AtomicU64,
    changes_applied: AtomicU64,
    changes_ignored: AtomicU64,
    changes_sent: AtomicU64,
    changes_retried: AtomicU64,
}

impl SessionStats {
    fn record_peak(&self, peak: f32) {
        // Non-negative floats order the same way as their bit patterns.
        self.peak_bits.fetch_max(peak.to_bits(), Ordering::Relaxed);
    }

    fn report(&self, config: &SessionConfig, elapsed: Duration) -> SessionReport {
        SessionReport {
            sample_rate: config.sample_rate,
            channels: config.channels,
            elapsed_ms: elapsed.as_millis() as u64,
            callbacks: self.callbacks.load(Ordering::Relaxed),
            underflows: self.underflows.load(Ordering::Relaxed),
            missing_samples: self.missing_samples.load(Ordering::Relaxed),
            blocks_rendered: self.blocks_rendered.load(Ordering::Relaxed),
            changes_sent: self.changes_sent.load(Ordering::Relaxed),
            changes_retried: self.changes_retried.load(Ordering::Relaxed),
            changes_applied: self.changes_applied.load(Ordering::Relaxed),
            changes_ignored: self.changes_ignored.load(Ordering::Relaxed),
            peak: f32::from_bits(self.peak_bits.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionReport {
    sample_rate: u32,
    channels: u16,
    elapsed_ms: u64,
    callbacks: u64,
    underflows: u64,
    missing_samples: u64,
    blocks_rendered: u64,
    changes_sent: u64,
    changes_retried: u64,
    changes_applied: u64,
    changes_ignored: u64,
    peak: f32,
}

fn run_session(config: &SessionConfig) -> Result<SessionReport> {
    let running = Arc::new(AtomicBool::new(true));

    // Set up Ctrl+C handler
    ctrlc_handler(running.clone());

    // All ring memory is allocated here, before either worker starts.
    let (audio_writer, audio_reader) =
        audio_channel(config.audio_capacity()).context("Failed to create audio ring")?;
    let (mut param_writer, param_reader) =
        parameter_channel(config.parameter_records).context("Failed to create parameter ring")?;

    let stats = Arc::new(SessionStats::default());

    // Start synth thread (audio producer, parameter consumer)
    let synth_running = running.clone();
    let synth_stats = stats.clone();
    let synth_config = config.clone();
    let synth_handle = thread::spawn(move || {
        run_synth_loop(audio_writer, param_reader, &synth_config, synth_running, synth_stats);
    });

    // Start render thread (audio consumer)
    let render_running = running.clone();
    let render_stats = stats.clone();
    let render_config = config.clone();
    let render_handle = thread::spawn(move || {
        run_render_loop(audio_reader, &render_config, render_running, render_stats);
    });

    let mut schedule = config.automation.clone();
    schedule.sort_by_key(|scheduled| scheduled.at_ms);
    let mut next_change = 0;
    let mut reported_underflows = 0;

    let start = Instant::now();
    while running.load(Ordering::SeqCst) {
        let elapsed_ms = start.elapsed().as_millis() as u64;

        while let Some(scheduled) = schedule
            .get(next_change)
            .filter(|scheduled| scheduled.at_ms <= elapsed_ms)
        {
            if !param_writer.enqueue(scheduled.change()) {
                // Ring full: keep the change and retry on the next tick.
                warn!(
                    "Parameter ring full, retrying change {} = {}",
                    scheduled.index, scheduled.value
                );
                stats.changes_retried.fetch_add(1, Ordering::Relaxed);
                break;
            }
            info!(
                "Sent parameter {} = {} at {}ms",
                scheduled.index, scheduled.value, elapsed_ms
            );
            stats.changes_sent.fetch_add(1, Ordering::Relaxed);
            next_change += 1;
        }

        let underflows = stats.underflows.load(Ordering::Relaxed);
        if underflows > reported_underflows {
            warn!(
                "Render underflow: {} callbacks short so far ({} samples zero-filled)",
                underflows,
                stats.missing_samples.load(Ordering::Relaxed)
            );
            reported_underflows = underflows;
        }

        if config.duration_ms > 0 && elapsed_ms >= config.duration_ms {
            running.store(false, Ordering::SeqCst);
            break;
        }

        thread::sleep(CONTROL_TICK);
    }

    info!("Shutting down...");

    // Wait for threads to finish
    if synth_handle.join().is_err() {
        error!("Synth thread panicked");
    }
    if render_handle.join().is_err() {
        error!("Render thread panicked");
    }

    info!("Session stopped.");
    Ok(stats.report(config, start.elapsed()))
}

/// Stand-in for the external synthesis engine.
struct SineOscillator {
    sample_rate: f32,
    frequency: f32,
    amplitude: f32,
    phase: f32,
}

impl SineOscillator {
    fn new(sample_rate: f32, frequency: f32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude,
            phase: 0.0,
        }
    }

    /// Returns false for parameter indices this oscillator does not know.
    fn apply(&mut self, change: ParameterChange) -> bool {
        match change.index {
            PARAM_FREQUENCY => self.frequency = change.value,
            PARAM_AMPLITUDE => self.amplitude = change.value,
            _ => return false,
        }
        true
    }

    /// Fill `block` with interleaved frames, the same sample on every channel.
    fn render(&mut self, block: &mut [f32], channels: usize) {
        let step = std::f32::consts::TAU * self.frequency / self.sample_rate;
        for frame in block.chunks_exact_mut(channels) {
            frame.fill(self.amplitude * self.phase.sin());
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }
    }
}

fn run_synth_loop(
    mut audio: AudioWriter,
    mut params: ParameterReader,
    config: &SessionConfig,
    running: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
) {
    info!("Starting synth loop");

    let channels = config.channels as usize;
    let idle = config.quantum_period() / 4;
    let mut osc = SineOscillator::new(config.sample_rate as f32, config.frequency, config.amplitude);
    let mut block = vec![0.0f32; config.quantum_samples()];
    // Samples at the end of `block` not yet accepted by the ring.
    let mut pending = 0;

    while running.load(Ordering::SeqCst) {
        for change in params.drain() {
            if osc.apply(change) {
                debug!("Applied parameter {} = {}", change.index, change.value);
                stats.changes_applied.fetch_add(1, Ordering::Relaxed);
            } else {
                warn!("Ignoring unknown parameter index {}", change.index);
                stats.changes_ignored.fetch_add(1, Ordering::Relaxed);
            }
        }

        if pending == 0 {
            if audio.available_write() < block.len() {
                thread::sleep(idle);
                continue;
            }
            osc.render(&mut block, channels);
            stats.blocks_rendered.fetch_add(1, Ordering::Relaxed);
            pending = block.len();
        }

        let offset = block.len() - pending;
        let written = audio.enqueue(&block[offset..]);
        pending -= written;
        if pending > 0 {
            thread::sleep(idle);
        }
    }

    info!("Synth loop stopped.");
}

fn run_render_loop(
    mut audio: AudioReader,
    config: &SessionConfig,
    running: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
) {
    info!("Starting render loop");

    let channels = config.channels as usize;
    let period = config.quantum_period();
    let mut interleaved = vec![0.0f32; config.quantum_samples()];
    let mut planar = vec![vec![0.0f32; RENDER_QUANTUM_FRAMES]; channels];

    // Let the synth get half a ring ahead before the first callback.
    let prefill = config.audio_capacity() / 2;
    while running.load(Ordering::SeqCst) && audio.available_read() < prefill {
        thread::sleep(period);
    }

    let mut next_callback = Instant::now();
    while running.load(Ordering::SeqCst) {
        // Callback body: no allocation, no logging, no blocking.
        let read = audio.dequeue_or_silence(&mut interleaved);
        if read < interleaved.len() {
            stats.underflows.fetch_add(1, Ordering::Relaxed);
            stats
                .missing_samples
                .fetch_add((interleaved.len() - read) as u64, Ordering::Relaxed);
        }
        if deinterleave(&interleaved, &mut planar).is_err() {
            // Sizes are fixed by the validated config, so this is a bug.
            error!("Render buffers do not match the {}-channel layout", channels);
            running.store(false, Ordering::SeqCst);
            break;
        }
        let peak = planar
            .iter()
            .flat_map(|channel| channel.iter())
            .fold(0.0f32, |peak, sample| peak.max(sample.abs()));
        stats.record_peak(peak);
        stats.callbacks.fetch_add(1, Ordering::Relaxed);

        // Stand-in for the device clock.
        next_callback += period;
        let now = Instant::now();
        if next_callback > now {
            thread::sleep(next_callback - now);
        } else {
            next_callback = now;
        }
    }

    info!("Render loop stopped.");
}

fn ctrlc_handler(running: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        running.store(false, Ordering::SeqCst);
    });
}
