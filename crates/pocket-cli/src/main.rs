use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::info;
use pocket_core::diagnostics::{self, Level, LogSink};
use pocket_core::gameboy::GameBoy;
use pocket_core::hardware::Style;
use pocket_core::thread::CoreThread;

const SAMPLE_RATE: u32 = 44_100;

#[derive(Parser)]
#[command(name = "pocket", about = "Headless runner for the pocket emulator core")]
struct Args {
    /// Write rendered audio to this WAV file instead of playing it
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Seconds to run
    #[arg(long, default_value_t = 3.0)]
    seconds: f64,

    /// Hardware style: dmg, cgb or gba
    #[arg(long, default_value = "dmg")]
    style: String,

    /// Resampler fill target before the core throttles, in sample frames
    #[arg(long, default_value_t = 1024)]
    samples: usize,

    /// Let the core free-run instead of pacing it on the audio consumer
    #[arg(long)]
    no_audio_sync: bool,
}

/// Routes core diagnostics into the `log` facade.
struct LogBridge;

impl LogSink for LogBridge {
    fn log(&self, level: Level, target: &'static str, args: fmt::Arguments) {
        match level {
            Level::Trace => log::trace!(target: "core", "[{target}] {args}"),
            Level::Info => log::info!(target: "core", "[{target}] {args}"),
            Level::Warn => log::warn!(target: "core", "[{target}] {args}"),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let _ = diagnostics::try_set_log_sink(Arc::new(LogBridge));
    let args = Args::parse();

    let style = match args.style.to_ascii_lowercase().as_str() {
        "dmg" => Style::Dmg,
        "cgb" => Style::Cgb,
        "gba" => Style::Gba,
        other => return Err(format!("unknown style: {other}").into()),
    };
    if args.seconds <= 0.0 {
        return Err("seconds must be positive".into());
    }

    let core = GameBoy::new_with_config(style, args.samples);
    let mut thread = CoreThread::new(core);
    thread.start_callback = Some(Box::new(|core: &mut GameBoy| {
        // Program a test tone so there is something to hear: channel 2
        // square at ~440 Hz, full volume with a slow decay.
        core.write_io(0xFF17, 0xF2);
        core.write_io(0xFF16, 0x80);
        core.write_io(0xFF18, 0xD6);
        core.write_io(0xFF19, 0x86);
    }));

    thread.sync().lock_audio().set_rates(SAMPLE_RATE);
    thread.sync().set_audio_sync(!args.no_audio_sync);
    thread.sync().set_video_sync(false);

    if !thread.start() {
        return Err("failed to start emulation thread".into());
    }
    info!("emulation thread started ({style:?})");

    let result = if let Some(path) = &args.wav {
        drain_to_wav(&thread, path, args.seconds)
    } else {
        play_stream(&thread, args.seconds)
    };

    thread.end();
    thread.join();
    result
}

/// Drain the resampler into a WAV file for `seconds` of output.
fn drain_to_wav(
    thread: &CoreThread<GameBoy>,
    path: &PathBuf,
    seconds: f64,
) -> Result<(), Box<dyn Error>> {
    let sync = Arc::clone(thread.sync());
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let total_frames = (seconds * f64::from(SAMPLE_RATE)).ceil() as usize;
    let mut frames_written = 0usize;
    let mut buf = vec![0i16; 4096];

    while frames_written < total_frames {
        let read = {
            let mut audio = sync.lock_audio();
            let read = audio.read_interleaved(&mut buf);
            sync.consume_audio(audio);
            read
        };
        if read == 0 {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        for frame in buf[..read * 2].chunks_exact(2) {
            writer.write_sample(frame[0])?;
            writer.write_sample(frame[1])?;
        }
        frames_written += read;
    }

    writer.finalize()?;
    info!("wrote {frames_written} stereo frames to {}", path.display());
    Ok(())
}

/// Stream the resampler to the default audio device for `seconds`.
fn play_stream(thread: &CoreThread<GameBoy>, seconds: f64) -> Result<(), Box<dyn Error>> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("no audio output device")?;
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let sync = Arc::clone(thread.sync());
    let err_fn = |err| eprintln!("cpal stream error: {err}");
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [i16], _| {
            let mut audio = sync.lock_audio();
            let read = audio.read_interleaved(data);
            sync.consume_audio(audio);
            data[read * 2..].fill(0);
        },
        err_fn,
        None,
    )?;
    stream.play()?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}
