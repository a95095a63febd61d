use std::env;
use std::error::Error;
use std::sync::Arc;

use pocket_core::gameboy::GameBoy;
use pocket_core::hardware::Style;
use pocket_core::sync::CoreSync;
use pocket_core::thread::Core;

const SAMPLE_RATE: u32 = 44_100;
const DEFAULT_SECONDS: f64 = 3.0;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let out_path = args
        .next()
        .ok_or("expected <output wav> [--seconds=N] [--style=dmg|cgb|gba]")?;

    let mut seconds = DEFAULT_SECONDS;
    let mut style = Style::Dmg;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--seconds=") {
            seconds = value.parse()?;
        } else if let Some(value) = arg.strip_prefix("--style=") {
            style = parse_style(value)?;
        } else {
            return Err(format!("unrecognised flag: {arg}").into());
        }
    }
    if seconds <= 0.0 {
        return Err("seconds must be positive".into());
    }

    let sync = Arc::new(CoreSync::new());
    sync.lock_audio().set_rates(SAMPLE_RATE);

    let mut gb = GameBoy::new_with_style(style);
    gb.set_sync(Arc::clone(&sync));

    // A plain two-note pattern on channel 2.
    gb.write_io(0xFF17, 0xF2); // full volume, slow decay
    gb.write_io(0xFF16, 0x80); // 50% duty
    gb.write_io(0xFF18, 0xD6);
    gb.write_io(0xFF19, 0x86); // trigger at ~440 Hz

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&out_path, spec)?;

    let total_frames = (seconds * f64::from(SAMPLE_RATE)).ceil() as usize;
    let mut frames_written = 0usize;
    let mut buf = vec![0i16; 4096];
    let mut frame_count = 0u32;

    while frames_written < total_frames {
        gb.run_loop()?;
        frame_count += 1;
        if frame_count % 30 == 0 {
            let low = if frame_count % 60 == 0 { 0xD6 } else { 0x40 };
            gb.write_io(0xFF18, low);
            gb.write_io(0xFF19, 0x86);
        }

        loop {
            let read = {
                let mut audio = sync.lock_audio();
                let read = audio.read_interleaved(&mut buf);
                sync.consume_audio(audio);
                read
            };
            if read == 0 {
                break;
            }
            for frame in buf[..read * 2].chunks_exact(2) {
                writer.write_sample(frame[0])?;
                writer.write_sample(frame[1])?;
            }
            frames_written += read;
            if frames_written >= total_frames {
                break;
            }
        }
    }

    writer.finalize()?;
    println!("wrote {frames_written} stereo frames ({seconds:.2}s) to {out_path}");
    Ok(())
}

fn parse_style(value: &str) -> Result<Style, Box<dyn Error>> {
    match value.to_ascii_lowercase().as_str() {
        "dmg" => Ok(Style::Dmg),
        "cgb" => Ok(Style::Cgb),
        "gba" => Ok(Style::Gba),
        other => Err(format!("unknown style: {other}").into()),
    }
}
