use pocket_core::apu::Audio;
use pocket_core::hardware::Style;
use pocket_core::scheduler::ClockDomain;

fn run_cycles(audio: &mut Audio, mut cycles: i32) {
    while cycles > 0 {
        let step = cycles.min(64);
        audio.process_events(step);
        cycles -= step;
    }
}

#[test]
fn nr52_power_toggle() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    assert_eq!(audio.read_reg(0xFF26), 0x70);
    audio.write_reg(0xFF26, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26), 0xF0);
    audio.write_reg(0xFF26, 0x00, &mut clock);
    assert_eq!(audio.read_reg(0xFF26), 0x70);
    // Channel status bits are read-only.
    audio.write_reg(0xFF26, 0x8F, &mut clock);
    assert_eq!(audio.read_reg(0xFF26), 0xF0);
}

#[test]
fn nr52_clears_registers_when_off() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    assert_eq!(audio.read_reg(0xFF12), 0xF0);
    audio.write_reg(0xFF26, 0x00, &mut clock);
    assert_eq!(audio.read_reg(0xFF12), 0x00);
    // Writes are ignored while powered off.
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    assert_eq!(audio.read_reg(0xFF12), 0x00);
    audio.write_reg(0xFF26, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF12), 0x00);
}

#[test]
fn dmg_length_counters_survive_power_off() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF11, 0x3F, &mut clock); // length counter = 1
    audio.write_reg(0xFF26, 0x00, &mut clock);
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    audio.write_reg(0xFF14, 0xC0, &mut clock); // trigger, stop
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x01);
    // The surviving 1-step length expires on the first even frame.
    run_cycles(&mut audio, 2 * 8192);
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x00);
}

#[test]
fn cgb_length_counters_cleared_by_power_off() {
    let mut audio = Audio::new_with_style(Style::Cgb);
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF11, 0x3F, &mut clock);
    audio.write_reg(0xFF26, 0x00, &mut clock);
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    audio.write_reg(0xFF14, 0xC0, &mut clock);
    // Length was reloaded to a full 64 steps at trigger; two frames are not
    // enough to run it out.
    run_cycles(&mut audio, 2 * 8192);
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x01);
}

#[test]
fn read_mask_unused_bits() {
    let audio = Audio::new();
    assert_eq!(audio.read_reg(0xFF10), 0x80);
    assert_eq!(audio.read_reg(0xFF11), 0x3F);
    assert_eq!(audio.read_reg(0xFF13), 0xFF);
    assert_eq!(audio.read_reg(0xFF15), 0xFF);
}

#[test]
fn register_write_read_fidelity() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF10, 0x07, &mut clock);
    assert_eq!(audio.read_reg(0xFF10), 0x87);
    audio.write_reg(0xFF24, 0x77, &mut clock);
    assert_eq!(audio.read_reg(0xFF24), 0x77);
}

#[test]
fn nr52_channel_status_bits() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x0F, 0x00);
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    audio.write_reg(0xFF14, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x0F, 0x01);
    audio.write_reg(0xFF17, 0xF0, &mut clock);
    audio.write_reg(0xFF19, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x0F, 0x03);
    audio.write_reg(0xFF1A, 0x80, &mut clock);
    audio.write_reg(0xFF1E, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x0F, 0x07);
    audio.write_reg(0xFF21, 0xF0, &mut clock);
    audio.write_reg(0xFF23, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x0F, 0x0F);
}

#[test]
fn trigger_without_dac_stays_silent() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0x00, &mut clock); // volume 0, direction down
    audio.write_reg(0xFF14, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x00);
}

#[test]
fn envelope_zero_write_silences_running_channel() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    audio.write_reg(0xFF14, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x01);
    audio.write_reg(0xFF12, 0x00, &mut clock);
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x00);
}

#[test]
fn length_counter_expires_channel() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF16, 0x3E, &mut clock); // length counter = 2
    audio.write_reg(0xFF17, 0xF0, &mut clock);
    audio.write_reg(0xFF19, 0xC0 | 0x80, &mut clock); // trigger, stop
    assert_eq!(audio.read_reg(0xFF26) & 0x02, 0x02);
    // Length clocks on even frames: two steps take at most three frames.
    run_cycles(&mut audio, 3 * 8192);
    assert_eq!(audio.read_reg(0xFF26) & 0x02, 0x00);
}

#[test]
fn envelope_decays_and_saturates_low() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0xF1, &mut clock); // volume 15, down, step 1
    audio.write_reg(0xFF14, 0x80, &mut clock);
    assert_eq!(audio.ch1_volume(), 15);
    // One envelope step per sequencer round of 8 frames; 15 steps to zero.
    run_cycles(&mut audio, 16 * 8 * 8192);
    assert_eq!(audio.ch1_volume(), 0);
    // The channel stays flagged as playing; only its waveform went dead.
    assert_eq!(audio.read_reg(0xFF26) & 0x01, 0x01);
    // Saturated envelopes never tick again until a restart.
    run_cycles(&mut audio, 8 * 8192);
    assert_eq!(audio.ch1_volume(), 0);
}

#[test]
fn envelope_saturates_high() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF12, 0xA9, &mut clock); // volume 10, up, step 1
    audio.write_reg(0xFF14, 0x80, &mut clock);
    run_cycles(&mut audio, 8 * 8 * 8192);
    assert_eq!(audio.ch1_volume(), 15);
    run_cycles(&mut audio, 8 * 8192);
    assert_eq!(audio.ch1_volume(), 15);
}

#[test]
fn frame_sequencer_restarts_on_power_on() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    assert_eq!(audio.sequencer_frame(), 7);
    // Keep the scheduler alive with a playing channel so the sequencer
    // actually ticks. The first pending tick fires at the next service and
    // wraps the phase to 0.
    audio.write_reg(0xFF12, 0xF0, &mut clock);
    audio.write_reg(0xFF14, 0x80, &mut clock);
    run_cycles(&mut audio, 64);
    assert_eq!(audio.sequencer_frame(), 0);
    run_cycles(&mut audio, 8192);
    assert_eq!(audio.sequencer_frame(), 1);
}

#[test]
fn mixer_routing_and_force_disable() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF24, 0x77, &mut clock);
    audio.write_reg(0xFF25, 0x22, &mut clock); // channel 2 to both sides
    audio.write_reg(0xFF17, 0xF0, &mut clock);
    audio.write_reg(0xFF18, 0x00, &mut clock);
    audio.write_reg(0xFF19, 0x87, &mut clock);
    run_cycles(&mut audio, 2 * 8192);
    let (left, right) = audio.sample_psg();
    assert_ne!((left, right), (0, 0));
    assert_eq!(left, right);

    audio.force_disable_channel(1, true);
    let (left, right) = audio.sample_psg();
    assert_eq!((left, right), (0, 0));
}

#[test]
fn nr51_split_routing() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF24, 0x77, &mut clock);
    audio.write_reg(0xFF25, 0x02, &mut clock); // channel 2 right only
    audio.write_reg(0xFF17, 0xF0, &mut clock);
    audio.write_reg(0xFF18, 0x00, &mut clock);
    audio.write_reg(0xFF19, 0x87, &mut clock);
    run_cycles(&mut audio, 2 * 8192);
    let (left, right) = audio.sample_psg();
    assert_eq!(left, 0);
    assert_ne!(right, 0);
}

#[test]
fn wave_ram_reads_gated_while_playing() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    for i in 0..0x10u16 {
        audio.write_reg(0xFF30 + i, 0x10 + i as u8, &mut clock);
    }
    assert_eq!(audio.read_reg(0xFF30), 0x10);
    audio.write_reg(0xFF1A, 0x80, &mut clock);
    audio.write_reg(0xFF1E, 0x80, &mut clock);
    // Mid-period the fetch window has lapsed on DMG.
    run_cycles(&mut audio, 2048);
    assert_eq!(audio.read_reg(0xFF30), 0xFF);
}

#[test]
fn nr52_wave_ram_persists_across_power_cycle() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF30, 0x12, &mut clock);
    audio.write_reg(0xFF26, 0x00, &mut clock);
    assert_eq!(audio.read_reg(0xFF30), 0x12);
    audio.write_reg(0xFF26, 0x80, &mut clock);
    assert_eq!(audio.read_reg(0xFF30), 0x12);
}

#[test]
fn noise_lfsr_7bit_period_is_127() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF21, 0xF0, &mut clock);
    audio.write_reg(0xFF22, 0x08, &mut clock); // 7-bit, divisor 8
    audio.write_reg(0xFF23, 0x80, &mut clock);
    let initial = audio.ch4_lfsr();
    assert_eq!(initial, 0x40);

    let mut steps = 0u32;
    let mut prev = initial;
    for _ in 0..127 * 4 {
        audio.process_events(4);
        audio.sample_psg();
        let lfsr = audio.ch4_lfsr();
        if lfsr != prev {
            steps += 1;
            prev = lfsr;
        }
        if steps > 0 && lfsr == initial {
            break;
        }
    }
    assert_eq!(steps, 127);
}

#[test]
fn noise_lfsr_15bit_period_is_32767() {
    let mut audio = Audio::new();
    let mut clock = ClockDomain::new();
    audio.write_reg(0xFF26, 0x80, &mut clock);
    audio.write_reg(0xFF21, 0xF0, &mut clock);
    audio.write_reg(0xFF22, 0x00, &mut clock); // 15-bit, divisor 8
    audio.write_reg(0xFF23, 0x80, &mut clock);
    let initial = audio.ch4_lfsr();
    assert_eq!(initial, 0x4000);

    let mut steps = 0u32;
    let mut prev = initial;
    for _ in 0..32767 * 4 {
        audio.process_events(4);
        audio.sample_psg();
        let lfsr = audio.ch4_lfsr();
        if lfsr != prev {
            steps += 1;
            prev = lfsr;
        }
        if steps > 0 && lfsr == initial {
            break;
        }
    }
    assert_eq!(steps, 32767);
}
