use std::sync::Arc;

use crate::hardware::{Quirks, Style};
use crate::scheduler::{ClockDomain, CPU_CLOCK_HZ, NO_EVENT};
use crate::sync::CoreSync;

// 512 Hz frame sequencer tick.
const FRAME_CYCLES: i32 = (CPU_CLOCK_HZ >> 9) as i32;
// The resampler frame is ended every 4096 CPU cycles.
const CLOCKS_PER_BLIP_FRAME: i32 = 0x1000;
const DEFAULT_SAMPLE_INTERVAL: i32 = 128;
const DEFAULT_SAMPLES: usize = 512;

pub const AUDIO_VOLUME_MAX: i32 = 0x100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Envelope saturation state. A saturated envelope stops ticking until the
/// channel is restarted; a channel whose envelope saturated at zero also
/// stops producing waveform edges.
pub enum EnvelopeDead {
    #[default]
    Alive,
    SaturatedHigh,
    SaturatedLow,
}

#[derive(Clone, Copy, Default)]
struct Envelope {
    /// Raw NRx1 length field (write-only).
    length: u8,
    duty: u8,
    step_time: u8,
    /// True when the envelope increases.
    direction: bool,
    initial_volume: u8,
    current_volume: i32,
    next_step: i32,
    dead: EnvelopeDead,
}

impl Envelope {
    fn write_duty(&mut self, value: u8) {
        self.length = value & 0x3F;
        self.duty = value >> 6;
    }

    /// Apply an NRx2 write. Returns whether the channel's DAC stays powered
    /// (a zeroed volume with a downward direction silences it).
    fn write_control(&mut self, value: u8) -> bool {
        self.step_time = value & 0x07;
        self.direction = value & 0x08 != 0;
        self.initial_volume = value >> 4;
        self.dead = if self.step_time == 0 {
            if self.current_volume != 0 {
                EnvelopeDead::SaturatedHigh
            } else {
                EnvelopeDead::SaturatedLow
            }
        } else if !self.direction && self.current_volume == 0 {
            EnvelopeDead::SaturatedLow
        } else if self.direction && self.current_volume == 0xF {
            EnvelopeDead::SaturatedHigh
        } else {
            EnvelopeDead::Alive
        };
        self.next_step = i32::from(self.step_time);
        self.initial_volume != 0 || self.direction
    }

    /// One envelope step: adjust the volume and either saturate or reload
    /// the step countdown.
    fn update(&mut self) {
        if self.direction {
            self.current_volume += 1;
        } else {
            self.current_volume -= 1;
        }
        if self.current_volume >= 15 {
            self.current_volume = 15;
            self.dead = EnvelopeDead::SaturatedHigh;
        } else if self.current_volume <= 0 {
            self.current_volume = 0;
            self.dead = EnvelopeDead::SaturatedLow;
        } else {
            self.next_step = i32::from(self.step_time);
        }
    }

    /// Restart bookkeeping shared by every trigger: reload the volume and
    /// derive the saturation state from the programmed step time.
    fn restart(&mut self) {
        self.current_volume = i32::from(self.initial_volume);
        self.dead = if self.step_time != 0 {
            EnvelopeDead::Alive
        } else if self.current_volume > 0 {
            EnvelopeDead::SaturatedHigh
        } else {
            EnvelopeDead::SaturatedLow
        };
    }
}

#[derive(Clone, Copy, Default)]
struct SquareControl {
    frequency: i32,
    length: i32,
    /// Length-enable flag (bit 6 of NRx4).
    stop: bool,
    /// Current half of the duty waveform.
    hi: bool,
}

/// Flip the waveform edge and return the length of the new half-period.
/// The duty ratio is expressed by how unevenly the period splits.
fn update_square(control: &mut SquareControl, duty: u8) -> i32 {
    control.hi = !control.hi;
    let period = 4 * (2048 - control.frequency);
    match duty {
        0 => {
            if control.hi {
                period
            } else {
                period * 7
            }
        }
        1 => {
            if control.hi {
                period * 2
            } else {
                period * 6
            }
        }
        2 => period * 4,
        _ => {
            if control.hi {
                period * 6
            } else {
                period * 2
            }
        }
    }
}

#[derive(Default)]
struct Channel1 {
    envelope: Envelope,
    control: SquareControl,
    shift: u8,
    /// True when the sweep subtracts.
    direction: bool,
    /// Sweep pace from NR10; 0 is stored as 8 and performs no writeback.
    time: u8,
    sweep_step: u8,
    sweep_enable: bool,
    /// A sweep calculation has run since the last trigger. An NR10 write
    /// that flips the sweep from subtract to add afterwards kills the
    /// channel.
    sweep_occurred: bool,
    real_frequency: i32,
    sample: i32,
}

impl Channel1 {
    /// One sweep calculation. `initial` marks the overflow-only check run at
    /// trigger time. Returns whether the channel survives.
    fn update_sweep(&mut self, initial: bool) -> bool {
        if initial || self.time != 8 {
            let mut frequency = self.real_frequency;
            if self.direction {
                frequency -= frequency >> self.shift;
                if !initial && frequency >= 0 {
                    self.control.frequency = frequency;
                    self.real_frequency = frequency;
                }
            } else {
                frequency += frequency >> self.shift;
                if frequency < 2048 {
                    if !initial && self.shift != 0 {
                        self.control.frequency = frequency;
                        self.real_frequency = frequency;
                        // The hardware re-runs the overflow check against
                        // the frequency it just wrote back.
                        if !self.update_sweep(true) {
                            return false;
                        }
                    }
                } else {
                    return false;
                }
            }
            self.sweep_occurred = true;
        }
        self.sweep_step = self.time;
        true
    }

    fn update(&mut self) -> i32 {
        let timing = update_square(&mut self.control, self.envelope.duty);
        let base = if self.control.hi { 8 } else { -8 };
        self.sample = base * self.envelope.current_volume;
        timing
    }
}

#[derive(Default)]
struct Channel2 {
    envelope: Envelope,
    control: SquareControl,
    sample: i32,
}

impl Channel2 {
    fn update(&mut self) -> i32 {
        let timing = update_square(&mut self.control, self.envelope.duty);
        let base = if self.control.hi { 8 } else { -8 };
        self.sample = base * self.envelope.current_volume;
        timing
    }
}

#[derive(Default)]
struct Channel3 {
    enable: bool,
    length: i32,
    volume: u8,
    rate: i32,
    stop: bool,
    /// GBA: play the full 64-sample table instead of one bank.
    size: bool,
    /// GBA: bank selected for playback.
    bank: bool,
    /// Nibble offset of the sample currently being fetched.
    window: u8,
    /// Wave RAM is readable by the CPU for a short window after each fetch.
    readable: bool,
    sample: i32,
    wavedata: [u8; 32],
}

impl Channel3 {
    fn word(&self, index: usize) -> u32 {
        u32::from_le_bytes([
            self.wavedata[4 * index],
            self.wavedata[4 * index + 1],
            self.wavedata[4 * index + 2],
            self.wavedata[4 * index + 3],
        ])
    }

    fn set_word(&mut self, index: usize, value: u32) {
        self.wavedata[4 * index..4 * index + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Fetch the next 4-bit sample and return the half-period until the
    /// following fetch.
    fn update(&mut self, style: Style) -> i32 {
        let volume = match self.volume {
            0 => 0,
            1 => 4,
            2 => 2,
            3 => 1,
            // GBA-only forced 75% level.
            _ => 3,
        };
        match style {
            Style::Dmg | Style::Cgb => {
                self.window = (self.window + 1) & 0x1F;
                let byte = self.wavedata[(self.window >> 1) as usize];
                let nibble = if self.window & 1 == 0 {
                    byte >> 4
                } else {
                    byte & 0x0F
                };
                self.sample = i32::from(nibble);
            }
            Style::Gba => {
                // The GBA implementation rotates the selected bank by one
                // nibble per fetch instead of tracking a window: each 32-bit
                // word shifts its nibbles and takes the carried high nibble
                // of the following word. The emitted sample is the nibble
                // that falls off the end.
                let (start, end) = if self.size {
                    (7, 0)
                } else if self.bank {
                    (7, 4)
                } else {
                    (3, 0)
                };
                let mut carry = self.word(end) & 0x0000_00F0;
                let mut i = start;
                loop {
                    let bits = self.word(i) & 0x0000_00F0;
                    let word = self.word(i);
                    let rotated =
                        ((word & 0x0F0F_0F0F) << 4) | ((word & 0xF0F0_F000) >> 12) | (carry << 20);
                    self.set_word(i, rotated);
                    carry = bits;
                    if i == end {
                        break;
                    }
                    i -= 1;
                }
                self.sample = (carry >> 4) as i32;
            }
        }
        self.sample -= 8;
        self.sample *= volume * 4;
        2 * (2048 - self.rate)
    }
}

#[derive(Default)]
struct Channel4 {
    envelope: Envelope,
    ratio: u8,
    frequency: u8,
    /// 7-bit LFSR mode.
    power: bool,
    stop: bool,
    length: i32,
    lfsr: i32,
    sample: i32,
}

impl Channel4 {
    /// Clock the LFSR once and return the cycles until the next clock.
    fn update(&mut self) -> i32 {
        let lsb = self.lfsr & 1;
        self.sample = (lsb * 0x10 - 0x8) * self.envelope.current_volume;
        self.lfsr >>= 1;
        self.lfsr ^= (lsb * 0x60) << if self.power { 0 } else { 8 };
        let mut timing = if self.ratio != 0 {
            2 * i32::from(self.ratio)
        } else {
            1
        };
        timing <<= self.frequency;
        timing * 8
    }
}

pub struct Audio {
    style: Style,
    quirks: Quirks,
    ch1: Channel1,
    ch2: Channel2,
    ch3: Channel3,
    ch4: Channel4,
    playing_ch1: bool,
    playing_ch2: bool,
    playing_ch3: bool,
    playing_ch4: bool,
    /// Master enable (NR52 bit 7).
    enable: bool,
    /// 512 Hz frame sequencer phase (0-7).
    frame: i32,
    next_frame: i32,
    next_ch1: i32,
    next_ch2: i32,
    next_ch3: i32,
    next_ch4: i32,
    /// Trailing window during which wave RAM stays readable after a fetch.
    fade_ch3: i32,
    next_event: i32,
    event_diff: i32,
    next_sample: i32,
    sample_interval: i32,
    /// Position inside the current resampler frame.
    clock: i32,
    last_left: i16,
    last_right: i16,
    volume_left: u8,
    volume_right: u8,
    left_enable: [bool; 4],
    right_enable: [bool; 4],
    /// Debug mutes; bypass the mixer without touching channel state.
    force_disable: [bool; 4],
    master_volume: i32,
    /// Resampler fill target before the producer requests a consumer.
    samples: usize,
    /// Register file mirror for NR10-NR51 readback.
    regs: [u8; 0x20],
    sync: Option<Arc<CoreSync>>,
}

impl Audio {
    pub fn new() -> Self {
        Self::new_with_style(Style::Dmg)
    }

    pub fn new_with_style(style: Style) -> Self {
        Self::new_with_config(style, DEFAULT_SAMPLES)
    }

    pub fn new_with_config(style: Style, samples: usize) -> Self {
        let mut audio = Self {
            style,
            quirks: Quirks::for_style(style),
            ch1: Channel1::default(),
            ch2: Channel2::default(),
            ch3: Channel3::default(),
            ch4: Channel4::default(),
            playing_ch1: false,
            playing_ch2: false,
            playing_ch3: false,
            playing_ch4: false,
            enable: false,
            frame: 0,
            next_frame: 0,
            next_ch1: 0,
            next_ch2: 0,
            next_ch3: 0,
            next_ch4: 0,
            fade_ch3: 0,
            next_event: 0,
            event_diff: 0,
            next_sample: 0,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            clock: 0,
            last_left: 0,
            last_right: 0,
            volume_left: 0,
            volume_right: 0,
            left_enable: [false; 4],
            right_enable: [false; 4],
            force_disable: [false; 4],
            master_volume: AUDIO_VOLUME_MAX,
            samples,
            regs: [0; 0x20],
            sync: None,
        };
        audio.reset();
        audio
    }

    pub fn reset(&mut self) {
        self.next_event = 0;
        self.next_ch1 = 0;
        self.next_ch2 = 0;
        self.next_ch3 = 0;
        self.next_ch4 = 0;
        self.fade_ch3 = 0;
        self.ch1 = Channel1 {
            envelope: Envelope {
                dead: EnvelopeDead::SaturatedLow,
                ..Envelope::default()
            },
            ..Channel1::default()
        };
        self.ch2 = Channel2 {
            envelope: Envelope {
                dead: EnvelopeDead::SaturatedLow,
                ..Envelope::default()
            },
            ..Channel2::default()
        };
        // Wave RAM contents survive a reset.
        let wavedata = self.ch3.wavedata;
        self.ch3 = Channel3 {
            wavedata,
            ..Channel3::default()
        };
        self.ch4 = Channel4 {
            envelope: Envelope {
                dead: EnvelopeDead::SaturatedLow,
                ..Envelope::default()
            },
            ..Channel4::default()
        };
        self.event_diff = 0;
        self.next_frame = 0;
        self.frame = 0;
        self.next_sample = 0;
        self.sample_interval = DEFAULT_SAMPLE_INTERVAL;
        self.last_left = 0;
        self.last_right = 0;
        self.clock = 0;
        self.volume_left = 0;
        self.volume_right = 0;
        self.left_enable = [false; 4];
        self.right_enable = [false; 4];
        self.playing_ch1 = false;
        self.playing_ch2 = false;
        self.playing_ch3 = false;
        self.playing_ch4 = false;
        self.enable = false;
        self.regs = [0; 0x20];
    }

    pub fn set_sync(&mut self, sync: Arc<CoreSync>) {
        self.sync = Some(sync);
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn set_quirks(&mut self, quirks: Quirks) {
        self.quirks = quirks;
    }

    /// Mute a channel in the mixer without touching its state.
    pub fn force_disable_channel(&mut self, channel: usize, disable: bool) {
        self.force_disable[channel] = disable;
    }

    /// Linear output scale, 0-256.
    pub fn set_master_volume(&mut self, volume: i32) {
        self.master_volume = volume.clamp(0, AUDIO_VOLUME_MAX);
    }

    /// Swap the resampler fill target, dropping whatever was buffered.
    pub fn resize_buffer(&mut self, samples: usize) {
        self.samples = samples;
        let Some(sync) = self.sync.as_ref().map(Arc::clone) else {
            return;
        };
        let mut buffer = sync.lock_audio();
        buffer.clear();
        self.clock = 0;
        sync.consume_audio(buffer);
    }

    // Test/debug accessors.
    pub fn sequencer_frame(&self) -> i32 {
        self.frame
    }

    pub fn ch1_volume(&self) -> i32 {
        self.ch1.envelope.current_volume
    }

    pub fn ch3_window(&self) -> u8 {
        self.ch3.window
    }

    pub fn ch4_lfsr(&self) -> i32 {
        self.ch4.lfsr
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF15 | 0xFF1F => 0xFF,
            _ => 0xFF,
        }
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        if addr == 0xFF26 {
            let mut value = 0x70;
            if self.enable {
                value |= 0x80;
            }
            value |= u8::from(self.playing_ch1);
            value |= u8::from(self.playing_ch2) << 1;
            value |= u8::from(self.playing_ch3) << 2;
            value |= u8::from(self.playing_ch4) << 3;
            return value;
        }
        if (0xFF30..=0xFF3F).contains(&addr) {
            return self.read_wave_ram(addr);
        }
        if !(0xFF10..=0xFF2F).contains(&addr) {
            return 0xFF;
        }
        let idx = (addr - 0xFF10) as usize;
        self.regs[idx] | Self::read_mask(addr)
    }

    pub fn write_reg(&mut self, addr: u16, value: u8, clock: &mut ClockDomain) {
        if !self.enable && addr != 0xFF26 && !(0xFF30..=0xFF3F).contains(&addr) {
            // DMG keeps accepting raw length writes while powered off.
            if self.style == Style::Dmg {
                match addr {
                    0xFF11 => {
                        self.ch1.envelope.length = value & 0x3F;
                        self.ch1.control.length = 64 - i32::from(value & 0x3F);
                    }
                    0xFF16 => {
                        self.ch2.envelope.length = value & 0x3F;
                        self.ch2.control.length = 64 - i32::from(value & 0x3F);
                    }
                    0xFF1B => {
                        self.ch3.length = 256 - i32::from(value);
                    }
                    0xFF20 => {
                        self.ch4.envelope.length = value & 0x3F;
                        self.ch4.length = 64 - i32::from(value & 0x3F);
                    }
                    _ => {}
                }
            }
            return;
        }

        if (0xFF10..=0xFF2F).contains(&addr) {
            self.regs[(addr - 0xFF10) as usize] = value;
        }

        match addr {
            0xFF10 => self.write_nr10(value),
            0xFF11 => self.write_nr11(value),
            0xFF12 => self.write_nr12(value),
            0xFF13 => self.write_nr13(value),
            0xFF14 => self.write_nr14(value, clock),
            0xFF16 => self.write_nr21(value),
            0xFF17 => self.write_nr22(value),
            0xFF18 => self.write_nr23(value),
            0xFF19 => self.write_nr24(value, clock),
            0xFF1A => self.write_nr30(value),
            0xFF1B => self.write_nr31(value),
            0xFF1C => self.write_nr32(value),
            0xFF1D => self.write_nr33(value),
            0xFF1E => self.write_nr34(value, clock),
            0xFF20 => self.write_nr41(value),
            0xFF21 => self.write_nr42(value),
            0xFF22 => self.write_nr43(value),
            0xFF23 => self.write_nr44(value, clock),
            0xFF24 => self.write_nr50(value),
            0xFF25 => self.write_nr51(value),
            0xFF26 => self.write_nr52(value, clock),
            0xFF30..=0xFF3F => self.write_wave_ram(addr, value),
            _ => {}
        }
    }

    fn write_nr10(&mut self, value: u8) {
        self.ch1.shift = value & 0x07;
        let old_direction = self.ch1.direction;
        self.ch1.direction = value & 0x08 != 0;
        if self.ch1.sweep_occurred && old_direction && !self.ch1.direction {
            self.playing_ch1 = false;
        }
        self.ch1.sweep_occurred = false;
        self.ch1.time = (value >> 4) & 0x07;
        if self.ch1.time == 0 {
            self.ch1.time = 8;
        }
    }

    fn write_nr11(&mut self, value: u8) {
        self.ch1.envelope.write_duty(value);
        self.ch1.control.length = 64 - i32::from(self.ch1.envelope.length);
    }

    fn write_nr12(&mut self, value: u8) {
        if !self.ch1.envelope.write_control(value) {
            self.playing_ch1 = false;
        }
    }

    fn write_nr13(&mut self, value: u8) {
        self.ch1.control.frequency = (self.ch1.control.frequency & 0x700) | i32::from(value);
    }

    fn write_nr14(&mut self, value: u8, clock: &mut ClockDomain) {
        self.ch1.control.frequency =
            (self.ch1.control.frequency & 0xFF) | (i32::from(value & 0x07) << 8);
        let was_stop = self.ch1.control.stop;
        self.ch1.control.stop = value & 0x40 != 0;
        if !was_stop && self.ch1.control.stop && self.ch1.control.length != 0 && self.frame & 1 == 0
        {
            self.ch1.control.length -= 1;
            if self.ch1.control.length == 0 {
                self.playing_ch1 = false;
            }
        }
        if value & 0x80 != 0 {
            if self.next_event == NO_EVENT {
                self.event_diff = 0;
            }
            if self.playing_ch1 {
                self.ch1.control.hi = !self.ch1.control.hi;
            }
            self.next_ch1 = self.event_diff;
            self.playing_ch1 =
                self.ch1.envelope.initial_volume != 0 || self.ch1.envelope.direction;
            self.ch1.envelope.restart();
            self.ch1.real_frequency = self.ch1.control.frequency;
            self.ch1.sweep_step = self.ch1.time;
            self.ch1.sweep_enable = self.ch1.sweep_step != 8 || self.ch1.shift != 0;
            self.ch1.sweep_occurred = false;
            if self.playing_ch1 && self.ch1.shift != 0 {
                self.playing_ch1 = self.ch1.update_sweep(true);
            }
            if self.ch1.control.length == 0 {
                self.ch1.control.length = 64;
                if self.ch1.control.stop && self.frame & 1 == 0 {
                    self.ch1.control.length -= 1;
                }
            }
            self.schedule_event(clock);
        }
    }

    fn write_nr21(&mut self, value: u8) {
        self.ch2.envelope.write_duty(value);
        self.ch2.control.length = 64 - i32::from(self.ch2.envelope.length);
    }

    fn write_nr22(&mut self, value: u8) {
        if !self.ch2.envelope.write_control(value) {
            self.playing_ch2 = false;
        }
    }

    fn write_nr23(&mut self, value: u8) {
        self.ch2.control.frequency = (self.ch2.control.frequency & 0x700) | i32::from(value);
    }

    fn write_nr24(&mut self, value: u8, clock: &mut ClockDomain) {
        self.ch2.control.frequency =
            (self.ch2.control.frequency & 0xFF) | (i32::from(value & 0x07) << 8);
        let was_stop = self.ch2.control.stop;
        self.ch2.control.stop = value & 0x40 != 0;
        if !was_stop && self.ch2.control.stop && self.ch2.control.length != 0 && self.frame & 1 == 0
        {
            self.ch2.control.length -= 1;
            if self.ch2.control.length == 0 {
                self.playing_ch2 = false;
            }
        }
        if value & 0x80 != 0 {
            self.playing_ch2 =
                self.ch2.envelope.initial_volume != 0 || self.ch2.envelope.direction;
            self.ch2.envelope.restart();
            if self.next_event == NO_EVENT {
                self.event_diff = 0;
            }
            if self.playing_ch2 {
                self.ch2.control.hi = !self.ch2.control.hi;
            }
            self.next_ch2 = self.event_diff;
            if self.ch2.control.length == 0 {
                self.ch2.control.length = 64;
                if self.ch2.control.stop && self.frame & 1 == 0 {
                    self.ch2.control.length -= 1;
                }
            }
            self.schedule_event(clock);
        }
    }

    fn write_nr30(&mut self, value: u8) {
        self.ch3.enable = value & 0x80 != 0;
        if self.style.has_banked_wave_ram() {
            self.ch3.size = value & 0x20 != 0;
            self.ch3.bank = value & 0x40 != 0;
        }
        if !self.ch3.enable {
            self.playing_ch3 = false;
        }
    }

    fn write_nr31(&mut self, value: u8) {
        self.ch3.length = 256 - i32::from(value);
    }

    fn write_nr32(&mut self, value: u8) {
        self.ch3.volume = (value >> 5) & 0x03;
        if self.style == Style::Gba && value & 0x80 != 0 {
            // Forced 75% level, encoded past the two-bit codes.
            self.ch3.volume = 4;
        }
    }

    fn write_nr33(&mut self, value: u8) {
        self.ch3.rate = (self.ch3.rate & 0x700) | i32::from(value);
    }

    fn write_nr34(&mut self, value: u8, clock: &mut ClockDomain) {
        self.ch3.rate = (self.ch3.rate & 0xFF) | (i32::from(value & 0x07) << 8);
        let was_stop = self.ch3.stop;
        self.ch3.stop = value & 0x40 != 0;
        if !was_stop && self.ch3.stop && self.ch3.length != 0 && self.frame & 1 == 0 {
            self.ch3.length -= 1;
            if self.ch3.length == 0 {
                self.playing_ch3 = false;
            }
        }
        let was_playing = self.playing_ch3;
        if value & 0x80 != 0 {
            self.playing_ch3 = self.ch3.enable;
            if self.ch3.length == 0 {
                self.ch3.length = 256;
                if self.ch3.stop && self.frame & 1 == 0 {
                    self.ch3.length -= 1;
                }
            }

            if self.quirks.wave_corruption
                && was_playing
                && self.playing_ch3
                && self.ch3.readable
            {
                // Re-triggering during a fetch clobbers the start of wave
                // RAM with whatever the channel was reading.
                let window = (self.ch3.window >> 1) as usize;
                if self.ch3.window < 8 {
                    self.ch3.wavedata[0] = self.ch3.wavedata[window];
                } else {
                    let base = window & !0x03;
                    for i in 0..4 {
                        self.ch3.wavedata[i] = self.ch3.wavedata[base + i];
                    }
                }
            }
            self.ch3.window = 0;
        }
        if self.playing_ch3 {
            if self.next_event == NO_EVENT {
                self.event_diff = 0;
            }
            self.ch3.readable = !self.style.has_wave_read_window();
            self.schedule_event(clock);
            // TODO: confirm the +4 cycle restart offset against hardware.
            self.next_ch3 = self.event_diff + self.next_event + 4 + 2 * (2048 - self.ch3.rate);
        }
    }

    fn write_nr41(&mut self, value: u8) {
        self.ch4.envelope.write_duty(value);
        self.ch4.length = 64 - i32::from(self.ch4.envelope.length);
    }

    fn write_nr42(&mut self, value: u8) {
        if !self.ch4.envelope.write_control(value) {
            self.playing_ch4 = false;
        }
    }

    fn write_nr43(&mut self, value: u8) {
        self.ch4.ratio = value & 0x07;
        self.ch4.power = value & 0x08 != 0;
        self.ch4.frequency = value >> 4;
    }

    fn write_nr44(&mut self, value: u8, clock: &mut ClockDomain) {
        let was_stop = self.ch4.stop;
        self.ch4.stop = value & 0x40 != 0;
        if !was_stop && self.ch4.stop && self.ch4.length != 0 && self.frame & 1 == 0 {
            self.ch4.length -= 1;
            if self.ch4.length == 0 {
                self.playing_ch4 = false;
            }
        }
        if value & 0x80 != 0 {
            self.playing_ch4 =
                self.ch4.envelope.initial_volume != 0 || self.ch4.envelope.direction;
            self.ch4.envelope.restart();
            self.ch4.lfsr = if self.ch4.power { 0x40 } else { 0x4000 };
            if self.next_event == NO_EVENT {
                self.event_diff = 0;
            }
            self.next_ch4 = self.event_diff;
            if self.ch4.length == 0 {
                self.ch4.length = 64;
                if self.ch4.stop && self.frame & 1 == 0 {
                    self.ch4.length -= 1;
                }
            }
            self.schedule_event(clock);
        }
    }

    fn write_nr50(&mut self, value: u8) {
        self.volume_right = value & 0x07;
        self.volume_left = (value >> 4) & 0x07;
    }

    fn write_nr51(&mut self, value: u8) {
        for ch in 0..4 {
            self.right_enable[ch] = value & (1 << ch) != 0;
            self.left_enable[ch] = value & (1 << (ch + 4)) != 0;
        }
    }

    fn write_nr52(&mut self, value: u8, clock: &mut ClockDomain) {
        let was_enable = self.enable;
        self.enable = value & 0x80 != 0;
        if !self.enable {
            self.playing_ch1 = false;
            self.playing_ch2 = false;
            self.playing_ch3 = false;
            self.playing_ch4 = false;
            self.write_nr10(0);
            self.write_nr12(0);
            self.write_nr13(0);
            self.write_nr14(0, clock);
            self.write_nr22(0);
            self.write_nr23(0);
            self.write_nr24(0, clock);
            self.write_nr30(0);
            self.write_nr32(0);
            self.write_nr33(0);
            self.write_nr34(0, clock);
            self.write_nr42(0);
            self.write_nr43(0);
            self.write_nr44(0, clock);
            self.write_nr50(0);
            self.write_nr51(0);
            if self.style.clears_length_on_power_off() {
                self.write_nr11(0);
                self.write_nr21(0);
                self.write_nr31(0);
                self.write_nr41(0);
            }
            self.regs = [0; 0x20];
        } else if !was_enable {
            // The first frame tick after re-enabling lands on phase 0.
            self.frame = 7;
        }
    }

    fn read_wave_ram(&self, addr: u16) -> u8 {
        if self.playing_ch3 {
            if self.style.has_wave_read_window() && !self.ch3.readable {
                return 0xFF;
            }
            return self.ch3.wavedata[(self.ch3.window >> 1) as usize];
        }
        let offset = (addr - 0xFF30) as usize;
        self.ch3.wavedata[self.wave_bank_offset() + offset]
    }

    fn write_wave_ram(&mut self, addr: u16, value: u8) {
        if self.playing_ch3 {
            if !self.style.has_wave_read_window() || self.ch3.readable {
                let window = (self.ch3.window >> 1) as usize;
                self.ch3.wavedata[window] = value;
            }
            return;
        }
        let offset = (addr - 0xFF30) as usize;
        self.ch3.wavedata[self.wave_bank_offset() + offset] = value;
    }

    /// The CPU addresses the bank that is not selected for playback.
    fn wave_bank_offset(&self) -> usize {
        if self.style.has_banked_wave_ram() && !self.ch3.size {
            if self.ch3.bank { 0 } else { 16 }
        } else {
            0
        }
    }

    fn schedule_event(&mut self, clock: &mut ClockDomain) {
        self.next_event = clock.schedule_now();
    }

    /// Advance by `cycles` CPU cycles, retiring every deadline that came
    /// due: frame sequencer phases, channel half-periods, the wave
    /// readability fade and the output sample clock. Returns the cycles
    /// until the next deadline, or [`NO_EVENT`] while fully idle.
    pub fn process_events(&mut self, cycles: i32) -> i32 {
        if self.next_event == NO_EVENT {
            return NO_EVENT;
        }
        self.next_event -= cycles;
        self.event_diff += cycles;
        while self.next_event <= 0 {
            self.next_event = NO_EVENT;
            if self.enable {
                self.next_frame -= self.event_diff;
                let mut frame = -1;
                if self.next_frame <= 0 {
                    frame = (self.frame + 1) & 7;
                    self.frame = frame;
                    self.next_frame += FRAME_CYCLES;
                    if self.next_frame < self.next_event {
                        self.next_event = self.next_frame;
                    }
                }

                if self.playing_ch1 {
                    self.next_ch1 -= self.event_diff;
                    if self.ch1.envelope.dead == EnvelopeDead::Alive && frame == 7 {
                        self.ch1.envelope.next_step -= 1;
                        if self.ch1.envelope.next_step == 0 {
                            let base = if self.ch1.control.hi { 8 } else { -8 };
                            self.ch1.envelope.update();
                            self.ch1.sample = base * self.ch1.envelope.current_volume;
                        }
                    }

                    if self.ch1.sweep_enable && frame & 3 == 2 {
                        self.ch1.sweep_step -= 1;
                        if self.ch1.sweep_step == 0 {
                            self.playing_ch1 = self.ch1.update_sweep(false);
                        }
                    }

                    if self.ch1.envelope.dead != EnvelopeDead::SaturatedLow {
                        if self.next_ch1 <= 0 {
                            self.next_ch1 += self.ch1.update();
                        }
                        if self.next_ch1 < self.next_event {
                            self.next_event = self.next_ch1;
                        }
                    }
                }

                if self.ch1.control.length != 0 && self.ch1.control.stop && frame & 1 == 0 {
                    self.ch1.control.length -= 1;
                    if self.ch1.control.length == 0 {
                        self.playing_ch1 = false;
                    }
                }

                if self.playing_ch2 {
                    self.next_ch2 -= self.event_diff;
                    if self.ch2.envelope.dead == EnvelopeDead::Alive && frame == 7 {
                        self.ch2.envelope.next_step -= 1;
                        if self.ch2.envelope.next_step == 0 {
                            let base = if self.ch2.control.hi { 8 } else { -8 };
                            self.ch2.envelope.update();
                            self.ch2.sample = base * self.ch2.envelope.current_volume;
                        }
                    }

                    if self.ch2.envelope.dead != EnvelopeDead::SaturatedLow {
                        if self.next_ch2 <= 0 {
                            self.next_ch2 += self.ch2.update();
                        }
                        if self.next_ch2 < self.next_event {
                            self.next_event = self.next_ch2;
                        }
                    }
                }

                if self.ch2.control.length != 0 && self.ch2.control.stop && frame & 1 == 0 {
                    self.ch2.control.length -= 1;
                    if self.ch2.control.length == 0 {
                        self.playing_ch2 = false;
                    }
                }

                if self.playing_ch3 {
                    self.next_ch3 -= self.event_diff;
                    self.fade_ch3 -= self.event_diff;
                    if self.fade_ch3 <= 0 {
                        self.ch3.readable = false;
                        self.fade_ch3 = NO_EVENT;
                    }
                    if self.next_ch3 <= 0 {
                        if self.style.has_wave_read_window() {
                            self.fade_ch3 = self.next_ch3 + 2;
                        }
                        self.next_ch3 += self.ch3.update(self.style);
                        self.ch3.readable = true;
                    }
                    if self.fade_ch3 < self.next_event {
                        self.next_event = self.fade_ch3;
                    }
                    if self.next_ch3 < self.next_event {
                        self.next_event = self.next_ch3;
                    }
                }

                if self.ch3.length != 0 && self.ch3.stop && frame & 1 == 0 {
                    self.ch3.length -= 1;
                    if self.ch3.length == 0 {
                        self.playing_ch3 = false;
                    }
                }

                if self.playing_ch4 {
                    self.next_ch4 -= self.event_diff;
                    if self.ch4.envelope.dead == EnvelopeDead::Alive && frame == 7 {
                        self.ch4.envelope.next_step -= 1;
                        if self.ch4.envelope.next_step == 0 {
                            let base = if self.ch4.sample < 0 { -8 } else { 0 };
                            self.ch4.envelope.update();
                            self.ch4.sample = base * self.ch4.envelope.current_volume;
                        }
                    }
                }

                if self.ch4.length != 0 && self.ch4.stop && frame & 1 == 0 {
                    self.ch4.length -= 1;
                    if self.ch4.length == 0 {
                        self.playing_ch4 = false;
                    }
                }
            }

            if self.sync.is_some() {
                self.next_sample -= self.event_diff;
                if self.next_sample <= 0 {
                    self.sample(self.sample_interval);
                    self.next_sample += self.sample_interval;
                }
                if self.next_sample < self.next_event {
                    self.next_event = self.next_sample;
                }
            }
            self.event_diff = 0;
        }
        self.next_event
    }

    /// Mix the four channels into one stereo PSG sample, catching the noise
    /// channel's LFSR up to the present first.
    pub fn sample_psg(&mut self) -> (i16, i16) {
        let mut left = 0i32;
        let mut right = 0i32;

        if self.ch4.envelope.dead != EnvelopeDead::SaturatedLow {
            while self.next_ch4 <= 0 {
                self.next_ch4 += self.ch4.update();
            }
            if self.next_ch4 < self.next_event {
                self.next_event = self.next_ch4;
            }
        }

        let playing = [
            self.playing_ch1,
            self.playing_ch2,
            self.playing_ch3,
            self.playing_ch4,
        ];
        let samples = [
            self.ch1.sample,
            self.ch2.sample,
            self.ch3.sample,
            self.ch4.sample,
        ];
        for ch in 0..4 {
            if !playing[ch] || self.force_disable[ch] {
                continue;
            }
            if self.left_enable[ch] {
                left += samples[ch];
            }
            if self.right_enable[ch] {
                right += samples[ch];
            }
        }

        left *= 1 + i32::from(self.volume_left);
        right *= 1 + i32::from(self.volume_right);
        (left as i16, right as i16)
    }

    /// Push one output sample into the resampler as a delta against the
    /// previous one, and hand the buffer to the consumer once it holds
    /// `samples` frames.
    fn sample(&mut self, cycles: i32) {
        let (psg_left, psg_right) = self.sample_psg();
        let sample_left = ((i32::from(psg_left) * self.master_volume) >> 6) as i16;
        let sample_right = ((i32::from(psg_right) * self.master_volume) >> 6) as i16;

        let Some(sync) = self.sync.as_ref().map(Arc::clone) else {
            return;
        };
        let mut buffer = sync.lock_audio();
        if buffer.available() < self.samples {
            buffer
                .left
                .add_delta(self.clock as u32, i32::from(sample_left - self.last_left));
            buffer.right.add_delta(
                self.clock as u32,
                i32::from(sample_right - self.last_right),
            );
            self.last_left = sample_left;
            self.last_right = sample_right;
            self.clock += cycles;
            if self.clock >= CLOCKS_PER_BLIP_FRAME {
                buffer.left.end_frame(self.clock as u32);
                buffer.right.end_frame(self.clock as u32);
                self.clock -= CLOCKS_PER_BLIP_FRAME;
            }
        }
        let produced = buffer.available();
        let wait = produced >= self.samples;
        sync.produce_audio(buffer, wait);
    }
}

impl Default for Audio {
    fn default() -> Self {
        Self::new()
    }
}
