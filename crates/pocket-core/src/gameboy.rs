use std::sync::Arc;

use crate::apu::Audio;
use crate::hardware::Style;
use crate::scheduler::{ClockDomain, Fault, NO_EVENT};
use crate::sync::CoreSync;
use crate::thread::Core;
use crate::timer::Timer;

/// Length of one video frame in CPU cycles.
pub const CYCLES_PER_FRAME: i32 = 70224;

const DEFAULT_SAMPLES: usize = 512;

/// The runtime core: the cycle clock, the peripherals hanging off it, and
/// the interrupt lines they share. The CPU decoder, cartridge mapper and
/// PPU live in separate crates and drive this through the MMIO surface.
pub struct GameBoy {
    pub clock: ClockDomain,
    pub timer: Timer,
    pub audio: Audio,
    pub if_reg: u8,
    pub ie_reg: u8,
    style: Style,
    sync: Option<Arc<CoreSync>>,
    frame_cycles: i32,
}

impl GameBoy {
    pub fn new() -> Self {
        Self::new_with_style(Style::Dmg)
    }

    pub fn new_with_style(style: Style) -> Self {
        Self::new_with_config(style, DEFAULT_SAMPLES)
    }

    pub fn new_with_config(style: Style, samples: usize) -> Self {
        let mut gb = Self {
            clock: ClockDomain::new(),
            timer: Timer::new(),
            audio: Audio::new_with_config(style, samples),
            if_reg: 0,
            ie_reg: 0,
            style,
            sync: None,
            frame_cycles: 0,
        };
        gb.reset();
        gb
    }

    pub fn style(&self) -> Style {
        self.style
    }

    /// Return to the post-boot state. Wave RAM and the loaded sync block
    /// survive.
    pub fn reset(&mut self) {
        self.clock = ClockDomain::new();
        self.timer.reset();
        self.audio.reset();
        self.if_reg = 0xE1;
        self.frame_cycles = 0;
        // Post-boot audio register state.
        self.write_io(0xFF26, 0x80);
        self.write_io(0xFF25, 0xF3);
        self.write_io(0xFF24, 0x77);
    }

    pub fn read_io(&self, addr: u16) -> u8 {
        match addr {
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.if_reg | 0xE0,
            0xFF10..=0xFF3F => self.audio.read_reg(addr),
            0xFFFF => self.ie_reg,
            _ => 0xFF,
        }
    }

    pub fn write_io(&mut self, addr: u16, value: u8) {
        match addr {
            0xFF04..=0xFF07 => self.timer.write(addr, value, &mut self.clock),
            0xFF0F => self.if_reg = value & 0x1F,
            0xFF10..=0xFF3F => self.audio.write_reg(addr, value, &mut self.clock),
            0xFFFF => self.ie_reg = value,
            _ => {}
        }
    }

    /// One dispatch round: hand every peripheral the cycles executed since
    /// the last round and take the minimum of their deadlines.
    pub fn process_events(&mut self) -> Result<(), Fault> {
        loop {
            let cycles = self.clock.cycles;
            self.clock.cycles = 0;
            self.clock.next_event = NO_EVENT;

            let next = self.timer.process_events(cycles, &mut self.if_reg);
            if next < self.clock.next_event {
                self.clock.next_event = next;
            }
            let next = self.audio.process_events(cycles);
            if next < self.clock.next_event {
                self.clock.next_event = next;
            }

            if self.clock.cycles < self.clock.next_event {
                break;
            }
        }
        if self.clock.next_event < 1 {
            return Err(Fault::StalledScheduler(self.clock.next_event));
        }
        Ok(())
    }

    /// Advance the clock by `cycles`, dispatching whenever a deadline is
    /// crossed. This is the spine the CPU step loop hangs off.
    pub fn step(&mut self, cycles: i32) -> Result<(), Fault> {
        self.clock.cycles += cycles;
        if self.clock.cycles >= self.clock.next_event {
            self.process_events()?;
        }
        Ok(())
    }
}

impl Core for GameBoy {
    fn set_sync(&mut self, sync: Arc<CoreSync>) {
        self.audio.set_sync(Arc::clone(&sync));
        self.sync = Some(sync);
    }

    fn reset(&mut self) {
        GameBoy::reset(self);
    }

    /// Run one video frame of the event-deadline loop, then publish the
    /// frame through the sync block.
    fn run_loop(&mut self) -> Result<(), Fault> {
        while self.frame_cycles < CYCLES_PER_FRAME {
            let slice = self
                .clock
                .next_event
                .min(CYCLES_PER_FRAME - self.frame_cycles)
                .max(1);
            self.frame_cycles += slice;
            self.step(slice)?;
        }
        self.frame_cycles -= CYCLES_PER_FRAME;
        if let Some(sync) = &self.sync {
            sync.post_frame();
        }
        Ok(())
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
