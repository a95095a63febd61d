use crate::scheduler::{ClockDomain, NO_EVENT};

/// Base DIV prescaler period in CPU cycles.
const DIV_PERIOD: i32 = 256;
/// Timer bit in the IF register.
const TIMER_IRQ: u8 = 0x04;

pub struct Timer {
    /// Memory-mapped DIV byte (the visible top of the prescaler).
    pub div: u8,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    /// Cycles until the next DIV increment.
    next_div: i32,
    /// Cycles until the next TIMA increment; [`NO_EVENT`] while disabled.
    next_tima: i32,
    /// Cycles until this peripheral next needs service.
    next_event: i32,
    /// Cycles accumulated since the deadlines were last re-based. Register
    /// writes between service rounds use this to anchor new deadlines.
    event_diff: i32,
    tima_period: i32,
}

impl Timer {
    pub fn new() -> Self {
        let mut timer = Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            next_div: 0,
            next_tima: 0,
            next_event: 0,
            event_diff: 0,
            tima_period: 0,
        };
        timer.reset();
        timer
    }

    pub fn reset(&mut self) {
        self.div = 0;
        self.tima = 0;
        self.tma = 0;
        self.tac = 0;
        self.next_div = DIV_PERIOD;
        self.next_tima = NO_EVENT;
        self.next_event = DIV_PERIOD;
        self.event_diff = 0;
        self.tima_period = 1024;
    }

    /// Advance by `cycles` CPU cycles, retiring any DIV/TIMA deadlines that
    /// came due. Sets the timer bit in `if_reg` on TIMA overflow and returns
    /// the cycles until the next deadline.
    pub fn process_events(&mut self, cycles: i32, if_reg: &mut u8) -> i32 {
        self.event_diff += cycles;
        self.next_event -= cycles;
        if self.next_event <= 0 {
            self.next_div -= self.event_diff;
            if self.next_div <= 0 {
                self.div = self.div.wrapping_add(1);
                self.next_div = DIV_PERIOD;
            }
            self.next_event = self.next_div;

            if self.next_tima != NO_EVENT {
                self.next_tima -= self.event_diff;
                if self.next_tima <= 0 {
                    self.tima = self.tima.wrapping_add(1);
                    if self.tima == 0 {
                        self.tima = self.tma;
                        *if_reg |= TIMER_IRQ;
                    }
                    self.next_tima = self.tima_period;
                }
                if self.next_tima < self.next_event {
                    self.next_event = self.next_tima;
                }
            }

            self.event_diff = 0;
        }
        self.next_event
    }

    /// A write of any value to DIV zeroes the visible byte and restarts the
    /// prescaler from the current CPU cycle.
    pub fn div_reset(&mut self, clock: &mut ClockDomain) {
        self.div = 0;
        self.next_div = self.event_diff + clock.cycles + DIV_PERIOD;
        if self.event_diff + DIV_PERIOD < self.next_event {
            self.next_event = self.event_diff + DIV_PERIOD;
            clock.lower_next_event(self.next_event);
        }
    }

    /// Apply a TAC write: select the TIMA period from the clock field when
    /// the run bit is set, otherwise disable TIMA entirely.
    pub fn update_tac(&mut self, value: u8, clock: &mut ClockDomain) {
        self.tac = value & 0x07;
        if self.tac & 0x04 != 0 {
            self.tima_period = match self.tac & 0x03 {
                0 => 1024,
                1 => 16,
                2 => 64,
                _ => 256,
            };
            self.update_tima(clock);
        } else {
            self.next_tima = NO_EVENT;
        }
    }

    /// Re-base the TIMA deadline relative to the current CPU cycle.
    pub fn update_tima(&mut self, clock: &mut ClockDomain) {
        self.next_tima = self.event_diff + clock.cycles + self.tima_period;
        if self.event_diff + self.tima_period < self.next_event {
            self.next_event = self.event_diff + self.tima_period;
            clock.lower_next_event(self.next_event);
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => self.div,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, value: u8, clock: &mut ClockDomain) {
        match addr {
            0xFF04 => self.div_reset(clock),
            0xFF05 => self.tima = value,
            0xFF06 => self.tma = value,
            0xFF07 => self.update_tac(value, clock),
            _ => {}
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
