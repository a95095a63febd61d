//! Producer/consumer barriers pairing the emulation thread with its video
//! and audio consumers.
//!
//! Two independent pairs: the video barrier makes the worker block after
//! presenting a frame until the consumer has taken it, and the audio barrier
//! makes the worker block once the resampler holds a full buffer until the
//! consumer drains it. Either side can be switched off at runtime, and both
//! must release a blocked producer when the thread harness shuts down.
//!
//! Producer waits are generation-counted: every wake path bumps a counter so
//! a pending block is released by exactly one signal while spurious wakeups
//! re-check the predicate.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use blip_buf::BlipBuf;

use crate::scheduler::CPU_CLOCK_HZ;

const BLIP_BUFFER_SIZE: u32 = 0x4000;
const DEFAULT_FPS_TARGET: f32 = 60.0;
const FRAME_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Stereo band-limited buffer pair fed by the mixer with sample deltas and
/// drained by the audio consumer. Lives behind the audio barrier mutex; both
/// sides access it only through [`CoreSync::lock_audio`].
pub struct SampleBuffer {
    pub left: BlipBuf,
    pub right: BlipBuf,
    /// When false the producer never blocks after filling the buffer.
    pub wait: bool,
    generation: u64,
}

// blip_t carries no thread affinity; access is serialized by the owning
// mutex.
unsafe impl Send for SampleBuffer {}

impl SampleBuffer {
    fn new() -> Self {
        let mut buffer = Self {
            left: BlipBuf::new(BLIP_BUFFER_SIZE),
            right: BlipBuf::new(BLIP_BUFFER_SIZE),
            wait: false,
            generation: 0,
        };
        // Guess high; the consumer re-rates once the device rate is known.
        buffer.set_rates(96_000);
        buffer
    }

    /// Set the output sample rate for both channels.
    pub fn set_rates(&mut self, sample_rate: u32) {
        self.left
            .set_rates(f64::from(CPU_CLOCK_HZ), f64::from(sample_rate));
        self.right
            .set_rates(f64::from(CPU_CLOCK_HZ), f64::from(sample_rate));
    }

    /// Resampled output frames currently buffered.
    pub fn available(&self) -> usize {
        self.left.samples_avail() as usize
    }

    /// Read up to `out.len() / 2` interleaved stereo frames. Returns the
    /// number of frames written.
    pub fn read_interleaved(&mut self, out: &mut [i16]) -> usize {
        let frames = (out.len() / 2).min(self.available());
        if frames == 0 {
            return 0;
        }
        let mut left = vec![0i16; frames];
        let mut right = vec![0i16; frames];
        let read = self.left.read_samples(&mut left, false) as usize;
        self.right.read_samples(&mut right[..read], false);
        for i in 0..read {
            out[2 * i] = left[i];
            out[2 * i + 1] = right[i];
        }
        read
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

struct VideoFrameState {
    on: bool,
    wait: bool,
    available: bool,
    generation: u64,
    fps_target: f32,
}

struct VideoSync {
    state: Mutex<VideoFrameState>,
    available: Condvar,
    required: Condvar,
}

struct AudioSync {
    buffer: Mutex<SampleBuffer>,
    required: Condvar,
}

pub struct CoreSync {
    video: VideoSync,
    audio: AudioSync,
}

impl CoreSync {
    pub fn new() -> Self {
        Self {
            video: VideoSync {
                state: Mutex::new(VideoFrameState {
                    on: true,
                    wait: false,
                    available: false,
                    generation: 0,
                    fps_target: DEFAULT_FPS_TARGET,
                }),
                available: Condvar::new(),
                required: Condvar::new(),
            },
            audio: AudioSync {
                buffer: Mutex::new(SampleBuffer::new()),
                required: Condvar::new(),
            },
        }
    }

    /// Producer side: publish a finished frame and, when frame sync is on,
    /// block until the consumer has taken it.
    pub fn post_frame(&self) {
        let mut state = self.video.state.lock().unwrap();
        state.available = true;
        self.video.available.notify_all();
        if state.wait {
            let seen = state.generation;
            while state.wait && state.generation == seen {
                state = self.video.required.wait(state).unwrap();
            }
        }
    }

    /// Consumer side: wait for a frame to become available. Returns whether
    /// one is ready; the caller brackets its framebuffer access between this
    /// and [`Self::unlock_video_frame`].
    pub fn lock_video_frame(&self) -> bool {
        let state = self.video.state.lock().unwrap();
        self.video.required.notify_all();
        if !state.on && !state.available {
            return false;
        }
        let (mut state, timeout) = self
            .video
            .available
            .wait_timeout_while(state, FRAME_LOCK_TIMEOUT, |s| s.on && !s.available)
            .unwrap();
        if timeout.timed_out() && !state.available {
            return false;
        }
        state.available = false;
        true
    }

    /// Consumer side: release the producer after reading the frame.
    pub fn unlock_video_frame(&self) {
        let mut state = self.video.state.lock().unwrap();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.video.required.notify_all();
    }

    pub fn set_video_sync(&self, on: bool) {
        let mut state = self.video.state.lock().unwrap();
        state.on = on;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.video.required.notify_all();
    }

    /// Enable or disable the producer-side frame block, returning the
    /// previous setting.
    pub fn set_video_frame_wait(&self, wait: bool) -> bool {
        let mut state = self.video.state.lock().unwrap();
        let previous = state.wait;
        state.wait = wait;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.video.required.notify_all();
        previous
    }

    pub fn video_frame_on(&self) -> bool {
        self.video.state.lock().unwrap().on
    }

    pub fn fps_target(&self) -> f32 {
        self.video.state.lock().unwrap().fps_target
    }

    pub fn set_fps_target(&self, fps: f32) {
        self.video.state.lock().unwrap().fps_target = fps;
    }

    /// Lock the resampler output. Producer and consumer both funnel through
    /// this guard.
    pub fn lock_audio(&self) -> MutexGuard<'_, SampleBuffer> {
        self.audio.buffer.lock().unwrap()
    }

    /// Producer side: release the buffer after pushing samples. With `wait`
    /// set (the buffer reached its fill target) and audio sync enabled,
    /// block until the consumer signals.
    pub fn produce_audio(&self, mut guard: MutexGuard<'_, SampleBuffer>, wait: bool) {
        if wait {
            let seen = guard.generation;
            while guard.wait && guard.generation == seen {
                guard = self.audio.required.wait(guard).unwrap();
            }
        }
    }

    /// Consumer side: release the producer after draining.
    pub fn consume_audio(&self, mut guard: MutexGuard<'_, SampleBuffer>) {
        guard.generation = guard.generation.wrapping_add(1);
        drop(guard);
        self.audio.required.notify_all();
    }

    /// Enable or disable the producer-side audio block.
    pub fn set_audio_sync(&self, wait: bool) {
        let mut guard = self.audio.buffer.lock().unwrap();
        guard.wait = wait;
        guard.generation = guard.generation.wrapping_add(1);
        drop(guard);
        self.audio.required.notify_all();
    }

    /// Release every blocked producer and disable both barriers. Called on
    /// shutdown; safe from any thread.
    pub fn release(&self) {
        {
            let mut guard = self.audio.buffer.lock().unwrap();
            guard.wait = false;
            guard.generation = guard.generation.wrapping_add(1);
        }
        self.audio.required.notify_all();

        {
            let mut state = self.video.state.lock().unwrap();
            state.wait = false;
            state.on = false;
            state.generation = state.generation.wrapping_add(1);
        }
        self.video.required.notify_all();
        self.video.available.notify_all();
    }

    /// Non-blocking wake of a producer stuck on the audio barrier. Used by
    /// the thread harness while it waits for a state transition.
    pub(crate) fn poke_audio(&self) {
        if let Ok(mut guard) = self.audio.buffer.try_lock() {
            guard.generation = guard.generation.wrapping_add(1);
            drop(guard);
            self.audio.required.notify_all();
        }
    }

    /// Non-blocking wake of a producer stuck on the video barrier.
    pub(crate) fn poke_video(&self) {
        if let Ok(mut state) = self.video.state.try_lock() {
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            self.video.required.notify_all();
        }
    }
}

impl Default for CoreSync {
    fn default() -> Self {
        Self::new()
    }
}
