use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::diagnostics::{self, LogSink};
use crate::scheduler::Fault;
use crate::sync::CoreSync;

/// Seam between the thread harness and the emulated machine.
pub trait Core: Send + 'static {
    /// Attach the producer side of the frame and audio barriers.
    fn set_sync(&mut self, sync: Arc<CoreSync>);
    /// Return the machine to its power-on state.
    fn reset(&mut self);
    /// Run one video frame worth of emulation.
    fn run_loop(&mut self) -> Result<(), Fault>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// Worker lifecycle states. The ordering is load-bearing: everything from
/// `Running` up to (but excluding) `Exiting` counts as active, and the
/// states between `Running` and `Exiting` are the command states the worker
/// handles in its command loop.
pub enum ThreadState {
    Initialized,
    Running,
    Interrupting,
    Interrupted,
    Pausing,
    Paused,
    RunOn,
    Reseting,
    Exiting,
    Crashed,
    Shutdown,
}

fn active(state: ThreadState) -> bool {
    state >= ThreadState::Running && state < ThreadState::Exiting
}

type RunFn<C> = Box<dyn FnOnce(&mut C) + Send>;

struct ThreadControl<C> {
    state: ThreadState,
    saved_state: ThreadState,
    interrupt_depth: u32,
    /// One-shot callback executed on the worker while in `RunOn`.
    run: Option<RunFn<C>>,
    frame_was_on: bool,
    crashed: bool,
}

struct ThreadInner<C: Core> {
    control: Mutex<ThreadControl<C>>,
    cond: Condvar,
    sync: Arc<CoreSync>,
    /// The emulated machine. The worker holds this lock while running;
    /// while it waits in `Paused` or `Interrupted` the lock is free, which
    /// is what lets external threads reach into the core.
    core: Mutex<C>,
}

impl<C: Core> ThreadInner<C> {
    fn state(&self) -> ThreadState {
        self.control.lock().unwrap().state
    }

    fn change_state(&self, new: ThreadState, broadcast: bool) {
        let mut control = self.control.lock().unwrap();
        control.state = new;
        if broadcast {
            self.cond.notify_all();
        }
    }

    fn wait_on_interrupt<'a>(
        &'a self,
        mut control: MutexGuard<'a, ThreadControl<C>>,
    ) -> MutexGuard<'a, ThreadControl<C>> {
        while control.state == ThreadState::Interrupted {
            control = self.cond.wait(control).unwrap();
        }
        control
    }

    /// Wait for the worker to leave `old`. While waiting, keep poking the
    /// video and audio barriers: the worker may be blocked as a producer,
    /// and an external thread blocked here while the producer is blocked
    /// there would otherwise deadlock. The video frame wait is stashed off
    /// for the duration so the producer does not immediately re-block.
    fn wait_until_not_state<'a>(
        &'a self,
        mut control: MutexGuard<'a, ThreadControl<C>>,
        old: ThreadState,
    ) -> MutexGuard<'a, ThreadControl<C>> {
        let video_wait = self.sync.set_video_frame_wait(false);

        while control.state == old {
            drop(control);

            self.sync.poke_video();
            self.sync.poke_audio();

            control = self.control.lock().unwrap();
            self.cond.notify_all();
            if control.state == old {
                let (guard, _) = self
                    .cond
                    .wait_timeout(control, Duration::from_millis(1))
                    .unwrap();
                control = guard;
            }
        }

        self.sync.set_video_frame_wait(video_wait);
        control
    }
}

/// Dedicated worker thread owning one emulated core.
///
/// External threads command the worker through the state machine: pausing,
/// nestable interruption, on-thread callbacks, reset and shutdown. All
/// failure reporting is through the boolean predicates; no command ever
/// panics, and commanding a thread that has already shut down is a no-op.
pub struct CoreThread<C: Core> {
    inner: Arc<ThreadInner<C>>,
    handle: Option<JoinHandle<()>>,
    /// Invoked on the worker after core reset, before the first frame.
    pub start_callback: Option<RunFn<C>>,
    /// Invoked on the worker right before it exits.
    pub clean_callback: Option<RunFn<C>>,
    /// Log sink installed as the worker's thread-local logger.
    pub logger: Option<Arc<dyn LogSink>>,
}

impl<C: Core> CoreThread<C> {
    pub fn new(core: C) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                control: Mutex::new(ThreadControl {
                    state: ThreadState::Initialized,
                    saved_state: ThreadState::Running,
                    interrupt_depth: 0,
                    run: None,
                    frame_was_on: false,
                    crashed: false,
                }),
                cond: Condvar::new(),
                sync: Arc::new(CoreSync::new()),
                core: Mutex::new(core),
            }),
            handle: None,
            start_callback: None,
            clean_callback: None,
            logger: None,
        }
    }

    pub fn sync(&self) -> &Arc<CoreSync> {
        &self.inner.sync
    }

    /// Borrow the core from the calling thread. The worker holds the core
    /// lock for whole frames, so this is only prompt while it is quiescent:
    /// interrupt or pause first, then reach in.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut core = self.inner.core.lock().unwrap();
        f(&mut core)
    }

    /// Spawn the worker and block until it reaches `Running`. Returns false
    /// if the thread was already started or could not be spawned.
    pub fn start(&mut self) -> bool {
        if self.handle.is_some() {
            return false;
        }
        {
            let mut control = self.inner.control.lock().unwrap();
            if control.state != ThreadState::Initialized {
                return false;
            }
            control.interrupt_depth = 0;
        }

        let inner = Arc::clone(&self.inner);
        let start_callback = self.start_callback.take();
        let clean_callback = self.clean_callback.take();
        let logger = self.logger.clone();
        let handle = std::thread::Builder::new()
            .name("emulation core".into())
            .spawn(move || worker(inner, start_callback, clean_callback, logger));
        let handle = match handle {
            Ok(handle) => handle,
            Err(_) => return false,
        };
        self.handle = Some(handle);

        let mut control = self.inner.control.lock().unwrap();
        while control.state < ThreadState::Running {
            control = self.inner.cond.wait(control).unwrap();
        }
        true
    }

    pub fn has_started(&self) -> bool {
        self.inner.state() > ThreadState::Initialized
    }

    pub fn has_exited(&self) -> bool {
        self.inner.state() > ThreadState::Exiting
    }

    pub fn has_crashed(&self) -> bool {
        self.inner.control.lock().unwrap().crashed
    }

    pub fn is_active(&self) -> bool {
        active(self.inner.state())
    }

    pub fn is_paused(&self) -> bool {
        let control = self.inner.control.lock().unwrap();
        let control = self.inner.wait_on_interrupt(control);
        control.state == ThreadState::Paused
    }

    /// Pause the worker at the next frame boundary. Blocks until the worker
    /// acknowledges. Video sync is suspended while paused.
    pub fn pause(&self) {
        let mut frame_on = self.inner.sync.video_frame_on();
        let control = self.inner.control.lock().unwrap();
        let mut control = self.inner.wait_on_interrupt(control);
        if control.state == ThreadState::Running {
            control.frame_was_on = frame_on;
            control.state = ThreadState::Pausing;
            self.inner.cond.notify_all();
            let _guard = self.inner.wait_until_not_state(control, ThreadState::Pausing);
            frame_on = false;
        }
        self.inner.sync.set_video_sync(frame_on);
    }

    pub fn unpause(&self) {
        let mut frame_on = self.inner.sync.video_frame_on();
        let control = self.inner.control.lock().unwrap();
        let mut control = self.inner.wait_on_interrupt(control);
        if control.state == ThreadState::Paused || control.state == ThreadState::Pausing {
            frame_on = control.frame_was_on;
            control.state = ThreadState::Running;
            self.inner.cond.notify_all();
        }
        drop(control);
        self.inner.sync.set_video_sync(frame_on);
    }

    pub fn toggle_pause(&self) {
        let paused = {
            let control = self.inner.control.lock().unwrap();
            let control = self.inner.wait_on_interrupt(control);
            control.state == ThreadState::Paused || control.state == ThreadState::Pausing
        };
        if paused {
            self.unpause();
        } else {
            self.pause();
        }
    }

    /// Worker-side pause request; returns without waiting for the
    /// acknowledgement the external [`Self::pause`] insists on.
    pub fn pause_from_thread(&self) {
        let control = self.inner.control.lock().unwrap();
        let mut control = self.inner.wait_on_interrupt(control);
        if control.state == ThreadState::Running {
            control.state = ThreadState::Pausing;
            self.inner.cond.notify_all();
        }
        drop(control);
        self.inner.sync.set_video_sync(false);
    }

    /// Suspend the CPU loop so the caller can safely reach into the core.
    /// Nestable: only the first call performs the transition; the rest bump
    /// a depth counter. Blocks until the worker is quiescent.
    pub fn interrupt(&self) {
        let mut control = self.inner.control.lock().unwrap();
        control.interrupt_depth += 1;
        if control.interrupt_depth > 1 || !active(control.state) {
            return;
        }
        control.saved_state = control.state;
        let mut control = self.inner.wait_on_interrupt(control);
        control.state = ThreadState::Interrupting;
        self.inner.cond.notify_all();
        let _guard = self
            .inner
            .wait_until_not_state(control, ThreadState::Interrupting);
    }

    /// Undo one level of [`Self::interrupt`]. At depth zero the worker
    /// resumes whatever state it was interrupted from.
    pub fn resume(&self) {
        let mut control = self.inner.control.lock().unwrap();
        if control.interrupt_depth > 0 {
            control.interrupt_depth -= 1;
        }
        if control.interrupt_depth == 0 && active(control.state) {
            control.state = control.saved_state;
            self.inner.cond.notify_all();
        }
    }

    /// Execute `f` on the worker thread with exclusive access to the core,
    /// blocking until it has run and the worker returned to its previous
    /// state.
    pub fn run_function<F>(&self, f: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let control = self.inner.control.lock().unwrap();
        if !active(control.state) {
            return;
        }
        let mut control = self.inner.wait_on_interrupt(control);
        control.run = Some(Box::new(f));
        control.saved_state = control.state;
        control.state = ThreadState::RunOn;
        self.inner.cond.notify_all();
        let _guard = self.inner.wait_until_not_state(control, ThreadState::RunOn);
    }

    /// Schedule a core reset on the worker. Waits for any in-progress
    /// interrupt to finish first.
    pub fn reset(&self) {
        let control = self.inner.control.lock().unwrap();
        let mut control = self.inner.wait_on_interrupt(control);
        if !active(control.state) {
            return;
        }
        control.state = ThreadState::Reseting;
        self.inner.cond.notify_all();
    }

    /// Ask the worker to shut down and release both sync barriers so a
    /// blocked producer cannot keep it alive. Idempotent; callable from any
    /// thread.
    pub fn end(&self) {
        {
            let control = self.inner.control.lock().unwrap();
            let mut control = self.inner.wait_on_interrupt(control);
            if control.state < ThreadState::Exiting {
                control.state = ThreadState::Exiting;
            }
            self.inner.cond.notify_all();
        }
        self.inner.sync.release();
    }

    /// Join the worker thread. Further commands become no-ops.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker<C: Core>(
    inner: Arc<ThreadInner<C>>,
    start_callback: Option<RunFn<C>>,
    clean_callback: Option<RunFn<C>>,
    logger: Option<Arc<dyn LogSink>>,
) {
    if let Some(logger) = logger {
        diagnostics::set_thread_log_sink(Some(logger));
    }

    {
        let mut core = inner.core.lock().unwrap();
        core.set_sync(Arc::clone(&inner.sync));
        core.reset();
        if let Some(callback) = start_callback {
            callback(&mut core);
        }
    }
    inner.change_state(ThreadState::Running, true);
    core_info!(target: "thread", "emulation thread running");

    while inner.state() < ThreadState::Exiting {
        loop {
            if inner.state() != ThreadState::Running {
                break;
            }
            let mut core = inner.core.lock().unwrap();
            if let Err(fault) = core.run_loop() {
                drop(core);
                core_warn!(target: "thread", "core crashed: {}", fault);
                let mut control = inner.control.lock().unwrap();
                control.crashed = true;
                control.state = ThreadState::Crashed;
                inner.cond.notify_all();
                drop(control);
                inner.sync.release();
                break;
            }
        }

        let mut reset_scheduled = false;
        let mut control = inner.control.lock().unwrap();
        while control.state > ThreadState::Running && control.state < ThreadState::Exiting {
            match control.state {
                ThreadState::Pausing => {
                    control.state = ThreadState::Paused;
                    inner.cond.notify_all();
                }
                ThreadState::Interrupting => {
                    control.state = ThreadState::Interrupted;
                    inner.cond.notify_all();
                }
                ThreadState::RunOn => {
                    if let Some(run) = control.run.take() {
                        // Run with the core lock held but the state lock
                        // released so the predicates stay pollable.
                        drop(control);
                        {
                            let mut core = inner.core.lock().unwrap();
                            run(&mut core);
                        }
                        control = inner.control.lock().unwrap();
                    }
                    control.state = control.saved_state;
                    inner.cond.notify_all();
                }
                ThreadState::Reseting => {
                    control.state = ThreadState::Running;
                    reset_scheduled = true;
                }
                _ => {}
            }
            while control.state == ThreadState::Paused || control.state == ThreadState::Interrupted
            {
                control = inner.cond.wait(control).unwrap();
            }
        }
        drop(control);

        if reset_scheduled {
            core_info!(target: "thread", "applying scheduled core reset");
            let mut core = inner.core.lock().unwrap();
            core.reset();
        }
    }

    {
        let mut control = inner.control.lock().unwrap();
        if control.state < ThreadState::Shutdown {
            control.state = ThreadState::Shutdown;
        }
        inner.cond.notify_all();
    }

    if let Some(callback) = clean_callback {
        let mut core = inner.core.lock().unwrap();
        callback(&mut core);
    }
    diagnostics::set_thread_log_sink(None);
}
