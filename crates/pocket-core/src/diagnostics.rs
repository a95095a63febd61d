use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Trace,
    Info,
    Warn,
}

pub trait LogSink: Send + Sync + 'static {
    fn log(&self, level: Level, target: &'static str, args: fmt::Arguments);
}

static DEFAULT_SINK: OnceLock<Arc<dyn LogSink>> = OnceLock::new();

thread_local! {
    static THREAD_SINK: RefCell<Option<Arc<dyn LogSink>>> = const { RefCell::new(None) };
}

/// Install the process-wide fallback sink. Fails if one is already set.
pub fn try_set_log_sink(sink: Arc<dyn LogSink>) -> Result<(), Arc<dyn LogSink>> {
    DEFAULT_SINK.set(sink)
}

/// Install (or clear) a sink for the calling thread only. The emulation
/// worker uses this so its output can be routed separately from the rest of
/// the process.
pub fn set_thread_log_sink(sink: Option<Arc<dyn LogSink>>) {
    THREAD_SINK.with(|cell| *cell.borrow_mut() = sink);
}

pub fn has_log_sink() -> bool {
    THREAD_SINK.with(|cell| cell.borrow().is_some()) || DEFAULT_SINK.get().is_some()
}

pub(crate) fn emit(level: Level, target: &'static str, args: fmt::Arguments) {
    let handled = THREAD_SINK.with(|cell| {
        if let Some(sink) = cell.borrow().as_ref() {
            sink.log(level, target, args);
            true
        } else {
            false
        }
    });
    if handled {
        return;
    }
    if let Some(sink) = DEFAULT_SINK.get() {
        sink.log(level, target, args);
    }
}
