//! Structured logging sink for the `log` facade (C15 ambient stack).
//!
//! Installed once, before any other subsystem runs, so the frame allocator,
//! page-table code, scheduler, and disk driver can all reach for
//! `log::{info,warn,error,debug,trace}!` instead of hand-rolled
//! `serial_println!` calls. This is strictly additional to
//! `println!`/`serial_println!`, which stay in place for the free-form boot
//! banner and the panic path, where allocation-free, guaranteed output
//! matters more than formatting.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!("[{} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Install the logger and set the compiled-in max level. Idempotent: a
/// second call is a no-op (`set_logger` only ever succeeds once), which
/// matters for the integration test binaries that each bring up their own
/// subset of `bootstrap`.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}
