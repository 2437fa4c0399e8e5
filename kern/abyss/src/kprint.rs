//! Kernel print utilities.
//!
//! The console of the hosted build is the standard error stream of the host
//! process. Besides the [`print!`] and [`println!`] macros, this module
//! installs the backend of the [`log`] facade so that the rest of the kernel
//! reports through `log::info!` and friends.
//!
//! [`print!`]: crate::print
//! [`println!`]: crate::println

use crate::spinlock::SpinLock;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;

static SERIAL: SpinLock<()> = SpinLock::new(());
static QUIET: AtomicBool = AtomicBool::new(false);

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let guard = SERIAL.lock();
    let _ = std::io::stderr().lock().write_fmt(fmt);
    guard.unlock();
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Silences the log backend. [`print!`] is not affected.
///
/// [`print!`]: crate::print
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::SeqCst);
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !QUIET.load(Ordering::SeqCst) && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::println!("[{}] {}", tag(record.level()), record.args());
    }

    fn flush(&self) {}
}

fn tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn level_from_env() -> LevelFilter {
    match std::env::var("ABYSS_LOG").as_deref() {
        Ok("off") => LevelFilter::Off,
        Ok("error") => LevelFilter::Error,
        Ok("warn") => LevelFilter::Warn,
        Ok("debug") => LevelFilter::Debug,
        Ok("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Installs the kernel logger.
///
/// The maximum level is read from the `ABYSS_LOG` environment variable
/// (`off`, `error`, `warn`, `info`, `debug` or `trace`) and defaults to
/// `info`. Calling this more than once is harmless.
pub fn init() {
    static LOGGER: KernelLogger = KernelLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level_from_env());
    }
}
