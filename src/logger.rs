//! Leveled kernel logger.
//!
//! Log lines go to the serial port with an ANSI-coloured level badge and a
//! millisecond timestamp derived from the clock-tick counter. The level
//! filter is runtime-adjustable.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::pcb::MS_PER_CLOCK_TICK;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn serial_color(self) -> &'static str {
        match self {
            LogLevel::Fatal => "\x1b[1;37;41m",
            LogLevel::Error => "\x1b[1;31m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Trace => "\x1b[90m",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info.priority() + 1);
static CLOCK_TICKS: AtomicU32 = AtomicU32::new(0);

pub fn init() {
    crate::serial::init();
    set_level(LogLevel::Info);
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority() + 1, Ordering::Relaxed);
}

/// Advance the log timestamp by one clock tick. Called by the dispatcher
/// on every timer interrupt.
pub fn record_tick() {
    CLOCK_TICKS.fetch_add(1, Ordering::Relaxed);
}

pub fn uptime_ms() -> u32 {
    CLOCK_TICKS.load(Ordering::Relaxed) * MS_PER_CLOCK_TICK
}

pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level.priority() >= LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }
    let ms = uptime_ms();
    crate::serial_println!(
        "{}[{:>5}]\x1b[0m [{:>6}.{:03}] {}",
        level.serial_color(),
        level.as_str(),
        ms / 1000,
        ms % 1000,
        args
    );
}
