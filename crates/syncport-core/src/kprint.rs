//! Leveled stderr logging for syncport
//!
//! Every line is written under the stderr lock, so lines from concurrent
//! threads never interleave.
//!
//! # Environment Variables
//!
//! - `SP_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0..5 (default: warn)
//! - `SP_FLUSH_EPRINT=1` - Flush stderr after each line (useful when debugging hangs)
//! - `SP_LOG_TIME=1` - Prefix lines with milliseconds since logging was initialized
//!
//! ```ignore
//! use syncport_core::{kdebug, kwarn};
//!
//! kdebug!("read on fd {} interrupted, yielding", fd);
//! kwarn!("no runnable thread and no descriptors to poll");
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;
use std::sync::OnceLock;
use std::time::Instant;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

const LEVELS: [LogLevel; 6] = [
    LogLevel::Off,
    LogLevel::Error,
    LogLevel::Warn,
    LogLevel::Info,
    LogLevel::Debug,
    LogLevel::Trace,
];

const NAMES: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl LogLevel {
    /// Values above 5 saturate to `Trace`
    pub fn from_u8(v: u8) -> Self {
        LEVELS[usize::from(v.min(5))]
    }

    /// Accepts a level name (any case) or its digit
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return (n <= 5).then(|| Self::from_u8(n));
        }
        NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(s))
            .map(|i| LEVELS[i])
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(NAMES[*self as usize])
    }
}

const FLAG_FLUSH: u8 = 0x1;
const FLAG_TIME: u8 = 0x2;

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLAGS: AtomicU8 = AtomicU8::new(0);
static FROM_ENV: Once = Once::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Read the `SP_LOG_*` variables
///
/// Runs at most once; the first log line triggers it if nobody calls it
/// earlier. Setters called afterwards win over the environment.
pub fn init() {
    FROM_ENV.call_once(|| {
        EPOCH.get_or_init(Instant::now);
        if let Ok(v) = std::env::var("SP_LOG_LEVEL") {
            LEVEL.store(LogLevel::parse(&v).unwrap_or(LogLevel::Warn) as u8, Ordering::Relaxed);
        }
        for (var, flag) in [("SP_FLUSH_EPRINT", FLAG_FLUSH), ("SP_LOG_TIME", FLAG_TIME)] {
            if let Ok(v) = std::env::var(var) {
                set_flag(flag, matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"));
            }
        }
    });
}

fn set_flag(flag: u8, on: bool) {
    if on {
        FLAGS.fetch_or(flag, Ordering::Relaxed);
    } else {
        FLAGS.fetch_and(!flag, Ordering::Relaxed);
    }
}

fn flag(flag: u8) -> bool {
    init();
    FLAGS.load(Ordering::Relaxed) & flag != 0
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Overrides `SP_LOG_LEVEL`
pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn flush_enabled() -> bool {
    flag(FLAG_FLUSH)
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    set_flag(FLAG_FLUSH, enabled);
}

pub fn set_time_enabled(enabled: bool) {
    init();
    set_flag(FLAG_TIME, enabled);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(prefix: Option<LogLevel>, args: fmt::Arguments<'_>) {
    let mut out = io::stderr().lock();
    if let Some(level) = prefix {
        if flag(FLAG_TIME) {
            let ms = EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0;
            let _ = write!(out, "{:>10.3} ", ms);
        }
        let _ = write!(out, "{} sp: ", level.prefix());
    }
    let _ = writeln!(out, "{}", args);
    if flush_enabled() {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: fmt::Arguments<'_>) {
    emit(None, args);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(Some(level), args);
    }
}

/// Unleveled line on stderr
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_kprintln_impl(format_args!(""))
    };
    ($($arg:tt)*) => {
        $crate::kprint::_kprintln_impl(format_args!($($arg)*))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

/// Checks the level before formatting so hot lock paths stay cheap
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        if $crate::kprint::level_enabled($crate::kprint::LogLevel::Trace) {
            $crate::__klog!(Trace, $($arg)*)
        }
    };
}
