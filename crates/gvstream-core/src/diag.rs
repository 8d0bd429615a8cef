//! Kernel-style diagnostic output with an injectable sink
//!
//! Leveled, line-atomic diagnostics similar to printk. Lines go to a
//! process-wide [`DiagSink`] that is set once at startup (default: stderr)
//! and can be replaced by an in-memory sink to capture output in tests.
//! Components that need isolated capture hold their own `Arc<dyn DiagSink>`.
//!
//! # Environment Variables
//!
//! - `GVS_FLUSH_EPRINT=1` - Flush stderr after each line
//! - `GVS_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use gvstream_core::{kerror, kdebug};
//!
//! kerror!("{}: {}", name, message);
//! kdebug!("handle {} armed for read", handle);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::env::{env_get_bool, env_get_opt};

/// Log levels
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

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
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

/// Destination for diagnostic lines.
pub trait DiagSink: Send + Sync {
    /// Write one complete line. The level filter has already been applied.
    fn write_line(&self, level: LogLevel, line: &str);
}

/// Default sink: locked stderr, optionally flushed per line.
pub struct StderrSink;

impl DiagSink for StderrSink {
    fn write_line(&self, level: LogLevel, line: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{} {}", level.prefix(), line);
        if flush_enabled() {
            let _ = handle.flush();
        }
    }
}

/// Sink that keeps every line in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured lines.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Captured lines at `level`.
    pub fn at(&self, level: LogLevel) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, s)| s)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut l) = self.lines.lock() {
            l.clear();
        }
    }
}

impl DiagSink for MemorySink {
    fn write_line(&self, level: LogLevel, line: &str) {
        if let Ok(mut l) = self.lines.lock() {
            l.push((level, line.to_string()));
        }
    }
}

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static SINK: RwLock<Option<Arc<dyn DiagSink>>> = RwLock::new(None);

/// Initialize level and flush mode from the environment.
///
/// Called automatically on first log.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let flush = env_get_bool("GVS_FLUSH_EPRINT", false);
    FLUSH_ENABLED.store(flush, Ordering::Relaxed);

    if let Some(val) = env_get_opt::<String>("GVS_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

/// Replace the process-wide sink.
pub fn set_sink(sink: Arc<dyn DiagSink>) {
    if let Ok(mut s) = SINK.write() {
        *s = Some(sink);
    }
}

/// The process-wide sink (stderr unless replaced).
pub fn global_sink() -> Arc<dyn DiagSink> {
    match SINK.read() {
        Ok(s) => match s.as_ref() {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(StderrSink),
        },
        Err(_) => Arc::new(StderrSink),
    }
}

/// Write a leveled line to `sink` if `level` is enabled.
pub fn log_to(sink: &dyn DiagSink, level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    sink.write_line(level, &args.to_string());
}

/// Internal: Leveled print to the global sink
#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    global_sink().write_line(level, &args.to_string());
}

// ============================================================================
// Public Macros
// ============================================================================

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::diag::_klog_impl(
            $crate::diag::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::diag::_klog_impl(
            $crate::diag::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::diag::_klog_impl(
            $crate::diag::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::diag::_klog_impl(
            $crate::diag::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::diag::_klog_impl(
            $crate::diag::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}
