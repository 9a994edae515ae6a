//! Logging setup
//!
//! Console output goes through `env_logger`; every record from this crate is
//! also kept in a bounded in-memory ring buffer so the last `MAX_LOG_LINES`
//! entries can be written to `debug.log` on request or after a panic.
//!
//! Without `RUST_LOG`, debug builds show DEBUG and above and release builds
//! show INFO and above. Other crates are silenced.

use std::panic;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use env_logger::fmt::{Color, Formatter};
use log::{LevelFilter, Metadata, Record};
use chrono::Utc;

#[allow(unused_imports)]
use log::{Level, debug, info, warn, error};

pub const MAX_LOG_LINES: usize = 1000;
const LOG_TARGET: &str = "panoptic_curator";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

struct BufferLogger {
    log_buffer: LogBuffer,
    capacity: usize,
}

impl BufferLogger {
    fn new(capacity: usize) -> Self {
        Self {
            log_buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn log_to_buffer(&self, message: &str, target: &str, line: Option<u32>) {
        // A poisoned buffer only means a panic happened mid-push; keep logging
        let mut buffer = match self.log_buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }

        let formatted_message = if let Some(line_num) = line {
            format!("{target}:{line_num} {message}")
        } else {
            format!("{target} {message}")
        };

        buffer.push_back(formatted_message);
    }

    fn get_shared_buffer(&self) -> LogBuffer {
        Arc::clone(&self.log_buffer)
    }
}

impl log::Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(LOG_TARGET) && metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("{:<5} {}", record.level(), record.args());
            self.log_to_buffer(&message, record.target(), record.line());
        }
    }

    fn flush(&self) {}
}

struct CompositeLogger {
    console_logger: env_logger::Logger,
    buffer_logger: BufferLogger,
}

impl log::Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.buffer_logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if self.buffer_logger.enabled(record.metadata()) {
            self.buffer_logger.log(record);
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        self.buffer_logger.flush();
    }
}

/// Install the composite logger and return the shared ring buffer.
///
/// Calling this twice leaves the first logger in place; the second call
/// returns a fresh, unattached buffer.
pub fn setup_logger() -> LogBuffer {
    let buffer_logger = BufferLogger::new(MAX_LOG_LINES);
    let shared_buffer = buffer_logger.get_shared_buffer();

    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        if cfg!(debug_assertions) {
            builder.filter(Some(LOG_TARGET), LevelFilter::Debug);
        } else {
            builder.filter(Some(LOG_TARGET), LevelFilter::Info);
        }
        builder.filter(None, LevelFilter::Off);
    }

    builder.format(|buf: &mut Formatter, record: &Record| {
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        let module_info = match (record.module_path(), record.line()) {
            (Some(module), Some(line)) => format!("{module}:{line}"),
            (Some(module), None) => module.to_string(),
            (None, Some(line)) => format!("line:{line}"),
            (None, None) => "unknown".to_string(),
        };

        let mut level_style = buf.style();
        let mut meta_style = buf.style();

        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green).set_bold(true),
            Level::Debug => level_style.set_color(Color::Blue).set_bold(true),
            Level::Trace => level_style.set_color(Color::White),
        };

        // Color::Rgb does not render on macOS terminals
        #[cfg(target_os = "macos")]
        meta_style.set_color(Color::Blue);
        #[cfg(not(target_os = "macos"))]
        meta_style.set_color(Color::Rgb(120, 120, 120));

        writeln!(
            buf,
            "{} {} {} {}",
            meta_style.value(timestamp),
            level_style.value(record.level()),
            meta_style.value(module_info),
            record.args()
        )
    });

    let composite_logger = CompositeLogger {
        console_logger: builder.build(),
        buffer_logger,
    };

    if log::set_boxed_logger(Box::new(composite_logger)).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    } else {
        eprintln!("Logger already initialized, keeping the existing one");
    }

    shared_buffer
}

pub fn get_log_directory(app_name: &str) -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(app_name).join("logs")
}

fn snapshot(log_buffer: &LogBuffer) -> Vec<String> {
    match log_buffer.lock() {
        Ok(buffer) => buffer.iter().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
    }
}

/// Write the buffered log lines to `<data_dir>/<app_name>/logs/debug.log`
pub fn export_debug_logs(app_name: &str, log_buffer: &LogBuffer) -> Result<PathBuf, std::io::Error> {
    let path = write_debug_log(&get_log_directory(app_name), log_buffer)?;
    // Logged after the snapshot so the export line is not part of its own file
    info!("Debug logs exported to: {}", path.display());
    Ok(path)
}

/// Write the buffered log lines to `debug.log` inside `log_dir`
pub fn write_debug_log(log_dir: &Path, log_buffer: &LogBuffer) -> Result<PathBuf, std::io::Error> {
    std::fs::create_dir_all(log_dir)?;
    let debug_log_path = log_dir.join("debug.log");

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&debug_log_path)?;

    let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
    let entries = snapshot(log_buffer);

    writeln!(file, "{timestamp} [DEBUG EXPORT] =====================================")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Panoptic Curator Debug Log Export")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Maximum captured entries: {MAX_LOG_LINES}")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] =====================================")?;
    writeln!(file)?;

    if entries.is_empty() {
        writeln!(file, "{timestamp} [DEBUG EXPORT] No log entries found in buffer")?;
    } else {
        writeln!(file, "{timestamp} [DEBUG EXPORT] Found {} log entries:", entries.len())?;
        writeln!(file)?;
        for entry in &entries {
            writeln!(file, "{timestamp} {entry}")?;
        }
    }

    writeln!(file)?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Total entries exported: {}", entries.len())?;
    file.flush()?;

    Ok(debug_log_path)
}

/// On panic, write the panic location, a backtrace and the buffered log
/// lines to `panic.log` in the log directory, and echo them to stderr
pub fn setup_panic_hook(app_name: &str, log_buffer: LogBuffer) {
    let log_dir = get_log_directory(app_name);
    let log_file_path = log_dir.join("panic.log");

    panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        let location = info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let header_msg = format!("[PANIC] at {location} - {info}");
        let backtrace_lines: Vec<String> = backtrace
            .to_string()
            .lines()
            .map(|line| format!("[BACKTRACE] {}", line.trim()))
            .collect();

        eprintln!("\n\n{header_msg}");
        for line in &backtrace_lines {
            eprintln!("{line}");
        }

        let written = std::fs::create_dir_all(&log_dir).and_then(|_| {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&log_file_path)?;
            writeln!(file, "{timestamp} {header_msg}")?;
            for line in &backtrace_lines {
                writeln!(file, "{timestamp} {line}")?;
            }
            writeln!(file)?;
            writeln!(file, "{timestamp} [PANIC] Last {MAX_LOG_LINES} log entries:")?;
            for entry in snapshot(&log_buffer) {
                writeln!(file, "{timestamp} {entry}")?;
            }
            Ok(())
        });

        match written {
            Ok(()) => eprintln!("\nA complete crash log has been written to: {}", log_file_path.display()),
            Err(e) => eprintln!("\nFailed to write crash log {}: {e}", log_file_path.display()),
        }
    }));
}
