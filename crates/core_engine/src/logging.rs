//! Leveled logging and timing

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Global logger instance
static LOGGER: once_cell::sync::Lazy<Arc<Mutex<Logger>>> =
    once_cell::sync::Lazy::new(|| Arc::new(Mutex::new(Logger::new())));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

pub struct Logger {
    level: LogLevel,
    metrics: HashMap<String, MetricStats>,
}

struct MetricStats {
    count: u64,
    total_duration: Duration,
    max_duration: Duration,
}

/// Accumulated timing for one named operation
#[derive(Debug, Clone)]
pub struct PerformanceMetric {
    pub name: String,
    pub count: u64,
    pub total_duration: Duration,
    pub avg_duration: Duration,
    pub max_duration: Duration,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            level: LogLevel::Info,
            metrics: HashMap::new(),
        }
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub fn log(&mut self, level: LogLevel, module: &str, message: String) {
        if level >= self.level {
            match level {
                LogLevel::Error => eprintln!("[ERROR] {}: {}", module, message),
                LogLevel::Warn => eprintln!("[WARN]  {}: {}", module, message),
                LogLevel::Info => println!("[INFO]  {}: {}", module, message),
                LogLevel::Debug => println!("[DEBUG] {}: {}", module, message),
                LogLevel::Trace => println!("[TRACE] {}: {}", module, message),
            }
        }
    }

    pub fn record_metric(&mut self, name: &str, duration: Duration) {
        let stats = self.metrics.entry(name.to_string()).or_insert(MetricStats {
            count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        });
        stats.count += 1;
        stats.total_duration += duration;
        stats.max_duration = stats.max_duration.max(duration);
    }

    pub fn get_metrics(&self) -> Vec<PerformanceMetric> {
        self.metrics
            .iter()
            .map(|(name, stats)| PerformanceMetric {
                name: name.clone(),
                count: stats.count,
                total_duration: stats.total_duration,
                avg_duration: if stats.count > 0 {
                    stats.total_duration / stats.count as u32
                } else {
                    Duration::ZERO
                },
                max_duration: stats.max_duration,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.metrics.clear();
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

// Global logging functions

pub fn set_log_level(level: LogLevel) {
    LOGGER.lock().unwrap().set_level(level);
}

pub fn trace(module: &str, message: String) {
    LOGGER.lock().unwrap().log(LogLevel::Trace, module, message);
}

pub fn debug(module: &str, message: String) {
    LOGGER.lock().unwrap().log(LogLevel::Debug, module, message);
}

pub fn info(module: &str, message: String) {
    LOGGER.lock().unwrap().log(LogLevel::Info, module, message);
}

pub fn warn(module: &str, message: String) {
    LOGGER.lock().unwrap().log(LogLevel::Warn, module, message);
}

pub fn error(module: &str, message: String) {
    LOGGER.lock().unwrap().log(LogLevel::Error, module, message);
}

pub fn record_metric(name: &str, duration: Duration) {
    LOGGER.lock().unwrap().record_metric(name, duration);
}

pub fn get_metrics() -> Vec<PerformanceMetric> {
    LOGGER.lock().unwrap().get_metrics()
}

pub fn clear_metrics() {
    LOGGER.lock().unwrap().clear();
}

/// Performance timer for automatic metric recording
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        record_metric(&self.name, self.elapsed());
    }
}

/// Macro for easy logging
#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::debug($module, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::info($module, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::warn($module, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::error($module, format!($($arg)*))
    };
}
