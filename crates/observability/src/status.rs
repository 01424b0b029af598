//! Operational status channel
//!
//! Failures inside the completion hook, the dispatch hub or a sink are
//! reported here rather than through the sinks themselves, so a broken sink
//! can never recurse into more telemetry. Records are kept in a bounded
//! in-memory ring and mirrored to `tracing` under the `access_tap::status`
//! target.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Severity of a status record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// One status message
#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub level: StatusLevel,
    /// Component that reported it (`hook`, `hub`, a sink id, ...)
    pub origin: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}",
            self.at.format("%H:%M:%S%.3f"),
            self.level,
            self.origin,
            self.message
        )
    }
}

/// Bounded side channel for operational status
#[derive(Debug)]
pub struct StatusChannel {
    records: Mutex<VecDeque<StatusRecord>>,
    capacity: usize,
    info_count: AtomicU64,
    warn_count: AtomicU64,
    error_count: AtomicU64,
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl StatusChannel {
    pub const DEFAULT_CAPACITY: usize = 150;

    /// Channel retaining at most `capacity` records (oldest evicted first)
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            info_count: AtomicU64::new(0),
            warn_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Default-sized channel behind an `Arc`
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn info(&self, origin: &str, message: impl Into<String>) {
        self.report(StatusLevel::Info, origin, message);
    }

    pub fn warn(&self, origin: &str, message: impl Into<String>) {
        self.report(StatusLevel::Warn, origin, message);
    }

    pub fn error(&self, origin: &str, message: impl Into<String>) {
        self.report(StatusLevel::Error, origin, message);
    }

    /// Record a status message. Never panics, never blocks on I/O.
    pub fn report(&self, level: StatusLevel, origin: &str, message: impl Into<String>) {
        let message = message.into();

        match level {
            StatusLevel::Info => {
                self.info_count.fetch_add(1, Ordering::Relaxed);
                tracing::info!(target: "access_tap::status", origin, "{message}");
            }
            StatusLevel::Warn => {
                self.warn_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "access_tap::status", origin, "{message}");
            }
            StatusLevel::Error => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::error!(target: "access_tap::status", origin, "{message}");
            }
        }

        let record = StatusRecord {
            level,
            origin: origin.to_string(),
            message,
            at: Utc::now(),
        };

        // A panic elsewhere must not silence the channel
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<StatusRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained records from one origin
    pub fn records_from(&self, origin: &str) -> Vec<StatusRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.origin == origin)
            .collect()
    }

    /// Total records ever reported at `level` (including evicted ones)
    pub fn count(&self, level: StatusLevel) -> u64 {
        match level {
            StatusLevel::Info => self.info_count.load(Ordering::Relaxed),
            StatusLevel::Warn => self.warn_count.load(Ordering::Relaxed),
            StatusLevel::Error => self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Highest level among retained records
    pub fn highest_level(&self) -> Option<StatusLevel> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.level)
            .max()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
