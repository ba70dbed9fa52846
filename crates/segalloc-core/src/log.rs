//! Structured allocator lifecycle records.
//!
//! Records are kept in memory in a bounded ring; the oldest record is
//! dropped once the ring is full. Nothing here writes to a file or stream,
//! so recording never calls back into an allocator.

use std::collections::VecDeque;

use crate::size_class::ClassId;

/// Allocator lifecycle log level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    /// Misuse that terminates the process.
    Fatal,
}

impl AllocatorLogLevel {
    /// Parse from string (case-insensitive). Unknown input yields `None`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" | "off" | "none" => Some(Self::Fatal),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

/// Counter snapshot attached to every record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Chunks currently ALLOCATED.
    pub live_chunks: usize,
    /// Class bytes of the live chunks.
    pub live_bytes: usize,
    /// Chunks sitting on free lists.
    pub free_chunks: usize,
    /// Bytes mapped from the backing store.
    pub mapped_bytes: usize,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`alloc`, `dealloc`, `verify_heap`, ...).
    pub symbol: &'static str,
    /// Event kind (`arena_mapped`, `double_free_detected`, ...).
    pub event: &'static str,
    /// User pointer involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size class involved in the event.
    pub class: Option<ClassId>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Counters at the time of the event.
    pub counters: CounterSnapshot,
}

/// Event fields supplied by the caller of [`LifecycleLog::record`].
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub class: Option<ClassId>,
    pub outcome: &'static str,
}

impl LifecycleEvent {
    #[must_use]
    pub const fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            class: None,
            outcome,
        }
    }

    #[must_use]
    pub const fn with_ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub const fn with_class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }
}

/// Bounded, level-filtered ring of lifecycle records.
#[derive(Debug, Clone)]
pub struct LifecycleLog {
    min_level: AllocatorLogLevel,
    capacity: usize,
    records: VecDeque<AllocatorLogRecord>,
    next_decision_id: u64,
    dropped: u64,
}

impl LifecycleLog {
    #[must_use]
    pub fn new(min_level: AllocatorLogLevel, capacity: usize) -> Self {
        Self {
            min_level,
            capacity,
            records: VecDeque::new(),
            next_decision_id: 1,
            dropped: 0,
        }
    }

    /// True when a record at `level` would be kept.
    #[must_use]
    pub fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.capacity > 0 && level >= self.min_level
    }

    /// Appends a record. `details` is only built when the level is enabled.
    pub fn record(
        &mut self,
        event: LifecycleEvent,
        counters: CounterSnapshot,
        details: impl FnOnce() -> String,
    ) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id: format!("segalloc::{}::{:016x}", event.symbol, decision_id),
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            class: event.class,
            outcome: event.outcome,
            details: details(),
            counters,
        });
    }

    #[must_use]
    pub fn records(&self) -> Vec<AllocatorLogRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }

    /// Records evicted because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn min_level(&self) -> AllocatorLogLevel {
        self.min_level
    }
}
