//! Buffer metrics
//!
//! The buffer pushes gauge updates into a [`MetricsSink`] whenever its
//! stage or queue changes. [`BufferMetrics`] is the default lock-free sink;
//! [`BufferStatistics`] is the point-in-time view returned by
//! `Buffer::statistics`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gauges published by the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    StageLength,
    StageByteSize,
    QueueLength,
    QueueByteSize,
    AvailableBufferSpaceRatios,
    TotalQueuedSize,
    NewestTimekey,
    OldestTimekey,
}

impl Gauge {
    pub const ALL: [Gauge; 8] = [
        Gauge::StageLength,
        Gauge::StageByteSize,
        Gauge::QueueLength,
        Gauge::QueueByteSize,
        Gauge::AvailableBufferSpaceRatios,
        Gauge::TotalQueuedSize,
        Gauge::NewestTimekey,
        Gauge::OldestTimekey,
    ];

    /// Metric name
    pub fn name(&self) -> &'static str {
        match self {
            Gauge::StageLength => "stage_length",
            Gauge::StageByteSize => "stage_byte_size",
            Gauge::QueueLength => "queue_length",
            Gauge::QueueByteSize => "queue_byte_size",
            Gauge::AvailableBufferSpaceRatios => "available_buffer_space_ratios",
            Gauge::TotalQueuedSize => "total_queued_size",
            Gauge::NewestTimekey => "newest_timekey",
            Gauge::OldestTimekey => "oldest_timekey",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Receiver of buffer gauge updates
pub trait MetricsSink: Send + Sync {
    fn set(&self, gauge: Gauge, value: f64);
}

/// Sink that drops every update
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set(&self, _gauge: Gauge, _value: f64) {}
}

/// Lock-free gauge storage
#[derive(Debug, Default)]
pub struct BufferMetrics {
    values: [AtomicU64; 8],
}

impl BufferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value published for `gauge`
    pub fn get(&self, gauge: Gauge) -> f64 {
        f64::from_bits(self.values[gauge.index()].load(Ordering::Relaxed))
    }

    /// All gauges with their names
    pub fn snapshot(&self) -> Vec<(&'static str, f64)> {
        Gauge::ALL.iter().map(|g| (g.name(), self.get(*g))).collect()
    }
}

impl MetricsSink for BufferMetrics {
    #[inline]
    fn set(&self, gauge: Gauge, value: f64) {
        self.values[gauge.index()].store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Point-in-time buffer statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferStatistics {
    pub stage_length: usize,
    pub stage_byte_size: usize,
    pub queue_length: usize,
    pub queue_byte_size: usize,
    /// Free share of `total_limit_size`, in percent, rounded to one decimal
    pub available_buffer_space_ratios: f64,
    pub total_queued_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_timekey: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_timekey: Option<i64>,
}

impl BufferStatistics {
    /// Statistics nested under a `buffer` key
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "buffer": self })
    }

    /// Push every value into `sink`
    pub fn publish(&self, sink: &dyn MetricsSink) {
        sink.set(Gauge::StageLength, self.stage_length as f64);
        sink.set(Gauge::StageByteSize, self.stage_byte_size as f64);
        sink.set(Gauge::QueueLength, self.queue_length as f64);
        sink.set(Gauge::QueueByteSize, self.queue_byte_size as f64);
        sink.set(
            Gauge::AvailableBufferSpaceRatios,
            self.available_buffer_space_ratios,
        );
        sink.set(Gauge::TotalQueuedSize, self.total_queued_size as f64);
        if let Some(t) = self.oldest_timekey {
            sink.set(Gauge::OldestTimekey, t as f64);
        }
        if let Some(t) = self.newest_timekey {
            sink.set(Gauge::NewestTimekey, t as f64);
        }
    }
}

/// Free share of the total limit in percent, rounded to one decimal
pub fn available_space_ratio(used: usize, total_limit_size: usize) -> f64 {
    if total_limit_size == 0 {
        return 0.0;
    }
    let free = 1.0 - used as f64 / total_limit_size as f64;
    (free * 1000.0).round() / 10.0
}
