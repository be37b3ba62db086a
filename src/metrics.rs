//! Metrics collection: hit/miss accounting per core and the immutable end-of-run report.

use crate::core::{CoreId, Cycle};
use crate::interconnect::BusStats;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const HIT_RATE: &str = "HitRate";
pub const MISS_RATE: &str = "MissRate";

/// Per-core and aggregate counters.
#[derive(Clone, Default, Debug)]
pub struct Metrics {
    /// Total simulation cycles.
    pub total_cycles: Cycle,
    /// Cache hits (reads and writes).
    pub cache_hits: u64,
    /// Cache misses (reads and writes).
    pub cache_misses: u64,
    /// INC operations (register only).
    pub increments: u64,
    /// Cycles spent waiting on the bus or memory.
    pub stall_cycles: u64,
    pub per_core: HashMap<CoreId, PerCoreMetrics>,
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize)]
pub struct PerCoreMetrics {
    pub memory_accesses: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stall_cycles: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_access(&mut self, core_id: CoreId, hit: bool, stall_cycles: u64) {
        if hit {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
        self.stall_cycles += stall_cycles;
        let per = self.per_core.entry(core_id).or_default();
        per.memory_accesses += 1;
        if hit {
            per.cache_hits += 1;
        } else {
            per.cache_misses += 1;
        }
        per.stall_cycles += stall_cycles;
    }

    /// Counters of one core; zero if it never touched its cache.
    pub fn core(&self, core_id: CoreId) -> PerCoreMetrics {
        self.per_core.get(&core_id).cloned().unwrap_or_default()
    }

    pub fn record_increment(&mut self) {
        self.increments += 1;
    }

    pub fn memory_accesses(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    /// Hit rate in percent; 100 when nothing touched the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.memory_accesses();
        if total == 0 {
            return 100.0;
        }
        self.cache_hits as f64 / total as f64 * 100.0
    }

    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Snapshots the counters together with the bus statistics.
    pub fn report(&self, bus: &BusStats) -> MetricsReport {
        let count = |name: &'static str, value: u64| Metric::raw(name, value as f64);
        MetricsReport {
            metrics: vec![
                Metric::percentage(HIT_RATE, self.hit_rate()),
                Metric::percentage(MISS_RATE, self.miss_rate()),
                count("CacheHits", self.cache_hits),
                count("CacheMisses", self.cache_misses),
                count("MemoryAccesses", self.memory_accesses()),
                count("ReadRequests", bus.read_requests),
                count("ReadExclusiveRequests", bus.read_exclusive_requests),
                count("Upgrades", bus.upgrades),
                count("DataResponses", bus.data_responses),
                count("Invalidates", bus.invalidates),
                count("MemoryReads", bus.memory_reads),
                count("MemoryWrites", bus.memory_writes),
                count("Writebacks", bus.writebacks),
                count("Increments", self.increments),
                count("Cycles", self.total_cycles),
                Metric::raw("PowerConsumption", bus.power_consumption),
            ],
        }
    }
}

/// How a metric's value is meant to be displayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MetricKind {
    /// A value in 0..=100.
    Percentage,
    RawCount,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub value: f64,
}

impl Metric {
    pub fn percentage(name: &'static str, value: f64) -> Self {
        Self {
            name,
            kind: MetricKind::Percentage,
            value,
        }
    }

    pub fn raw(name: &'static str, value: f64) -> Self {
        Self {
            name,
            kind: MetricKind::RawCount,
            value,
        }
    }
}

/// Read-only end-of-run metrics, in a fixed order.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsReport {
    metrics: Vec<Metric>,
}

impl MetricsReport {
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }

    pub fn hit_rate(&self) -> f64 {
        self.get(HIT_RATE).unwrap_or_default()
    }

    pub fn miss_rate(&self) -> f64 {
        self.get(MISS_RATE).unwrap_or_default()
    }

    /// Flat name -> value mapping for the display boundary.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .map(|m| (m.name.to_string(), m.value))
            .collect()
    }
}

impl Serialize for MetricsReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.metrics.len()))?;
        for m in &self.metrics {
            map.serialize_entry(m.name, &m.value)?;
        }
        map.end()
    }
}
