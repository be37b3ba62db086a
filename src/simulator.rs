//! Coherence simulator: applies events one at a time to the private caches, the snooping
//! bus and main memory, on a single logical timeline.

use crate::cache::{Cache, CacheAccessResult, LineSnapshot};
use crate::config::SystemConfig;
use crate::core::{Address, CoreId, Cycle, Event, Operation, Processor, Word};
use crate::error::{Error, Result};
use crate::interconnect::{BusRecord, BusStats, DataSource, Interconnect};
use crate::memory::MainMemory;
use crate::metrics::{Metrics, MetricsReport, PerCoreMetrics};
use crate::protocol::{Access, BusRequest, LineState, Protocol};
use crate::workload::Seed;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeSet;

/// Cycles charged for an INC.
const INC_CYCLES: Cycle = 1;

/// What happened to the accessed line during a READ or WRITE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LineAccess {
    pub hit: bool,
    pub before: LineState,
    pub after: LineState,
    pub request: Option<BusRequest>,
    /// Where the block came from on a miss.
    pub source: Option<DataSource>,
    /// Remote copies this access invalidated.
    pub invalidated: usize,
    /// Snooped flushes plus dirty evictions caused by this access.
    pub writebacks: u32,
}

/// Result of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AccessOutcome {
    pub event: Event,
    /// `None` for INC.
    pub access: Option<LineAccess>,
    /// Register of the issuing core after the event.
    pub register: Word,
    pub latency: Cycle,
}

/// Everything a finished run produced.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationResult {
    pub protocol: Protocol,
    pub report: MetricsReport,
    /// Hits, misses and stall cycles of each processing element, in core order.
    pub per_core: Vec<PerCoreMetrics>,
    pub stall_cycles: u64,
    pub transactions: Vec<BusRecord>,
    pub caches: Vec<Vec<LineSnapshot>>,
    pub memory: Vec<Word>,
    pub registers: Vec<Word>,
}

pub struct Simulator {
    protocol: Protocol,
    processors: Vec<Processor>,
    caches: Vec<Cache>,
    bus: Interconnect,
    memory: MainMemory,
    metrics: Metrics,
    events_applied: u64,
}

impl Simulator {
    /// A simulator over zeroed memory.
    pub fn new(protocol: Protocol, config: &SystemConfig) -> Result<Self> {
        config.validate()?;
        let words = vec![0; config.workload.address_space as usize];
        Ok(Self::with_memory(
            protocol,
            config,
            MainMemory::with_words(config.memory.clone(), words),
        ))
    }

    /// A simulator whose memory words are drawn from `seed`.
    pub fn seeded(protocol: Protocol, config: &SystemConfig, seed: Seed) -> Result<Self> {
        config.validate()?;
        let memory = MainMemory::seeded(config.memory.clone(), config.workload.address_space, seed.0);
        Ok(Self::with_memory(protocol, config, memory))
    }

    fn with_memory(protocol: Protocol, config: &SystemConfig, memory: MainMemory) -> Self {
        let num_cores = config.workload.num_cores;
        Self {
            protocol,
            processors: (0..num_cores).map(|id| Processor::new(CoreId(id))).collect(),
            caches: (0..num_cores).map(|_| Cache::new(config.cache.clone())).collect(),
            bus: Interconnect::new(config.interconnect.clone()),
            memory,
            metrics: Metrics::new(),
            events_applied: 0,
        }
    }

    fn validate(&self, event: &Event) -> Result<()> {
        let core_ok = event.core.0 < self.processors.len();
        let address_ok = !event.operation.is_memory_op() || self.memory.contains(event.address);
        if core_ok && address_ok {
            return Ok(());
        }
        Err(Error::InvalidEvent {
            core: event.core,
            address: event.address,
            num_cores: self.processors.len(),
            address_space: self.memory.size(),
        })
    }

    /// Applies one event. An out-of-range event is rejected before any state changes.
    pub fn apply(&mut self, event: &Event) -> Result<AccessOutcome> {
        self.validate(event)?;
        self.bus.begin_event(self.events_applied);
        let (access, latency) = match event.operation {
            Operation::Inc => {
                self.processors[event.core.0].increment();
                self.metrics.record_increment();
                (None, INC_CYCLES)
            }
            Operation::Read => {
                let (line, latency) = self.access(event.core, event.address, Access::Read);
                (Some(line), latency)
            }
            Operation::Write => {
                let (line, latency) = self.access(event.core, event.address, Access::Write);
                (Some(line), latency)
            }
        };
        self.metrics.total_cycles += latency;
        self.events_applied += 1;

        let outcome = AccessOutcome {
            event: *event,
            access,
            register: self.processors[event.core.0].register(),
            latency,
        };
        match access {
            Some(line) => debug!(
                "#{} {}: {} -> {} ({}, {} cycles)",
                self.events_applied,
                event,
                line.before,
                line.after,
                if line.hit { "hit" } else { "miss" },
                latency
            ),
            None => debug!("#{} {}: register = {}", self.events_applied, event, outcome.register),
        }
        debug_assert!(
            self.is_coherent(),
            "coherence violated at {:?} after {}",
            self.coherence_violation(),
            event
        );
        Ok(outcome)
    }

    fn access(&mut self, core: CoreId, address: Address, access: Access) -> (LineAccess, Cycle) {
        let idx = core.0;
        let before = self.caches[idx].state_of(address);
        let sharing = self.bus.sharing(core, address, &self.caches);
        let transition = self.protocol.transition(before, access, sharing);

        let hit_latency = Cycle::from(self.caches[idx].hit_latency_cycles());
        let mut latency = hit_latency;
        let mut source = None;
        let mut writebacks = 0;
        let mut invalidated = 0;
        let mut data = self.caches[idx].data_of(address);

        if let Some(request) = transition.request {
            latency += Cycle::from(self.bus.bus_latency_cycles());
            let snooped = self
                .bus
                .broadcast(self.protocol, request, core, address, &mut self.caches);
            if transition.actions.writeback {
                if let Some((owner, word)) = snooped.supplier {
                    self.bus.write_back(&mut self.memory, owner, address, word);
                    latency += Cycle::from(self.memory.write_latency_cycles());
                    writebacks += 1;
                }
            }
            debug_assert_eq!(
                transition.actions.invalidate_others,
                snooped.invalidated > 0,
                "{request} by {core} on {address}"
            );
            invalidated = snooped.invalidated;
            if !transition.hit {
                debug_assert_eq!(transition.actions.fetch_from_owner, snooped.supplier.is_some());
                let owner = snooped
                    .supplier
                    .filter(|_| transition.actions.fetch_from_owner);
                let (word, from) = match owner {
                    Some((owner, word)) => {
                        latency += Cycle::from(self.bus.transfer_latency_cycles());
                        (word, DataSource::Cache(owner))
                    }
                    None => {
                        debug_assert!(transition.actions.fetch_from_memory);
                        latency += Cycle::from(self.memory.read_latency_cycles());
                        (self.bus.read_memory(&self.memory, core, address), DataSource::Memory)
                    }
                };
                self.bus.data_response(core, address, from);
                source = Some(from);
                data = Some(word);
            }
        }

        let processor = &mut self.processors[idx];
        let word = match access {
            Access::Read => {
                let word = data.unwrap_or_default();
                processor.load(word);
                word
            }
            Access::Write => processor.register(),
        };

        let cache = &mut self.caches[idx];
        if transition.hit {
            let lookup = cache.access(address);
            debug_assert_eq!(lookup, CacheAccessResult::Hit);
            cache.set_state(address, transition.next);
            cache.set_data(address, word);
        } else if let Some(evicted) = cache.fill(address, word, transition.next) {
            if evicted.state.is_dirty() {
                debug!("{core} evicts dirty {} ({})", evicted.address, evicted.state);
                self.bus
                    .write_back(&mut self.memory, core, evicted.address, evicted.data);
                latency += Cycle::from(self.memory.write_latency_cycles());
                writebacks += 1;
            }
        }

        self.metrics
            .record_access(core, transition.hit, latency - hit_latency);
        let line = LineAccess {
            hit: transition.hit,
            before,
            after: transition.next,
            request: transition.request,
            source,
            invalidated,
            writebacks,
        };
        (line, latency)
    }

    /// Applies every event in order and snapshots the final state.
    pub fn run(mut self, events: impl IntoIterator<Item = Event>) -> Result<SimulationResult> {
        info!(
            "simulating {} on {} cores",
            self.protocol,
            self.processors.len()
        );
        for event in events {
            self.apply(&event)?;
        }
        let result = self.finish();
        info!(
            "{} run finished: {} transactions, hit rate {:.2}%",
            result.protocol,
            result.transactions.len(),
            result.report.hit_rate()
        );
        Ok(result)
    }

    pub fn finish(self) -> SimulationResult {
        let report = self.report();
        SimulationResult {
            protocol: self.protocol,
            report,
            per_core: (0..self.processors.len())
                .map(|id| self.metrics.core(CoreId(id)))
                .collect(),
            stall_cycles: self.metrics.stall_cycles,
            caches: self.caches.iter().map(Cache::snapshot).collect(),
            memory: self.memory.words().to_vec(),
            registers: self.processors.iter().map(Processor::register).collect(),
            transactions: self.bus.into_log(),
        }
    }

    /// First address whose copies break the single-writer rule, if any.
    pub fn coherence_violation(&self) -> Option<Address> {
        let addresses: BTreeSet<Address> = self
            .caches
            .iter()
            .flat_map(|cache| cache.resident().map(|(address, _)| address))
            .collect();
        addresses.into_iter().find(|&address| {
            let held: Vec<LineState> = self
                .caches
                .iter()
                .map(|cache| cache.state_of(address))
                .filter(|state| state.is_valid())
                .collect();
            let dirty = held.iter().filter(|state| state.is_dirty()).count();
            let exclusive = held.iter().any(|state| state.is_exclusive());
            dirty > 1
                || (exclusive && held.len() > 1)
                || held.iter().any(|&state| !self.protocol.allows(state))
        })
    }

    pub fn is_coherent(&self) -> bool {
        self.coherence_violation().is_none()
    }

    pub fn line_state(&self, core: CoreId, address: Address) -> LineState {
        self.caches
            .get(core.0)
            .map_or(LineState::Invalid, |cache| cache.state_of(address))
    }

    pub fn register(&self, core: CoreId) -> Option<Word> {
        self.processors.get(core.0).map(Processor::register)
    }

    pub fn report(&self) -> MetricsReport {
        self.metrics.report(self.bus.stats())
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn bus_stats(&self) -> &BusStats {
        self.bus.stats()
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn memory(&self) -> &MainMemory {
        &self.memory
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::metrics::{HIT_RATE, MISS_RATE};
    use crate::workload::{EventSequence, WorkloadConfig};

    fn system(num_cores: usize) -> SystemConfig {
        SystemConfig {
            workload: WorkloadConfig {
                num_cores,
                ..WorkloadConfig::default()
            },
            ..SystemConfig::default()
        }
    }

    const A: u64 = 7;

    #[test]
    fn mesi_remote_read_of_modified_line() {
        let mut sim = Simulator::new(Protocol::Mesi, &system(2)).unwrap();
        sim.apply(&Event::write(0, A)).unwrap();
        assert_eq!(sim.line_state(CoreId(0), Address(A)), LineState::Modified);
        assert_eq!(sim.line_state(CoreId(1), Address(A)), LineState::Invalid);

        let out = sim.apply(&Event::read(1, A)).unwrap();
        let line = out.access.unwrap();
        assert!(!line.hit);
        assert_eq!(line.before, LineState::Invalid);
        assert_eq!(line.after, LineState::Shared);
        assert_eq!(line.source, Some(DataSource::Cache(CoreId(0))));
        assert_eq!(line.writebacks, 1);
        assert_eq!(sim.line_state(CoreId(0), Address(A)), LineState::Shared);
        assert_eq!(sim.line_state(CoreId(1), Address(A)), LineState::Shared);

        let report = sim.report();
        assert_eq!(report.get("Writebacks"), Some(1.0));
        assert_eq!(report.get(HIT_RATE), Some(0.0));
        assert_eq!(report.get(MISS_RATE), Some(100.0));
    }

    #[test]
    fn moesi_keeps_dirty_owner() {
        let mut sim = Simulator::new(Protocol::Moesi, &system(2)).unwrap();
        sim.apply(&Event::write(0, A)).unwrap();
        sim.apply(&Event::read(1, A)).unwrap();
        assert_eq!(sim.line_state(CoreId(0), Address(A)), LineState::Owned);
        assert_eq!(sim.line_state(CoreId(1), Address(A)), LineState::Shared);
        assert_eq!(sim.bus_stats().writebacks, 0);
        assert!(sim.is_coherent());
    }

    #[test]
    fn read_observes_remote_write() {
        let mut sim = Simulator::new(Protocol::Moesi, &system(2)).unwrap();
        sim.apply(&Event::inc(0)).unwrap();
        sim.apply(&Event::inc(0)).unwrap();
        sim.apply(&Event::write(0, 3)).unwrap();
        let out = sim.apply(&Event::read(1, 3)).unwrap();
        assert_eq!(out.register, 2);
        assert_eq!(sim.register(CoreId(1)), Some(2));
        // Still dirty in PE0, memory is stale.
        assert_eq!(sim.memory().read(Address(3)), 0);
    }

    #[test]
    fn write_to_shared_line_upgrades() {
        let mut sim = Simulator::new(Protocol::Mesi, &system(3)).unwrap();
        sim.apply(&Event::read(0, A)).unwrap();
        sim.apply(&Event::read(1, A)).unwrap();
        let out = sim.apply(&Event::write(0, A)).unwrap();
        let line = out.access.unwrap();
        assert!(line.hit);
        assert_eq!(line.request, Some(BusRequest::BusUpgr));
        assert_eq!(line.source, None);
        assert_eq!(sim.line_state(CoreId(0), Address(A)), LineState::Modified);
        assert_eq!(sim.line_state(CoreId(1), Address(A)), LineState::Invalid);
        assert_eq!(sim.bus_stats().invalidates, 1);
        assert_eq!(sim.bus_stats().upgrades, 1);
    }

    #[test]
    fn first_reader_gets_exclusive_from_memory() {
        let mut sim = Simulator::new(Protocol::Mesi, &system(2)).unwrap();
        let out = sim.apply(&Event::read(0, 1)).unwrap();
        let line = out.access.unwrap();
        assert_eq!(line.after, LineState::Exclusive);
        assert_eq!(line.source, Some(DataSource::Memory));
        // hit 1 + bus 2 + memory read 3
        assert_eq!(out.latency, 6);
        let silent = sim.apply(&Event::write(0, 1)).unwrap();
        assert_eq!(silent.access.unwrap().request, None);
        assert_eq!(silent.latency, 1);
    }

    #[test]
    fn dirty_eviction_writes_back() {
        let mut config = system(1);
        config.cache = CacheConfig {
            num_sets: 1,
            associativity: 1,
            hit_latency_cycles: 1,
        };
        let mut sim = Simulator::new(Protocol::Mesi, &config).unwrap();
        sim.apply(&Event::inc(0)).unwrap();
        sim.apply(&Event::write(0, 0)).unwrap();
        let out = sim.apply(&Event::read(0, 1)).unwrap();
        assert_eq!(out.access.unwrap().writebacks, 1);
        assert_eq!(sim.memory().read(Address(0)), 1);
        assert_eq!(sim.bus_stats().memory_writes, 1);
    }

    #[test]
    fn invalid_events_leave_state_untouched() {
        let mut sim = Simulator::new(Protocol::Mesi, &system(2)).unwrap();
        let err = sim.apply(&Event::read(2, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidEvent { num_cores: 2, .. }));
        assert!(sim.apply(&Event::write(0, 16)).is_err());
        assert_eq!(sim.events_applied(), 0);
        assert_eq!(sim.metrics().memory_accesses(), 0);
        assert!(sim.bus_stats().power_consumption == 0.0);
    }

    #[test]
    fn increments_never_touch_the_cache() {
        let mut sim = Simulator::new(Protocol::Moesi, &system(1)).unwrap();
        let out = sim.apply(&Event::inc(0)).unwrap();
        assert_eq!(out.access, None);
        assert_eq!(out.register, 1);
        let report = sim.report();
        assert_eq!(report.get("MemoryAccesses"), Some(0.0));
        assert_eq!(report.get("Increments"), Some(1.0));
        assert_eq!(report.get("Cycles"), Some(1.0));
        assert_eq!(report.hit_rate(), 100.0);
    }

    #[test]
    fn same_seed_same_report() {
        let config = SystemConfig::default();
        let run = |protocol| {
            Simulator::seeded(protocol, &config, Seed(1234))
                .unwrap()
                .run(EventSequence::new(Seed(1234), &config.workload))
                .unwrap()
        };
        for protocol in Protocol::ALL {
            let a = run(protocol);
            let b = run(protocol);
            assert_eq!(a.report, b.report);
            assert_eq!(a.memory, b.memory);
            assert_eq!(a.transactions, b.transactions);
            assert!((a.report.hit_rate() + a.report.miss_rate() - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn mesi_never_produces_owned() {
        let config = SystemConfig::default();
        let result = Simulator::seeded(Protocol::Mesi, &config, Seed(77))
            .unwrap()
            .run(EventSequence::new(Seed(77), &config.workload))
            .unwrap();
        assert!(result
            .caches
            .iter()
            .flatten()
            .all(|line| line.state != LineState::Owned));
        assert_eq!(result.caches.len(), 3);
        assert_eq!(result.memory.len(), 16);
    }

    #[test]
    fn last_sharer_upgrades_without_invalidating() {
        let mut config = system(2);
        config.cache = CacheConfig {
            num_sets: 1,
            associativity: 1,
            hit_latency_cycles: 1,
        };
        let mut sim = Simulator::new(Protocol::Mesi, &config).unwrap();
        sim.apply(&Event::read(0, A)).unwrap();
        sim.apply(&Event::read(1, A)).unwrap();
        // PE1 drops its shared copy, PE0 is left as the only sharer.
        sim.apply(&Event::read(1, 2)).unwrap();
        let out = sim.apply(&Event::write(0, A)).unwrap();
        let line = out.access.unwrap();
        assert_eq!(line.request, Some(BusRequest::BusUpgr));
        assert_eq!(line.invalidated, 0);
        assert_eq!(sim.bus_stats().invalidates, 0);
        assert_eq!(sim.line_state(CoreId(0), Address(A)), LineState::Modified);
    }

    #[test]
    fn write_miss_reports_invalidated_copies() {
        let mut sim = Simulator::new(Protocol::Moesi, &system(3)).unwrap();
        sim.apply(&Event::read(0, A)).unwrap();
        sim.apply(&Event::read(1, A)).unwrap();
        let line = sim.apply(&Event::write(2, A)).unwrap().access.unwrap();
        assert_eq!(line.request, Some(BusRequest::BusRdX));
        assert_eq!(line.invalidated, 2);
        assert!(matches!(line.source, Some(DataSource::Cache(_))));
    }

    #[test]
    fn per_core_counters_reach_the_result() {
        let mut sim = Simulator::new(Protocol::Mesi, &system(3)).unwrap();
        for e in [Event::read(0, 1), Event::read(0, 1), Event::write(1, 1), Event::inc(2)] {
            sim.apply(&e).unwrap();
        }
        let result = sim.finish();
        assert_eq!(result.per_core.len(), 3);
        assert_eq!(result.per_core[0].cache_hits, 1);
        assert_eq!(result.per_core[0].cache_misses, 1);
        assert_eq!(result.per_core[1].cache_misses, 1);
        assert_eq!(result.per_core[2], PerCoreMetrics::default());
        let per_core_stalls: u64 = result.per_core.iter().map(|c| c.stall_cycles).sum();
        assert_eq!(result.stall_cycles, per_core_stalls);
        assert!(result.stall_cycles > 0);
    }

    #[test]
    fn oversized_memory_is_rejected_before_allocating() {
        let mut config = system(1);
        config.workload.address_space = u64::MAX;
        assert!(matches!(
            Simulator::new(Protocol::Mesi, &config),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Simulator::seeded(Protocol::Moesi, &config, Seed(1)).is_err());
    }

    #[test]
    fn bad_config_is_rejected() {
        let mut config = system(2);
        config.cache.num_sets = 3;
        assert!(matches!(
            Simulator::new(Protocol::Mesi, &config),
            Err(Error::InvalidConfig(_))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::workload::{EventSequence, WorkloadConfig};
    use proptest::prelude::*;
    use std::collections::HashMap;

    const CORES: usize = 3;
    const WORDS: u64 = 6;

    /// Small caches so evictions happen often.
    fn tight_system() -> SystemConfig {
        SystemConfig {
            cache: CacheConfig {
                num_sets: 1,
                associativity: 2,
                hit_latency_cycles: 1,
            },
            workload: WorkloadConfig {
                num_cores: CORES,
                address_space: WORDS,
                ..WorkloadConfig::default()
            },
            ..SystemConfig::default()
        }
    }

    fn event() -> impl Strategy<Value = Event> {
        (0..3u8, 0..CORES, 0..WORDS).prop_map(|(op, core, address)| match op {
            0 => Event::read(core, address),
            1 => Event::write(core, address),
            _ => Event::inc(core),
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_single_writer_after_every_event(events in proptest::collection::vec(event(), 0..120)) {
            for protocol in Protocol::ALL {
                let mut sim = Simulator::new(protocol, &tight_system()).unwrap();
                for e in &events {
                    sim.apply(e).unwrap();
                    prop_assert_eq!(sim.coherence_violation(), None, "{} after {}", protocol, e);
                }
            }
        }

        #[test]
        fn prop_generated_sequences_stay_coherent(seed in any::<u64>()) {
            let config = SystemConfig::default();
            for protocol in Protocol::ALL {
                let mut sim = Simulator::seeded(protocol, &config, Seed(seed)).unwrap();
                for e in EventSequence::new(Seed(seed), &config.workload) {
                    sim.apply(&e).unwrap();
                    prop_assert!(sim.is_coherent());
                }
                let report = sim.report();
                prop_assert!((report.hit_rate() + report.miss_rate() - 100.0).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_moesi_writes_back_no_more_than_mesi(events in proptest::collection::vec(event(), 0..120)) {
            let writebacks = |protocol| {
                let mut sim = Simulator::new(protocol, &tight_system()).unwrap();
                for e in &events {
                    sim.apply(e).unwrap();
                }
                sim.bus_stats().writebacks
            };
            prop_assert!(writebacks(Protocol::Moesi) <= writebacks(Protocol::Mesi));
        }

        #[test]
        fn prop_reads_observe_latest_write(events in proptest::collection::vec(event(), 0..120)) {
            for protocol in Protocol::ALL {
                let mut sim = Simulator::new(protocol, &tight_system()).unwrap();
                let mut registers = [0 as Word; CORES];
                let mut latest: HashMap<u64, Word> = HashMap::new();
                for e in &events {
                    let out = sim.apply(e).unwrap();
                    let core = e.core.0;
                    match e.operation {
                        Operation::Inc => registers[core] = registers[core].wrapping_add(1),
                        Operation::Write => {
                            latest.insert(e.address.0, registers[core]);
                        }
                        Operation::Read => {
                            registers[core] = latest.get(&e.address.0).copied().unwrap_or(0);
                        }
                    }
                    prop_assert_eq!(out.register, registers[core], "{} at {}", protocol, e);
                }
            }
        }
    }
}
