//! Snooping bus connecting the private caches to each other and to main memory.
//!
//! The interconnect owns all traffic accounting: request counts, data responses,
//! invalidations, memory reads and writebacks, the power model and the transaction log.

use crate::cache::Cache;
use crate::core::{Address, CoreId, Word};
use crate::memory::MainMemory;
use crate::protocol::{BusRequest, LineState, Protocol, Sharing};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Energy cost, in arbitrary units, of each kind of bus activity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerModel {
    pub memory_read: f64,
    pub memory_write: f64,
    pub data_response: f64,
    /// Per snooping cache, for a BusRd.
    pub snoop_read: f64,
    /// Per snooping cache, for a BusRdX or BusUpgr.
    pub snoop_read_exclusive: f64,
    /// Per snooping cache, when the request wants data back.
    pub snoop_data_response: f64,
    /// Per snooping cache, when the request only invalidates.
    pub snoop_invalidate: f64,
    /// Requester side, for a BusRd.
    pub request_read: f64,
    /// Requester side, for a BusRdX or BusUpgr.
    pub request_read_exclusive: f64,
}

impl Default for PowerModel {
    fn default() -> Self {
        Self {
            memory_read: 2.0,
            memory_write: 3.0,
            data_response: 0.8,
            snoop_read: 1.0,
            snoop_read_exclusive: 2.0,
            snoop_data_response: 0.8,
            snoop_invalidate: 1.5,
            request_read: 1.0,
            request_read_exclusive: 1.2,
        }
    }
}

/// Bus timing and power configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterconnectConfig {
    /// Cycles to arbitrate for the bus and broadcast a request.
    pub bus_latency_cycles: u32,
    /// Cycles for a cache-to-cache block transfer.
    pub transfer_latency_cycles: u32,
    pub power: PowerModel,
}

impl Default for InterconnectConfig {
    fn default() -> Self {
        Self {
            bus_latency_cycles: 2,
            transfer_latency_cycles: 2,
            power: PowerModel::default(),
        }
    }
}

/// Traffic counters accumulated over a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BusStats {
    pub read_requests: u64,
    /// BusRdX and BusUpgr.
    pub read_exclusive_requests: u64,
    pub upgrades: u64,
    pub data_responses: u64,
    /// Remote copies invalidated.
    pub invalidates: u64,
    pub memory_reads: u64,
    pub memory_writes: u64,
    /// Memory writes caused by a dirty line (snooped or evicted).
    pub writebacks: u64,
    pub power_consumption: f64,
}

/// Where the data of a response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DataSource {
    Memory,
    Cache(CoreId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BusRecordKind {
    Request(BusRequest),
    DataResponse(DataSource),
    Invalidate(CoreId),
    MemoryRead,
    Writeback,
}

/// One entry of the bus transaction log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BusRecord {
    /// Index of the event that caused this transaction.
    pub event: u64,
    pub core: CoreId,
    pub address: Address,
    pub kind: BusRecordKind,
}

/// Outcome of broadcasting a request to the other caches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snooped {
    /// Cache that supplied the block and the word it supplied.
    pub supplier: Option<(CoreId, Word)>,
    pub invalidated: usize,
}

pub struct Interconnect {
    config: InterconnectConfig,
    stats: BusStats,
    log: Vec<BusRecord>,
    event: u64,
}

impl Interconnect {
    pub fn new(config: InterconnectConfig) -> Self {
        Self {
            config,
            stats: BusStats::default(),
            log: Vec::new(),
            event: 0,
        }
    }

    /// Tags subsequent log records with the given event index.
    pub fn begin_event(&mut self, event: u64) {
        self.event = event;
    }

    /// Shared / dirty lines as seen by `requester` for `address`.
    pub fn sharing(&self, requester: CoreId, address: Address, caches: &[Cache]) -> Sharing {
        others(requester, caches)
            .map(|(_, cache)| cache.state_of(address))
            .fold(Sharing::default(), |acc, state| Sharing {
                shared: acc.shared || state.is_valid(),
                dirty: acc.dirty || state.is_dirty(),
            })
    }

    /// Puts `request` on the bus and applies every other cache's snoop response.
    pub fn broadcast(
        &mut self,
        protocol: Protocol,
        request: BusRequest,
        requester: CoreId,
        address: Address,
        caches: &mut [Cache],
    ) -> Snooped {
        let power = &self.config.power;
        let (request_cost, snoop_cost) = match request {
            BusRequest::BusRd => {
                self.stats.read_requests += 1;
                (power.request_read, power.snoop_read + power.snoop_data_response)
            }
            BusRequest::BusRdX => {
                self.stats.read_exclusive_requests += 1;
                (
                    power.request_read_exclusive,
                    power.snoop_read_exclusive + power.snoop_data_response,
                )
            }
            BusRequest::BusUpgr => {
                self.stats.read_exclusive_requests += 1;
                self.stats.upgrades += 1;
                (
                    power.request_read_exclusive,
                    power.snoop_read_exclusive + power.snoop_invalidate,
                )
            }
        };
        let snoopers = caches.len().saturating_sub(1) as f64;
        self.stats.power_consumption += request_cost + snoop_cost * snoopers;
        self.record(requester, address, BusRecordKind::Request(request));
        debug!("{requester} puts {request} {address} on the bus");

        let supplier = select_supplier(requester, address, caches);
        let mut snooped = Snooped {
            supplier: None,
            invalidated: 0,
        };
        for (idx, cache) in caches.iter_mut().enumerate() {
            let id = CoreId(idx);
            if id == requester {
                continue;
            }
            let state = cache.state_of(address);
            let response = protocol.snoop(state, request);
            trace!("{id} snoops {request} {address}: {state} -> {}", response.next);
            if response.supplies_data && supplier == Some(id) {
                snooped.supplier = cache.data_of(address).map(|word| (id, word));
            }
            if state != response.next {
                cache.set_state(address, response.next);
                if state.is_valid() && response.next == LineState::Invalid {
                    snooped.invalidated += 1;
                    self.stats.invalidates += 1;
                    self.record(id, address, BusRecordKind::Invalidate(id));
                }
            }
        }
        snooped
    }

    /// Delivers the block to the requester, counting one data response.
    pub fn data_response(&mut self, requester: CoreId, address: Address, source: DataSource) {
        self.stats.data_responses += 1;
        self.stats.power_consumption += self.config.power.data_response;
        self.record(requester, address, BusRecordKind::DataResponse(source));
        debug!("data response for {address} to {requester} from {source:?}");
    }

    pub fn read_memory(&mut self, memory: &MainMemory, requester: CoreId, address: Address) -> Word {
        self.stats.memory_reads += 1;
        self.stats.power_consumption += self.config.power.memory_read;
        self.record(requester, address, BusRecordKind::MemoryRead);
        memory.read(address)
    }

    /// Flushes a dirty word held by `owner` to memory.
    pub fn write_back(&mut self, memory: &mut MainMemory, owner: CoreId, address: Address, data: Word) {
        self.stats.memory_writes += 1;
        self.stats.writebacks += 1;
        self.stats.power_consumption += self.config.power.memory_write;
        self.record(owner, address, BusRecordKind::Writeback);
        debug!("{owner} writes back {address} = {data}");
        memory.write(address, data);
    }

    fn record(&mut self, core: CoreId, address: Address, kind: BusRecordKind) {
        self.log.push(BusRecord {
            event: self.event,
            core,
            address,
            kind,
        });
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn log(&self) -> &[BusRecord] {
        &self.log
    }

    pub fn into_log(self) -> Vec<BusRecord> {
        self.log
    }

    pub fn bus_latency_cycles(&self) -> u32 {
        self.config.bus_latency_cycles
    }

    pub fn transfer_latency_cycles(&self) -> u32 {
        self.config.transfer_latency_cycles
    }
}

fn others(requester: CoreId, caches: &[Cache]) -> impl Iterator<Item = (CoreId, &Cache)> {
    caches
        .iter()
        .enumerate()
        .map(|(idx, cache)| (CoreId(idx), cache))
        .filter(move |(id, _)| *id != requester)
}

/// The dirty owner if there is one, else an exclusive holder, else the lowest-numbered sharer.
fn select_supplier(requester: CoreId, address: Address, caches: &[Cache]) -> Option<CoreId> {
    others(requester, caches)
        .filter_map(|(id, cache)| {
            let rank = match cache.state_of(address) {
                LineState::Modified | LineState::Owned => 0,
                LineState::Exclusive => 1,
                LineState::Shared => 2,
                LineState::Invalid => return None,
            };
            Some((rank, id))
        })
        .min()
        .map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::memory::MemoryConfig;

    fn caches(n: usize) -> Vec<Cache> {
        (0..n).map(|_| Cache::new(CacheConfig::default())).collect()
    }

    #[test]
    fn sharing_reports_shared_and_dirty() {
        let mut cs = caches(3);
        let bus = Interconnect::new(InterconnectConfig::default());
        let a = Address(4);
        assert_eq!(bus.sharing(CoreId(0), a, &cs), Sharing::default());
        cs[1].fill(a, 0, LineState::Shared);
        assert_eq!(
            bus.sharing(CoreId(0), a, &cs),
            Sharing {
                shared: true,
                dirty: false
            }
        );
        cs[2].fill(a, 0, LineState::Owned);
        assert!(bus.sharing(CoreId(0), a, &cs).dirty);
        // The requester's own copy does not count.
        assert!(!bus.sharing(CoreId(2), a, &cs).dirty);
    }

    #[test]
    fn bus_read_prefers_dirty_supplier() {
        let mut cs = caches(3);
        let a = Address(1);
        cs[1].fill(a, 10, LineState::Shared);
        cs[2].fill(a, 20, LineState::Owned);
        let mut bus = Interconnect::new(InterconnectConfig::default());
        let snooped = bus.broadcast(Protocol::Moesi, BusRequest::BusRd, CoreId(0), a, &mut cs);
        assert_eq!(snooped.supplier, Some((CoreId(2), 20)));
        assert_eq!(snooped.invalidated, 0);
        assert_eq!(cs[2].state_of(a), LineState::Owned);
        assert_eq!(bus.stats().read_requests, 1);
    }

    #[test]
    fn upgrade_invalidates_other_copies() {
        let mut cs = caches(3);
        let a = Address(2);
        for c in cs.iter_mut() {
            c.fill(a, 5, LineState::Shared);
        }
        let mut bus = Interconnect::new(InterconnectConfig::default());
        let snooped = bus.broadcast(Protocol::Mesi, BusRequest::BusUpgr, CoreId(1), a, &mut cs);
        assert_eq!(snooped.invalidated, 2);
        assert_eq!(snooped.supplier, None);
        assert_eq!(cs[0].state_of(a), LineState::Invalid);
        assert_eq!(cs[1].state_of(a), LineState::Shared);
        assert_eq!(bus.stats().invalidates, 2);
        assert_eq!(bus.stats().upgrades, 1);
        assert_eq!(bus.stats().read_exclusive_requests, 1);
    }

    #[test]
    fn power_follows_the_model() {
        let mut cs = caches(3);
        let mut bus = Interconnect::new(InterconnectConfig::default());
        bus.broadcast(Protocol::Mesi, BusRequest::BusRd, CoreId(0), Address(0), &mut cs);
        // requester 1.0 + two snoopers × (1.0 + 0.8)
        assert!((bus.stats().power_consumption - 4.6).abs() < 1e-9);

        let mut mem = MainMemory::with_words(MemoryConfig::default(), vec![0; 4]);
        bus.read_memory(&mem, CoreId(0), Address(0));
        bus.write_back(&mut mem, CoreId(0), Address(0), 9);
        assert!((bus.stats().power_consumption - 9.6).abs() < 1e-9);
        assert_eq!(mem.read(Address(0)), 9);
        assert_eq!(bus.stats().writebacks, 1);
    }

    #[test]
    fn log_is_tagged_with_event_index() {
        let mut cs = caches(2);
        let mut bus = Interconnect::new(InterconnectConfig::default());
        bus.begin_event(7);
        bus.broadcast(Protocol::Mesi, BusRequest::BusRdX, CoreId(1), Address(3), &mut cs);
        bus.data_response(CoreId(1), Address(3), DataSource::Memory);
        assert_eq!(bus.log().len(), 2);
        assert!(bus.log().iter().all(|r| r.event == 7));
        assert_eq!(bus.log()[0].kind, BusRecordKind::Request(BusRequest::BusRdX));
    }
}
