//! The ordered history of deltas for one zone.

use std::collections::BTreeMap;

use domain::base::Serial;

use crate::ixfr::config::IxfrConfig;
use crate::ixfr::delta::IxfrDelta;
use crate::ixfr::serial;

/// The ordered, budget-bounded history of deltas for a single zone.
///
/// Deltas are keyed by their `old_serial`, stored in a [`BTreeMap`] so the
/// chain is always iterated oldest-first. A chain is not required to be
/// connected: [`connected`](Self::connected) and [`next`](Self::next) are
/// how callers discover whether it actually is, rather than it being an
/// invariant this type enforces on insertion. Wraparound of the `u32` key
/// space is out of scope: a chain is bounded and actively evicted, so the
/// keys it actually holds never span a full rotation.
#[derive(Clone, Debug, Default)]
pub struct ZoneIxfr {
    deltas: BTreeMap<u32, IxfrDelta>,
    total_bytes: usize,
}

impl ZoneIxfr {
    /// An empty chain.
    pub fn new() -> Self {
        ZoneIxfr::default()
    }

    /// The number of deltas currently retained.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Whether the chain holds no deltas.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// The total size, in bytes, of every retained delta.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// The delta whose `old_serial` is `serial`, if retained.
    pub fn find(&self, serial: Serial) -> Option<&IxfrDelta> {
        self.deltas.get(&serial.into_int())
    }

    /// A mutable reference to the delta whose `old_serial` is `serial`, if
    /// retained. Used by persistence to record a delta's on-disk slot.
    pub fn get_mut(&mut self, serial: Serial) -> Option<&mut IxfrDelta> {
        self.deltas.get_mut(&serial.into_int())
    }

    /// The `old_serial` of the oldest retained delta, if any.
    pub fn oldest_serial(&self) -> Option<Serial> {
        self.deltas.keys().next().copied().map(Serial::from)
    }

    /// The oldest retained delta.
    pub fn first(&self) -> Option<&IxfrDelta> {
        self.deltas.values().next()
    }

    /// The newest retained delta.
    pub fn last(&self) -> Option<&IxfrDelta> {
        self.deltas.values().next_back()
    }

    /// The delta that continues on from `delta`, if the chain holds one.
    ///
    /// This doubles as the connectivity check for a single link: it looks
    /// the next delta up by `delta.new_serial` rather than by key adjacency
    /// in the map, so a gap in the chain (a missing intermediate version)
    /// shows up here as `None` rather than as an incorrect neighbor.
    pub fn next<'a>(&'a self, delta: &IxfrDelta) -> Option<&'a IxfrDelta> {
        self.find(delta.new_serial)
    }

    /// The delta that `delta` continues on from, if the chain holds one.
    pub fn previous<'a>(&'a self, delta: &IxfrDelta) -> Option<&'a IxfrDelta> {
        self.deltas
            .values()
            .find(|d| d.new_serial == delta.old_serial)
    }

    /// Whether the chain, walked from `from` to `to` inclusive, forms an
    /// unbroken sequence of deltas with no gaps.
    ///
    /// Returns `false` if either endpoint is not retained, or if a delta in
    /// the middle of the walk is missing its successor before `to` is
    /// reached.
    pub fn connected(&self, from: Serial, to: Serial) -> bool {
        let Some(mut current) = self.find(from) else {
            return false;
        };
        loop {
            if current.new_serial == to {
                return true;
            }
            match self.next(current) {
                Some(d) => current = d,
                None => return false,
            }
        }
    }

    /// Every delta from `from` (inclusive) to `to` (exclusive of `from`'s
    /// predecessor), in forward order, or `None` if the chain is not
    /// connected between them.
    pub fn walk(&self, from: Serial, to: Serial) -> Option<Vec<&IxfrDelta>> {
        let mut out = Vec::new();
        let mut current = self.find(from)?;
        loop {
            out.push(current);
            if current.new_serial == to {
                return Some(out);
            }
            current = self.next(current)?;
        }
    }

    /// Insert a delta, then evict the oldest deltas (by key order) until the
    /// chain satisfies both `config.ixfr_number` and `config.ixfr_size`.
    ///
    /// Returns `false`, without inserting, if the delta alone exceeds
    /// `config.ixfr_size` (eviction of everything else still could not make
    /// it fit).
    pub fn add(&mut self, delta: IxfrDelta, config: &IxfrConfig) -> bool {
        if config.ixfr_number == 0 {
            return false;
        }
        if config.ixfr_size > 0 && delta.byte_len() > config.ixfr_size {
            return false;
        }
        self.total_bytes += delta.byte_len();
        self.deltas.insert(delta.old_serial.into_int(), delta);
        while self.deltas.len() > config.ixfr_number
            || (config.ixfr_size > 0 && self.total_bytes > config.ixfr_size)
        {
            if !self.remove_oldest() {
                break;
            }
        }
        true
    }

    /// Remove and return the oldest retained delta.
    pub fn remove_oldest(&mut self) -> bool {
        let Some(&key) = self.deltas.keys().next() else {
            return false;
        };
        if let Some(d) = self.deltas.remove(&key) {
            tracing::debug!(serial = key, "evicted oldest IXFR delta");
            self.total_bytes -= d.byte_len();
        }
        true
    }

    /// Remove the delta whose `old_serial` is `serial`, if present.
    pub fn remove(&mut self, serial: Serial) -> Option<IxfrDelta> {
        let d = self.deltas.remove(&serial.into_int())?;
        self.total_bytes -= d.byte_len();
        Some(d)
    }

    /// Remove every retained delta.
    pub fn clear(&mut self) {
        self.deltas.clear();
        self.total_bytes = 0;
    }

    /// Every retained delta, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &IxfrDelta> {
        self.deltas.values()
    }
}

/// Order two delta endpoints; a thin re-export so callers of this module
/// don't need a separate `use` of [`serial`] for the common case.
pub fn compare(a: Serial, b: Serial) -> serial::Order {
    serial::compare(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(old: u32, new: u32) -> IxfrDelta {
        IxfrDelta {
            old_serial: Serial::from(old),
            new_serial: Serial::from(new),
            oldsoa: vec![0; 2],
            newsoa: vec![0; 2],
            del: vec![0; 2],
            add: vec![0; 2],
            log_str: None,
            file_num: 0,
        }
    }

    #[test]
    fn connected_chain_walks_forward() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(11, 12), &cfg);
        assert!(chain.connected(Serial::from(10), Serial::from(12)));
        let walk = chain
            .walk(Serial::from(10), Serial::from(12))
            .expect("connected");
        assert_eq!(walk.len(), 2);
    }

    #[test]
    fn disconnected_chain_reports_gap() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(12, 13), &cfg);
        assert!(!chain.connected(Serial::from(10), Serial::from(13)));
        assert!(chain.walk(Serial::from(10), Serial::from(13)).is_none());
    }

    #[test]
    fn eviction_respects_count_budget() {
        let mut cfg = IxfrConfig::default();
        cfg.ixfr_number = 2;
        let mut chain = ZoneIxfr::new();
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(11, 12), &cfg);
        chain.add(delta(12, 13), &cfg);
        assert_eq!(chain.len(), 2);
        assert!(chain.find(Serial::from(10)).is_none());
        assert!(chain.find(Serial::from(11)).is_some());
    }

    #[test]
    fn eviction_respects_byte_budget() {
        let mut cfg = IxfrConfig::default();
        cfg.ixfr_number = 100;
        cfg.ixfr_size = 9;
        let mut chain = ZoneIxfr::new();
        // Each delta is 8 bytes; a third insert should evict the first.
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(11, 12), &cfg);
        assert_eq!(chain.len(), 1);
        assert!(chain.find(Serial::from(11)).is_some());
    }

    #[test]
    fn oversized_single_delta_is_rejected() {
        let mut cfg = IxfrConfig::default();
        cfg.ixfr_size = 4;
        let mut chain = ZoneIxfr::new();
        assert!(!chain.add(delta(10, 11), &cfg));
        assert!(chain.is_empty());
    }
}
