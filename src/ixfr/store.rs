//! The delta builder used while ingesting an incoming transfer.

use crate::ixfr::chain::ZoneIxfr;
use crate::ixfr::codec;
use crate::ixfr::config::IxfrConfig;
use crate::ixfr::delta::IxfrDelta;
use crate::ixfr::error::IxfrError;

use domain::base::Serial;

/// The minimum growth increment used by [`grow_for`], so a long run of
/// one-byte appends doesn't reallocate on every call.
const MIN_GROWTH: usize = 4096;

/// A delta under construction.
///
/// Built incrementally while an incoming IXFR or AXFR response (or an
/// equivalent local diff) is read record by record: [`add_oldsoa`] and
/// [`add_newsoa`] set a version's boundary SOAs, [`del_rr`]/[`add_rr`] append
/// the changed records (SOA-typed records passed to either are silently
/// dropped, since the boundary is only ever set through the two `*soa`
/// calls), and [`finish`] hands back the completed [`IxfrDelta`]. A store can
/// be abandoned with [`cancel`] at any time; once cancelled it refuses
/// further writes rather than silently discarding them.
///
/// [`add_newsoa`]: Self::add_newsoa
/// [`add_oldsoa`]: Self::add_oldsoa
/// [`del_rr`]: Self::del_rr
/// [`add_rr`]: Self::add_rr
/// [`finish`]: Self::finish
/// [`cancel`]: Self::cancel
#[derive(Debug)]
pub struct IxfrStore {
    state: State,
}

#[derive(Debug)]
struct Building {
    old_serial: Serial,
    new_serial: Serial,
    oldsoa: Vec<u8>,
    newsoa: Vec<u8>,
    del: Vec<u8>,
    add: Vec<u8>,
    log_str: Option<String>,
}

#[derive(Debug)]
enum State {
    Open(Box<Building>),
    Cancelled,
}

impl IxfrStore {
    /// Begin building a delta transitioning from `old_serial` to a serial
    /// not yet known (set by the first call to [`add_newsoa`](Self::add_newsoa)).
    pub fn start(old_serial: Serial) -> Self {
        IxfrStore {
            state: State::Open(Box::new(Building {
                old_serial,
                new_serial: old_serial,
                oldsoa: Vec::new(),
                newsoa: Vec::new(),
                del: Vec::new(),
                add: Vec::new(),
                log_str: None,
            })),
        }
    }

    /// Attach a human-readable description of this transfer, carried through
    /// to the persisted file's header comment.
    pub fn set_log_str(&mut self, log_str: impl Into<String>) {
        if let State::Open(d) = &mut self.state {
            d.log_str = Some(log_str.into());
        }
    }

    fn building_mut(&mut self) -> Result<&mut Building, IxfrError> {
        match &mut self.state {
            State::Open(d) => Ok(d),
            State::Cancelled => Err(IxfrError::RequestMalformed),
        }
    }

    /// Record the new SOA that this delta transitions to.
    ///
    /// `rr` must be a single uncompressed SOA RR, as produced by
    /// [`codec::build_soa`] or read verbatim off the wire.
    pub fn add_newsoa(&mut self, rr: &[u8]) -> Result<(), IxfrError> {
        let fields = codec::parse_soa_rdata(rr, 0).ok_or(IxfrError::RequestMalformed)?;
        let new_serial = Serial::from(fields.serial);
        let building = self.building_mut()?;
        building.newsoa = rr.to_vec();
        building.new_serial = new_serial;
        Ok(())
    }

    /// Record the old SOA that this delta transitions from.
    ///
    /// `rr` must be a single uncompressed SOA RR. Its serial must match the
    /// `old_serial` this store was [`start`](Self::start)ed with, since a
    /// mismatch would mean the caller is building the wrong delta entirely.
    ///
    /// This is the signal that the transfer really is an incremental one (as
    /// opposed to an AXFR-shaped full replacement), so it is the point at
    /// which admitting this delta is checked against the zone's configured
    /// retention budget: see [`Self::make_space`].
    pub fn add_oldsoa(
        &mut self,
        rr: &[u8],
        chain: &mut ZoneIxfr,
        config: &IxfrConfig,
    ) -> Result<(), IxfrError> {
        let fields = codec::parse_soa_rdata(rr, 0).ok_or(IxfrError::RequestMalformed)?;
        {
            let building = self.building_mut()?;
            if Serial::from(fields.serial) != building.old_serial {
                return Err(IxfrError::RequestMalformed);
            }
        }
        self.make_space(chain, config, 0)?;
        let building = self.building_mut()?;
        building.oldsoa = rr.to_vec();
        Ok(())
    }

    /// Append a non-SOA record to the `del` side. A record of type SOA is
    /// silently dropped.
    pub fn del_rr(&mut self, rr: &[u8]) -> Result<(), IxfrError> {
        if codec::rr_type(rr, 0) == Some(codec::TYPE_SOA) {
            return Ok(());
        }
        let building = self.building_mut()?;
        grow_for(&mut building.del, rr.len())?;
        building.del.extend_from_slice(rr);
        Ok(())
    }

    /// Append a non-SOA record to the `add` side. A record of type SOA is
    /// silently dropped.
    pub fn add_rr(&mut self, rr: &[u8]) -> Result<(), IxfrError> {
        if codec::rr_type(rr, 0) == Some(codec::TYPE_SOA) {
            return Ok(());
        }
        let building = self.building_mut()?;
        grow_for(&mut building.add, rr.len())?;
        building.add.extend_from_slice(rr);
        Ok(())
    }

    /// Complete the delta: appends `newsoa` to both `del` and `add` (the
    /// terminal SOA each side is served or persisted up to), runs one last
    /// budget check against the delta's true final size, and hands the
    /// finished [`IxfrDelta`] back to the caller to insert into the zone's
    /// chain.
    ///
    /// Rejects a delta missing either boundary SOA: records on one side with
    /// no SOA on that side is malformed, per the SOA-paired add/delete rule.
    pub fn finish(
        mut self,
        chain: &mut ZoneIxfr,
        config: &IxfrConfig,
    ) -> Result<IxfrDelta, IxfrError> {
        let building = match &mut self.state {
            State::Cancelled => return Err(IxfrError::RequestMalformed),
            State::Open(d) => d,
        };
        if building.oldsoa.is_empty() || building.newsoa.is_empty() {
            return Err(IxfrError::RequestMalformed);
        }
        grow_for(&mut building.del, building.newsoa.len())?;
        building.del.extend_from_slice(&building.newsoa);
        grow_for(&mut building.add, building.newsoa.len())?;
        building.add.extend_from_slice(&building.newsoa);

        let final_len =
            building.oldsoa.len() + building.newsoa.len() + building.del.len() + building.add.len();
        self.make_space(chain, config, final_len)?;

        match self.state {
            State::Cancelled => Err(IxfrError::BudgetExceeded),
            State::Open(d) => Ok(IxfrDelta {
                old_serial: d.old_serial,
                new_serial: d.new_serial,
                oldsoa: d.oldsoa,
                newsoa: d.newsoa,
                del: d.del,
                add: d.add,
                log_str: d.log_str,
                file_num: 0,
            }),
        }
    }

    /// Abandon this delta. Further writes fail with
    /// [`IxfrError::RequestMalformed`].
    pub fn cancel(&mut self) {
        if !matches!(self.state, State::Cancelled) {
            tracing::warn!("cancelling in-progress IXFR delta");
        }
        self.state = State::Cancelled;
    }

    /// Whether this store has been [`cancel`](Self::cancel)led.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.state, State::Cancelled)
    }

    /// Evict the oldest deltas from `chain` until admitting a delta of
    /// `candidate_extra` additional bytes (on top of whatever is already
    /// retained) would satisfy both `config.ixfr_number` and
    /// `config.ixfr_size`, cancelling this store if that is impossible.
    ///
    /// `config.ixfr_number == 0` disables history retention outright: the
    /// store is cancelled unconditionally. `config.ixfr_size == 0` means an
    /// unlimited byte budget, so only the count budget applies.
    fn make_space(
        &mut self,
        chain: &mut ZoneIxfr,
        config: &IxfrConfig,
        candidate_extra: usize,
    ) -> Result<(), IxfrError> {
        if config.ixfr_number == 0 {
            self.cancel();
            return Err(IxfrError::BudgetExceeded);
        }
        while chain.len() >= config.ixfr_number {
            let Some(evicted) = chain.oldest_serial() else {
                break;
            };
            tracing::debug!(serial = %evicted, reason = "count budget", "evicting IXFR delta");
            chain.remove_oldest();
        }
        if config.ixfr_size > 0 {
            while chain.total_bytes() + candidate_extra > config.ixfr_size {
                let Some(evicted) = chain.oldest_serial() else {
                    break;
                };
                tracing::debug!(serial = %evicted, reason = "size budget", "evicting IXFR delta");
                chain.remove_oldest();
            }
            if chain.total_bytes() + candidate_extra > config.ixfr_size {
                self.cancel();
                return Err(IxfrError::BudgetExceeded);
            }
        }
        Ok(())
    }
}

/// Grow `buf`'s capacity by at least `additional` bytes, in increments of at
/// least [`MIN_GROWTH`], using fallible allocation.
///
/// This is how the engine surfaces [`IxfrError::AllocationFailed`] instead
/// of aborting the process on an allocator failure while ingesting an
/// attacker-controlled transfer.
fn grow_for(buf: &mut Vec<u8>, additional: usize) -> Result<(), IxfrError> {
    let needed = additional.saturating_sub(buf.capacity() - buf.len());
    if needed == 0 {
        return Ok(());
    }
    let reserve = needed.max(MIN_GROWTH);
    buf.try_reserve_exact(reserve)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_name() -> Vec<u8> {
        let mut v = Vec::new();
        for label in ["example", "com"] {
            v.push(label.len() as u8);
            v.extend_from_slice(label.as_bytes());
        }
        v.push(0);
        v
    }

    fn soa_rr(serial: u32) -> Vec<u8> {
        let apex = example_name();
        codec::build_soa(
            &apex,
            3600,
            &codec::SoaFields {
                mname: apex.clone(),
                rname: apex.clone(),
                serial,
                refresh: 3600,
                retry: 900,
                expire: 604800,
                minimum: 3600,
            },
        )
    }

    #[test]
    fn builds_a_minimal_delta() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        let mut store = IxfrStore::start(Serial::from(10));
        store.add_oldsoa(&soa_rr(10), &mut chain, &cfg).unwrap();
        store.add_newsoa(&soa_rr(11)).unwrap();
        let delta = store.finish(&mut chain, &cfg).unwrap();
        assert_eq!(delta.old_serial, Serial::from(10));
        assert_eq!(delta.new_serial, Serial::from(11));
        // del/add are empty of content but still carry the trailing newsoa.
        assert_eq!(delta.del, soa_rr(11));
        assert_eq!(delta.add, soa_rr(11));
    }

    #[test]
    fn rejects_mismatched_old_soa() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        let mut store = IxfrStore::start(Serial::from(10));
        assert!(store.add_oldsoa(&soa_rr(99), &mut chain, &cfg).is_err());
    }

    #[test]
    fn finish_without_soas_fails() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        let store = IxfrStore::start(Serial::from(10));
        assert!(store.finish(&mut chain, &cfg).is_err());
    }

    #[test]
    fn cancelled_store_rejects_writes() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        let mut store = IxfrStore::start(Serial::from(10));
        store.cancel();
        assert!(store.add_oldsoa(&soa_rr(10), &mut chain, &cfg).is_err());
        assert!(store.finish(&mut chain, &cfg).is_err());
    }

    #[test]
    fn soa_typed_del_and_add_are_dropped() {
        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        let mut store = IxfrStore::start(Serial::from(10));
        store.add_oldsoa(&soa_rr(10), &mut chain, &cfg).unwrap();
        store.add_newsoa(&soa_rr(11)).unwrap();
        store.del_rr(&soa_rr(10)).unwrap();
        store.add_rr(&soa_rr(11)).unwrap();
        let delta = store.finish(&mut chain, &cfg).unwrap();
        assert_eq!(delta.del, soa_rr(11));
        assert_eq!(delta.add, soa_rr(11));
    }

    #[test]
    fn zero_ixfr_number_cancels_on_old_soa() {
        let mut chain = ZoneIxfr::new();
        let mut cfg = IxfrConfig::default();
        cfg.ixfr_number = 0;
        let mut store = IxfrStore::start(Serial::from(10));
        let err = store.add_oldsoa(&soa_rr(10), &mut chain, &cfg).unwrap_err();
        assert!(matches!(err, IxfrError::BudgetExceeded));
        assert!(store.is_cancelled());
    }

    #[test]
    fn add_oldsoa_evicts_to_make_room() {
        let mut chain = ZoneIxfr::new();
        let mut cfg = IxfrConfig::default();
        cfg.ixfr_number = 1;

        let mut first = IxfrStore::start(Serial::from(10));
        first.add_oldsoa(&soa_rr(10), &mut chain, &cfg).unwrap();
        first.add_newsoa(&soa_rr(11)).unwrap();
        let delta = first.finish(&mut chain, &cfg).unwrap();
        assert!(chain.add(delta, &cfg));
        assert_eq!(chain.len(), 1);

        let mut second = IxfrStore::start(Serial::from(11));
        second.add_oldsoa(&soa_rr(11), &mut chain, &cfg).unwrap();
        // Admitting the old_serial=11 transfer should have evicted the
        // old_serial=10 delta to respect ixfr_number == 1.
        assert!(chain.find(Serial::from(10)).is_none());
    }
}
