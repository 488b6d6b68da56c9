//! A single version-to-version difference.

use domain::base::Serial;

/// The difference between one version of a zone and the next.
///
/// Per RFC 1995, a delta is represented as an old SOA, the records removed
/// since that SOA, a new SOA, and the records added to reach it. `oldsoa` and
/// `newsoa` are each exactly one RR; `del` and `add` are flat runs of
/// uncompressed RRs (see [`crate::ixfr::codec`]) with a trailing copy of
/// `newsoa` appended by [`crate::ixfr::store::IxfrStore::finish`], so serving
/// or persisting a delta is just a byte copy, never a re-encode.
#[derive(Clone, Debug)]
pub struct IxfrDelta {
    /// The zone serial this delta transitions from.
    pub old_serial: Serial,

    /// The zone serial this delta transitions to.
    pub new_serial: Serial,

    /// The SOA owning `old_serial`, as a single uncompressed RR.
    pub oldsoa: Vec<u8>,

    /// The SOA owning `new_serial`, as a single uncompressed RR.
    pub newsoa: Vec<u8>,

    /// Records removed by this delta, terminated by a copy of `newsoa`.
    pub del: Vec<u8>,

    /// Records added by this delta, terminated by a copy of `newsoa`.
    pub add: Vec<u8>,

    /// An optional human-readable description of this transfer, carried
    /// through to the persisted file's header comment.
    pub log_str: Option<String>,

    /// The on-disk slot this delta currently occupies, or `0` if it has
    /// never been written.
    pub file_num: u32,
}

impl IxfrDelta {
    /// The size of this delta in bytes, as counted against a zone's IXFR
    /// byte budget.
    ///
    /// Counts only the encoded record bytes, not the `Serial` fields, the
    /// optional log string, or any `Vec` overhead, so the budget measures
    /// wire-format weight rather than in-memory layout.
    pub fn byte_len(&self) -> usize {
        self.oldsoa.len() + self.newsoa.len() + self.del.len() + self.add.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_sums_all_four_sections() {
        let delta = IxfrDelta {
            old_serial: Serial::from(10),
            new_serial: Serial::from(11),
            oldsoa: vec![0; 5],
            newsoa: vec![0; 7],
            del: vec![0; 20],
            add: vec![0; 30],
            log_str: None,
            file_num: 0,
        };
        assert_eq!(delta.byte_len(), 62);
    }
}
