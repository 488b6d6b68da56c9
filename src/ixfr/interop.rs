//! Seams to the zone database and the AXFR responder.
//!
//! The engine never reads a zone's RRset tree or drives AXFR itself; both
//! live outside this crate. These traits are the boundary: [`ZoneDb`] is
//! how the engine learns the current serial and apex name of a zone it
//! holds a chain for, and [`AxfrResponder`] is how a query that cannot be
//! answered from the chain is handed off.

use domain::base::Serial;

use crate::ixfr::error::IxfrError;

/// What the engine needs to know about a zone from the database that owns
/// it.
///
/// Implemented by the caller's zone database wrapper; the engine only ever
/// calls this to validate a query's QNAME and to anchor a new delta to the
/// zone's current serial.
pub trait ZoneDb {
    /// The zone's current (most recent) serial, if this database is
    /// authoritative for the zone at all.
    fn current_serial(&self, apex: &[u8]) -> Option<Serial>;

    /// The zone's apex name in uncompressed wire format, if this database is
    /// authoritative for the given QNAME.
    ///
    /// A query's QNAME and a zone's configured apex name need not be
    /// byte-identical (case folding), so this is looked up rather than
    /// assumed equal to the query's QNAME.
    fn apex_name(&self, qname: &[u8]) -> Option<Vec<u8>>;
}

/// A fallback responder for a full zone transfer.
///
/// Reached whenever the chain cannot answer an IXFR request in-full (no
/// delta chain at all, a requested serial outside the retained history, or a
/// disconnected chain): per RFC 1995 §2, the server "MUST" fall back to
/// AXFR rather than fail the request. [`crate::ixfr::stream::resolve_query`]
/// drains this trait directly rather than surfacing "no delta available" to
/// its caller, so a missing or disconnected chain is invisible to whoever
/// sent the query.
pub trait AxfrResponder {
    /// Return the next chunk of the AXFR response for the zone at `apex`, as
    /// a run of whole, pre-encoded, uncompressed RRs.
    ///
    /// Called repeatedly until [`axfr_done`](Self::axfr_done) reports the
    /// transfer complete.
    fn axfr_chunk(&mut self, apex: &[u8]) -> Result<Vec<Vec<u8>>, IxfrError>;

    /// Whether the most recent call to [`axfr_chunk`](Self::axfr_chunk) was
    /// the last chunk of the transfer.
    fn axfr_done(&self) -> bool;
}
