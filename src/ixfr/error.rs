//! Errors raised by the IXFR engine.

use std::fmt;
use std::io;

use domain::base::Serial;

//----------- IxfrError ---------------------------------------------------------

/// An error from the IXFR engine.
///
/// Request-path variants ([`RequestMalformed`](Self::RequestMalformed),
/// [`ZoneNotAuthoritative`](Self::ZoneNotAuthoritative),
/// [`ZoneCorrupt`](Self::ZoneCorrupt)) are converted to a DNS RCODE by the
/// caller and never propagate past [`crate::ixfr::stream`].
/// [`NoDeltaAvailable`](Self::NoDeltaAvailable) is not really an error: it
/// signals an AXFR fallback. The remaining variants are local to ingestion
/// and persistence and never reach the serving path.
#[derive(Debug)]
pub enum IxfrError {
    /// The IXFR query did not satisfy the shape required by RFC 1995 (one
    /// question, at least one authority RR, a parseable leading SOA).
    RequestMalformed,

    /// No zone matches the query's QNAME.
    ZoneNotAuthoritative,

    /// The zone has no usable SOA record.
    ZoneCorrupt,

    /// The version chain cannot answer this request; fall back to AXFR.
    NoDeltaAvailable,

    /// Ingesting this delta would exceed the configured budget even after
    /// evicting every older delta.
    BudgetExceeded,

    /// A buffer could not be grown to hold an appended RR.
    AllocationFailed,

    /// A persistence write, rename, or unlink failed.
    PersistenceIoFailure(io::Error),

    /// A persisted delta file could not be parsed, or the recovered chain
    /// does not terminate at the zone's current serial.
    PersistenceParseFailure(PersistenceParseError),
}

impl fmt::Display for IxfrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IxfrError::RequestMalformed => f.write_str("the IXFR request was malformed"),
            IxfrError::ZoneNotAuthoritative => f.write_str("the zone is not served here"),
            IxfrError::ZoneCorrupt => f.write_str("the zone has no usable SOA record"),
            IxfrError::NoDeltaAvailable => {
                f.write_str("no delta chain can answer this request; an AXFR is required")
            }
            IxfrError::BudgetExceeded => {
                f.write_str("the delta does not fit within the configured IXFR budget")
            }
            IxfrError::AllocationFailed => f.write_str("failed to grow a delta buffer"),
            IxfrError::PersistenceIoFailure(e) => write!(f, "IXFR persistence I/O error: {e}"),
            IxfrError::PersistenceParseFailure(e) => {
                write!(f, "IXFR persistence parse error: {e}")
            }
        }
    }
}

impl std::error::Error for IxfrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IxfrError::PersistenceIoFailure(e) => Some(e),
            IxfrError::PersistenceParseFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for IxfrError {
    fn from(e: io::Error) -> Self {
        IxfrError::PersistenceIoFailure(e)
    }
}

impl From<std::collections::TryReserveError> for IxfrError {
    fn from(_: std::collections::TryReserveError) -> Self {
        IxfrError::AllocationFailed
    }
}

//----------- PersistenceParseError ----------------------------------------------

/// Why a persisted delta file could not be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceParseError {
    /// A record could not be decoded at all.
    Truncated,

    /// A record was expected to be an SOA (owned by the zone apex, class IN)
    /// but was not.
    ExpectedSoa,

    /// A leading SOA's serial did not match the serial the reader expected
    /// next (the previous delta's `old_serial`, or the zone's current
    /// serial for slot 1).
    SerialMismatch { expected: Serial, found: Serial },

    /// The delta, once parsed, would not fit the configured size budget.
    BudgetExceeded,
}

impl fmt::Display for PersistenceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceParseError::Truncated => f.write_str("the file ended mid-record"),
            PersistenceParseError::ExpectedSoa => {
                f.write_str("expected an SOA owned by the zone apex")
            }
            PersistenceParseError::SerialMismatch { expected, found } => write!(
                f,
                "expected serial {expected} to continue the chain, found {found}"
            ),
            PersistenceParseError::BudgetExceeded => {
                f.write_str("the persisted delta exceeds the configured size budget")
            }
        }
    }
}

impl std::error::Error for PersistenceParseError {}
