//! The IXFR engine.
//!
//! This module records the sequence of differences between successive
//! versions of a zone, serves those differences to secondaries over DNS/TCP
//! and DNS/UDP (RFC 1995), falling back to AXFR (RFC 5936) when a requested
//! version is unavailable, and persists the differences across restarts.
//!
//! The zone database itself, the AXFR responder, TSIG signing, and network
//! I/O are external collaborators, reached only through the traits in
//! [`interop`].
//!
//! # Module map
//!
//! - [`codec`]: wire-format primitives for walking the uncompressed RR
//!   segments stored in a delta.
//! - [`serial`]: RFC 1982 serial number comparison.
//! - [`config`]: per-zone IXFR policy.
//! - [`error`]: the engine's error types.
//! - [`delta`]: [`IxfrDelta`](delta::IxfrDelta), one version-to-version diff.
//! - [`chain`]: [`ZoneIxfr`](chain::ZoneIxfr), the ordered history of deltas.
//! - [`store`]: [`IxfrStore`](store::IxfrStore), the delta builder used while
//!   ingesting an incoming transfer.
//! - [`interop`]: the seams to the zone database and the AXFR responder.
//! - [`stream`]: the response streamer, including the IXFR query parser.
//! - [`persist`]: on-disk persistence of the version history.

pub mod chain;
pub mod codec;
pub mod config;
pub mod delta;
pub mod error;
pub mod interop;
pub mod persist;
pub mod serial;
pub mod store;
pub mod stream;

pub use chain::ZoneIxfr;
pub use config::IxfrConfig;
pub use delta::IxfrDelta;
pub use error::IxfrError;
pub use store::IxfrStore;
pub use stream::{IxfrResponseState, QueryOutcome};
