//! The incremental zone transfer (IXFR) engine for [Cascade].
//!
//! [Cascade]: https://nlnetlabs.nl/projects/cascade
//!
//! This crate is the part of Cascade's zone storage that serves secondaries:
//!
//! - Recording the sequence of differences between successive versions of a
//!   zone.
//! - Serving those differences to secondaries over DNS/TCP and DNS/UDP,
//!   falling back to AXFR when a requested version is unavailable.
//! - Persisting that diff history across restarts.
//!
//! See [`ixfr`] for the engine itself. The zone database, AXFR responder,
//! TSIG signing, and network I/O all live outside this crate; the engine
//! reaches them only through the traits in [`ixfr::interop`].

pub mod ixfr;
