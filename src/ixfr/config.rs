//! Per-zone IXFR policy.

use serde::{Deserialize, Serialize};

/// The default maximum number of deltas retained per zone.
const DEFAULT_IXFR_NUMBER: usize = 100;

/// The default maximum total size, in bytes, of the deltas retained per
/// zone.
const DEFAULT_IXFR_SIZE: usize = 1024 * 1024;

/// Per-zone IXFR retention policy.
///
/// Mirrors the shape of Cascade's other per-zone policy spec types: kebab
/// case on the wire, unknown keys rejected, every field defaulted so a zone
/// with no explicit IXFR stanza still gets a sane policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct IxfrConfig {
    /// Whether IXFR history is kept for this zone at all. If `false`, the
    /// zone only ever answers AXFR.
    pub store_ixfr: bool,

    /// The maximum number of deltas retained at once.
    pub ixfr_number: usize,

    /// The maximum total size, in bytes, of the deltas retained at once.
    pub ixfr_size: usize,
}

impl Default for IxfrConfig {
    fn default() -> Self {
        IxfrConfig {
            store_ixfr: true,
            ixfr_number: DEFAULT_IXFR_NUMBER,
            ixfr_size: DEFAULT_IXFR_SIZE,
        }
    }
}
