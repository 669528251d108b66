//! Instrument Naming
//!
//! B2C2 identifies spot instruments on the wire with a fixed `.SPOT`
//! suffix (`"BTCUSD.SPOT"`), while every external-facing API and cache in
//! this service uses the suffix-stripped canonical name (`"BTCUSD"`).
//!
//! The bidirectional mapping is built exactly once at startup from the
//! tradable-instrument list and is immutable afterwards; it is shared
//! read-only between the stream client and the aggregation layer.

use std::collections::HashMap;

/// Wire suffix marking a spot instrument.
pub const SPOT_SUFFIX: &str = ".SPOT";

/// Strip the spot suffix from a wire instrument name.
///
/// Names without the suffix are returned unchanged: the strip is total so
/// the map construction never rejects an instrument the exchange reports.
#[must_use]
pub fn canonical_name(wire: &str) -> &str {
    wire.strip_suffix(SPOT_SUFFIX).unwrap_or(wire)
}

/// Immutable bidirectional map between wire and canonical instrument names.
///
/// Built once from the full tradable-instrument list; lookups in either
/// direction must succeed for any instrument the service subscribes to.
/// A missing entry is a configuration problem surfaced at subscribe time,
/// not a runtime fault of the map itself.
#[derive(Debug, Default)]
pub struct InstrumentMap {
    wire_to_canonical: HashMap<String, String>,
    canonical_to_wire: HashMap<String, String>,
}

impl InstrumentMap {
    /// Build the map from the tradable-instrument list (wire names).
    ///
    /// Duplicate wire names collapse to a single entry.
    #[must_use]
    pub fn build<I, S>(wire_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut wire_to_canonical = HashMap::new();
        let mut canonical_to_wire = HashMap::new();

        for wire in wire_names {
            let wire = wire.as_ref();
            let canonical = canonical_name(wire);
            wire_to_canonical.insert(wire.to_string(), canonical.to_string());
            canonical_to_wire.insert(canonical.to_string(), wire.to_string());
        }

        Self {
            wire_to_canonical,
            canonical_to_wire,
        }
    }

    /// Resolve a wire name to its canonical form.
    #[must_use]
    pub fn canonical_for(&self, wire: &str) -> Option<&str> {
        self.wire_to_canonical.get(wire).map(String::as_str)
    }

    /// Resolve a canonical name to its wire form.
    #[must_use]
    pub fn wire_for(&self, canonical: &str) -> Option<&str> {
        self.canonical_to_wire.get(canonical).map(String::as_str)
    }

    /// Number of mapped instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wire_to_canonical.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wire_to_canonical.is_empty()
    }

    /// All canonical names, unordered.
    #[must_use]
    pub fn canonical_names(&self) -> Vec<String> {
        self.canonical_to_wire.keys().cloned().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
