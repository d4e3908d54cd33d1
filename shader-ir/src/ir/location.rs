use rustc_hash::FxHashMap;

/// Handle into `Context`'s deduplicated location set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(pub(crate) u32);

/// Where an IR instruction came from, for diagnostics and for the
/// instruction-combiner's "keep the earliest location" merge rule.
///
/// Locations are deduplicated by structural equality: two instructions
/// translated from the same GCN address share a `LocationId`, and an
/// inlined call site composes the caller's location rather than
/// allocating a fresh one per inlined instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    Unknown,
    Gcn { address: u64 },
    Inlined { caller: LocationId, address: u64 },
}

/// The interning table behind `Context::intern_location`. Kept as its own
/// type so `Context` can own it without exposing the backing map.
#[derive(Default)]
pub struct LocationTable {
    locations: Vec<Location>,
    index: FxHashMap<Location, LocationId>,
}

impl LocationTable {
    pub fn intern(&mut self, location: Location) -> LocationId {
        if let Some(id) = self.index.get(&location) {
            return *id;
        }
        let id = LocationId(self.locations.len() as u32);
        self.locations.push(location.clone());
        self.index.insert(location, id);
        id
    }

    pub fn get(&self, id: LocationId) -> &Location {
        &self.locations[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structurally_equal_locations_dedup() {
        let mut table = LocationTable::default();
        let a = table.intern(Location::Gcn { address: 0x100 });
        let b = table.intern(Location::Gcn { address: 0x100 });
        let c = table.intern(Location::Gcn { address: 0x104 });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
