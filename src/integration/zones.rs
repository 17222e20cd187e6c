use crate::core::ZoneId;
use std::collections::BTreeSet;

/// Zones that exist in this system.
#[derive(Debug, Clone, Default)]
pub struct ZoneRegistry {
    system: String,
    zones: BTreeSet<ZoneId>,
}

impl ZoneRegistry {
    pub fn new(system: impl Into<String>, zones: impl IntoIterator<Item = ZoneId>) -> Self {
        Self {
            system: system.into(),
            zones: zones.into_iter().collect(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn has_zone(&self, zone: &ZoneId) -> bool {
        self.zones.contains(zone)
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZoneId> {
        self.zones.iter()
    }
}
