//! Source -> target address resolution for mapped transfers.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::traits::MappingStore;

/// Case-insensitive source -> target map. Unmapped sources are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    targets: HashMap<String, String>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// First insertion for a source wins.
    pub fn insert(&mut self, source: &str, target: impl Into<String>) {
        self.targets
            .entry(normalize(source))
            .or_insert_with(|| target.into());
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.targets.get(&normalize(source)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<S: AsRef<str>, T: Into<String>> FromIterator<(S, T)> for AddressMap {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut map = AddressMap::new();
        for (source, target) in iter {
            map.insert(source.as_ref(), target);
        }
        map
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Looks up stored mappings for a batch of sources in one round trip.
pub struct AddressMappingResolver<'a> {
    store: &'a dyn MappingStore,
}

impl<'a> AddressMappingResolver<'a> {
    pub fn new(store: &'a dyn MappingStore) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, sources: &[String]) -> CoreResult<AddressMap> {
        if sources.is_empty() {
            return Ok(AddressMap::new());
        }

        let rows = self.store.fetch_address_mappings(sources).await?;
        let map: AddressMap = rows
            .iter()
            .filter(|m| !m.target_address.trim().is_empty())
            .map(|m| (m.source_address.as_str(), m.target_address.trim()))
            .collect();

        let missing = sources.iter().filter(|s| map.get(s).is_none()).count();
        if missing > 0 {
            warn!("{} of {} source wallets have no target mapping", missing, sources.len());
        }
        debug!("Resolved {} address mappings", map.len());
        Ok(map)
    }
}
