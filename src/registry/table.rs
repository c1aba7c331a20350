//! Alias-aware lookup table of execution profiles.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::registry::profile::ExecutionProfile;

/// Profiles for one purpose, keyed by language.
///
/// Frozen after construction; lookups hand out shared references so an alias
/// and its canonical key resolve to the same profile object.
#[derive(Debug, Default)]
pub struct ProfileTable {
    profiles: HashMap<String, Arc<ExecutionProfile>>,
    aliases: HashMap<String, String>,
}

impl ProfileTable {
    /// Build a table, rejecting duplicate keys and ambiguous aliases.
    pub fn new(profiles: impl IntoIterator<Item = ExecutionProfile>) -> Result<Self, RegistryError> {
        let mut table = Self::default();

        for profile in profiles {
            let key = profile.key().to_string();
            if table.profiles.contains_key(&key) {
                return Err(RegistryError::DuplicateKey(key));
            }
            if table.aliases.contains_key(&key) {
                return Err(RegistryError::AliasShadowsKey { alias: key });
            }
            for alias in profile.aliases() {
                if table.profiles.contains_key(alias) {
                    return Err(RegistryError::AliasShadowsKey {
                        alias: alias.clone(),
                    });
                }
                if let Some(existing) = table.aliases.get(alias) {
                    return Err(RegistryError::DuplicateAlias {
                        alias: alias.clone(),
                        existing: existing.clone(),
                    });
                }
                table.aliases.insert(alias.clone(), key.clone());
            }
            table.profiles.insert(key, Arc::new(profile));
        }

        Ok(table)
    }

    /// Look up `key` directly, then through the alias map.
    pub fn resolve(&self, key: &str) -> Option<Arc<ExecutionProfile>> {
        if let Some(profile) = self.profiles.get(key) {
            return Some(Arc::clone(profile));
        }
        self.aliases
            .get(key)
            .and_then(|canonical| self.profiles.get(canonical))
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Canonical keys with their aliases, sorted by key.
    pub fn languages(&self) -> BTreeMap<String, Vec<String>> {
        self.profiles
            .iter()
            .map(|(key, profile)| (key.clone(), profile.aliases().iter().cloned().collect()))
            .collect()
    }
}
