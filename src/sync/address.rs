//! Deterministic mapping of source-ledger party addresses to target-ledger
//! wallets.
//!
//! No cryptographic identity link exists between the two ledgers, so the
//! derivation strategy is pluggable. The default derives an ed25519 key from
//! a configured seed and the source address, and caches the result per
//! source address.

use crate::solana::derive_signing_key;
use std::collections::HashMap;
use std::sync::Mutex;

/// Pluggable derivation of target-ledger addresses.
pub trait AddressMapper: Send + Sync {
    fn to_target_address(&self, source_address: &str) -> String;
}

/// Seeded key-derivation mapper with a per-address cache.
pub struct SeededAddressMapper {
    seed: String,
    cache: Mutex<HashMap<String, String>>,
}

impl SeededAddressMapper {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

impl AddressMapper for SeededAddressMapper {
    fn to_target_address(&self, source_address: &str) -> String {
        if let Some(hit) = self.cache.lock().unwrap().get(source_address) {
            return hit.clone();
        }

        let material = format!("{}:{}", self.seed, source_address);
        let key = derive_signing_key(&material);
        let address = hex::encode(key.verifying_key().to_bytes());

        self.cache
            .lock()
            .unwrap()
            .insert(source_address.to_string(), address.clone());
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let first = SeededAddressMapper::new("bridge-seed");
        let second = SeededAddressMapper::new("bridge-seed");
        assert_eq!(
            first.to_target_address("ak_client"),
            second.to_target_address("ak_client")
        );
    }

    #[test]
    fn distinct_inputs_get_distinct_addresses() {
        let mapper = SeededAddressMapper::new("bridge-seed");
        assert_ne!(
            mapper.to_target_address("ak_client"),
            mapper.to_target_address("ak_freelancer")
        );

        let other_seed = SeededAddressMapper::new("another-seed");
        assert_ne!(
            mapper.to_target_address("ak_client"),
            other_seed.to_target_address("ak_client")
        );
    }

    #[test]
    fn repeated_lookups_hit_the_cache() {
        let mapper = SeededAddressMapper::new("bridge-seed");
        let first = mapper.to_target_address("ak_client");
        let again = mapper.to_target_address("ak_client");
        assert_eq!(first, again);
        assert_eq!(mapper.cached_len(), 1);
    }
}
