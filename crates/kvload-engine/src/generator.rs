use crate::config::EngineConfig;
use rand::Rng;
use uuid::Builder;

/// Keys produced for one worker iteration, in generation order.
pub type KeyBatch = Vec<String>;

/// Prefix of keys drawn from the shared duplicate pool.
pub const DUPLICATE_KEY_PREFIX: &str = "dup-key-";
/// Prefix of keys that are unique per generation.
pub const UNIQUE_KEY_PREFIX: &str = "key-";

/// Pool key for `index`. The same index always yields the same key, so pool
/// keys recur across batches and workers.
pub fn duplicate_key(index: u64) -> String {
    format!("{DUPLICATE_KEY_PREFIX}{index}")
}

pub fn is_duplicate_key(key: &str) -> bool {
    key.starts_with(DUPLICATE_KEY_PREFIX)
}

/// Generate `config.batch_size` keys.
///
/// Each key is an independent trial: a uniform draw in `[0, 100)` below
/// `duplicate_percentage` picks a pool key uniformly from
/// `[0, duplicate_pool_size)`, otherwise the key gets a fresh v4 UUID.
/// The UUID bytes come from `rng` as well, so a seeded generator
/// reproduces the whole batch.
pub fn generate_batch<R: Rng + ?Sized>(config: &EngineConfig, rng: &mut R) -> KeyBatch {
    let mut batch = Vec::with_capacity(config.batch_size);
    for _ in 0..config.batch_size {
        let roll: u8 = rng.gen_range(0..100);
        if roll < config.duplicate_percentage && config.duplicate_pool_size > 0 {
            let index = rng.gen_range(0..config.duplicate_pool_size);
            batch.push(duplicate_key(index));
        } else {
            let id = Builder::from_random_bytes(rng.gen()).into_uuid();
            batch.push(format!("{UNIQUE_KEY_PREFIX}{id}"));
        }
    }
    batch
}
