//! Round-robin rotation over a fixed pool of upstream API keys.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out pool keys in strict round-robin order, shared across all owners.
///
/// The cursor is atomic so the rotation property survives concurrent callers,
/// even though the engine currently advances it from a single task only.
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRotator {
    /// Pool emptiness is rejected here, once, so `next` stays total.
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(anyhow::anyhow!("credential pool must not be empty"));
        }
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns the key at the cursor and advances the cursor by one, mod pool
    /// size. No other side effects.
    pub fn next(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.keys.len();
        tracing::debug!(key_index = idx, "rotated to next api key");
        &self.keys[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::KeyRotator;

    fn pool(keys: &[&str]) -> KeyRotator {
        KeyRotator::new(keys.iter().map(|k| k.to_string()).collect()).expect("non-empty pool")
    }

    #[test]
    fn empty_pool_is_rejected_at_construction() {
        assert!(KeyRotator::new(Vec::new()).is_err());
    }

    #[test]
    fn next_cycles_through_pool_in_order() {
        let rotator = pool(&["k1", "k2", "k3"]);
        let drawn: Vec<&str> = (0..7).map(|_| rotator.next()).collect();
        assert_eq!(drawn, ["k1", "k2", "k3", "k1", "k2", "k3", "k1"]);
    }

    #[test]
    fn rotation_is_fair_over_many_calls() {
        let rotator = pool(&["a", "b", "c"]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..100 {
            *counts.entry(rotator.next().to_string()).or_insert(0u32) += 1;
        }
        // 100 calls over 3 keys: 34/33/33 in pool order.
        assert_eq!(counts["a"], 34);
        assert_eq!(counts["b"], 33);
        assert_eq!(counts["c"], 33);
    }

    #[test]
    fn single_key_pool_always_returns_the_same_key() {
        let rotator = pool(&["only"]);
        for _ in 0..5 {
            assert_eq!(rotator.next(), "only");
        }
    }
}
