//! Round-robin rotation over the canonical `ip:port` ordering

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{ProxySelector, SelectionContext};
use crate::models::{ProxyRecord, RotationConfig, Strategy};

/// Cycles through the pool in lexicographic `ip:port` order.
///
/// The cursor is a shared atomic: each selection observes a unique tick, so
/// concurrent requests never collapse onto the same cursor value. When the
/// pool changes mid-cycle the modulo rebalances; duplicate picks across the
/// boundary are acceptable.
pub struct RoundRobinSelector {
    cursor: AtomicU64,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RoundRobinSelector {
    fn select(
        &self,
        eligible: &[Arc<ProxyRecord>],
        _ctx: &SelectionContext,
        _config: &RotationConfig,
    ) -> Arc<ProxyRecord> {
        let mut ordered: Vec<&Arc<ProxyRecord>> = eligible.iter().collect();
        ordered.sort_by(|a, b| a.key().cmp(&b.key()));

        let tick = self.cursor.fetch_add(1, Ordering::Relaxed);
        let idx = (tick % ordered.len() as u64) as usize;

        Arc::clone(ordered[idx])
    }

    fn strategy(&self) -> Strategy {
        Strategy::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::test_support::record;
    use std::collections::HashMap;

    fn eligible(records: Vec<ProxyRecord>) -> Vec<Arc<ProxyRecord>> {
        records.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_cycles_in_key_order() {
        let selector = RoundRobinSelector::new();
        // Deliberately shuffled input; ordering is by ip:port, not list order
        let list = eligible(vec![
            record("10.0.0.3", 8080),
            record("10.0.0.1", 8080),
            record("10.0.0.2", 8080),
        ]);

        let keys: Vec<String> = (0..6)
            .map(|_| {
                selector
                    .select(&list, &SelectionContext::default(), &RotationConfig::default())
                    .key()
            })
            .collect();

        assert_eq!(
            keys,
            vec![
                "10.0.0.1:8080",
                "10.0.0.2:8080",
                "10.0.0.3:8080",
                "10.0.0.1:8080",
                "10.0.0.2:8080",
                "10.0.0.3:8080",
            ]
        );
    }

    #[test]
    fn test_each_proxy_exactly_once_per_cycle() {
        let selector = RoundRobinSelector::new();
        let list = eligible(vec![
            record("10.0.0.1", 8080),
            record("10.0.0.2", 8080),
            record("10.0.0.3", 8080),
            record("10.0.0.4", 8080),
            record("10.0.0.5", 8080),
        ]);

        // Over a stable set of N, every N consecutive calls hit each proxy once
        for _ in 0..4 {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for _ in 0..list.len() {
                let p = selector.select(&list, &SelectionContext::default(), &RotationConfig::default());
                *counts.entry(p.key()).or_default() += 1;
            }
            assert_eq!(counts.len(), list.len());
            assert!(counts.values().all(|&c| c == 1));
        }
    }

    #[test]
    fn test_rebalances_when_pool_shrinks() {
        let selector = RoundRobinSelector::new();
        let full = eligible(vec![
            record("10.0.0.1", 8080),
            record("10.0.0.2", 8080),
            record("10.0.0.3", 8080),
        ]);
        let shrunk = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);

        selector.select(&full, &SelectionContext::default(), &RotationConfig::default());
        // Cursor keeps advancing; selection still lands inside the new set
        for _ in 0..5 {
            let p = selector.select(&shrunk, &SelectionContext::default(), &RotationConfig::default());
            assert!(p.key() == "10.0.0.1:8080" || p.key() == "10.0.0.2:8080");
        }
    }
}
