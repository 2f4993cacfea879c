//! Per-session rotation: sticky bindings keyed by the client session id

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ProxySelector, SelectionContext};
use crate::models::{ProxyRecord, RotationConfig, Strategy};

/// A session's pinned upstream
#[derive(Debug, Clone)]
struct SessionBinding {
    key: String,
    expires_at: Instant,
}

/// Sticky selection per `X-Session-ID`.
///
/// A binding survives while its proxy stays eligible and the TTL has not
/// lapsed; each use refreshes the TTL. `drop_session` removes the binding so
/// the next request with the same id re-picks.
pub struct PerSessionSelector {
    bindings: DashMap<String, SessionBinding>,
    rng: Mutex<StdRng>,
}

impl PerSessionSelector {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            bindings: DashMap::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Remove a session binding
    pub fn drop_session(&self, session_id: &str) {
        self.bindings.remove(session_id);
    }

    /// Number of live bindings (expired entries may linger until touched)
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    fn pick(&self, eligible: &[Arc<ProxyRecord>]) -> Arc<ProxyRecord> {
        let mut rng = self.rng.lock();
        eligible
            .choose(&mut *rng)
            .cloned()
            .expect("eligible list is never empty")
    }
}

impl Default for PerSessionSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for PerSessionSelector {
    fn select(
        &self,
        eligible: &[Arc<ProxyRecord>],
        ctx: &SelectionContext,
        config: &RotationConfig,
    ) -> Arc<ProxyRecord> {
        let ttl = Duration::from_secs(config.session_ttl_seconds);

        let session_id = match &ctx.session_id {
            Some(id) => id,
            // No session id: behave like per-request, nothing to bind
            None => return self.pick(eligible),
        };

        let now = Instant::now();

        if let Some(binding) = self.bindings.get(session_id) {
            if binding.expires_at > now {
                if let Some(bound) = eligible.iter().find(|p| p.key() == binding.key) {
                    let bound = Arc::clone(bound);
                    drop(binding);
                    // Refresh the TTL on use
                    self.bindings.insert(
                        session_id.clone(),
                        SessionBinding {
                            key: bound.key(),
                            expires_at: now + ttl,
                        },
                    );
                    return bound;
                }
            }
        }

        // Expired, unbound, or the bound proxy is no longer eligible
        let picked = self.pick(eligible);
        self.bindings.insert(
            session_id.clone(),
            SessionBinding {
                key: picked.key(),
                expires_at: now + ttl,
            },
        );
        picked
    }

    fn strategy(&self) -> Strategy {
        Strategy::PerSession
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::test_support::record;

    fn eligible(records: Vec<ProxyRecord>) -> Vec<Arc<ProxyRecord>> {
        records.into_iter().map(Arc::new).collect()
    }

    fn ctx_for(session: &str) -> SelectionContext {
        SelectionContext {
            session_id: Some(session.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_session_sticks_to_one_proxy() {
        let selector = PerSessionSelector::with_seed(3);
        let list = eligible(vec![
            record("10.0.0.1", 8080),
            record("10.0.0.2", 8080),
            record("10.0.0.3", 8080),
        ]);
        let config = RotationConfig::default();

        let first = selector.select(&list, &ctx_for("s1"), &config);
        for _ in 0..10 {
            let again = selector.select(&list, &ctx_for("s1"), &config);
            assert_eq!(again.key(), first.key());
        }
    }

    #[test]
    fn test_distinct_sessions_get_independent_bindings() {
        let selector = PerSessionSelector::with_seed(3);
        let list = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);
        let config = RotationConfig::default();

        let s1 = selector.select(&list, &ctx_for("s1"), &config);
        let s2 = selector.select(&list, &ctx_for("s2"), &config);

        assert_eq!(selector.binding_count(), 2);
        // Both bindings keep their own pick
        assert_eq!(selector.select(&list, &ctx_for("s1"), &config).key(), s1.key());
        assert_eq!(selector.select(&list, &ctx_for("s2"), &config).key(), s2.key());
    }

    #[test]
    fn test_drop_session_forces_a_different_pick() {
        let selector = PerSessionSelector::with_seed(3);
        let list = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);
        let config = RotationConfig::default();

        let first = selector.select(&list, &ctx_for("s1"), &config);
        selector.drop_session("s1");

        // The blocked proxy is gone from the eligible list after the drop
        let survivors: Vec<Arc<ProxyRecord>> = list
            .iter()
            .filter(|p| p.key() != first.key())
            .cloned()
            .collect();
        let next = selector.select(&survivors, &ctx_for("s1"), &config);
        assert_ne!(next.key(), first.key());
    }

    #[test]
    fn test_binding_ignored_when_proxy_leaves_the_pool() {
        let selector = PerSessionSelector::with_seed(3);
        let list = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);
        let config = RotationConfig::default();

        let first = selector.select(&list, &ctx_for("s1"), &config);

        // Same session, but the bound proxy is no longer eligible
        let survivors: Vec<Arc<ProxyRecord>> = list
            .iter()
            .filter(|p| p.key() != first.key())
            .cloned()
            .collect();
        let next = selector.select(&survivors, &ctx_for("s1"), &config);
        assert_ne!(next.key(), first.key());

        // And the new binding sticks
        let again = selector.select(&survivors, &ctx_for("s1"), &config);
        assert_eq!(again.key(), next.key());
    }

    #[test]
    fn test_expired_binding_is_replaced() {
        let selector = PerSessionSelector::with_seed(3);
        let list = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);
        let config = RotationConfig {
            session_ttl_seconds: 0,
            ..RotationConfig::default()
        };

        // TTL of zero: every lookup sees an expired binding and re-picks
        selector.select(&list, &ctx_for("s1"), &config);
        for _ in 0..5 {
            // No panic, and a binding is always rewritten
            selector.select(&list, &ctx_for("s1"), &config);
        }
        assert_eq!(selector.binding_count(), 1);
    }

    #[test]
    fn test_no_session_id_picks_without_binding() {
        let selector = PerSessionSelector::with_seed(3);
        let list = eligible(vec![record("10.0.0.1", 8080)]);
        let config = RotationConfig::default();

        let p = selector.select(&list, &SelectionContext::default(), &config);
        assert_eq!(p.key(), "10.0.0.1:8080");
        assert_eq!(selector.binding_count(), 0);
    }
}
