//! On-block rotation: hold one pin until the gateway reports a block

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

use super::{ProxySelector, SelectionContext};
use crate::models::{ProxyRecord, RotationConfig, Strategy};

/// Keeps returning the same upstream until `invalidate_pin` is called (block
/// detected) or the pin drops out of the eligible set.
pub struct OnBlockSelector {
    pinned: RwLock<Option<String>>,
    rng: Mutex<StdRng>,
}

impl OnBlockSelector {
    pub fn new() -> Self {
        Self {
            pinned: RwLock::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            pinned: RwLock::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Clear the pin; the next selection re-picks
    pub fn invalidate_pin(&self) {
        *self.pinned.write() = None;
    }

    fn pick(&self, eligible: &[Arc<ProxyRecord>]) -> Arc<ProxyRecord> {
        let mut rng = self.rng.lock();
        eligible
            .choose(&mut *rng)
            .cloned()
            .expect("eligible list is never empty")
    }
}

impl Default for OnBlockSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for OnBlockSelector {
    fn select(
        &self,
        eligible: &[Arc<ProxyRecord>],
        _ctx: &SelectionContext,
        _config: &RotationConfig,
    ) -> Arc<ProxyRecord> {
        {
            let pinned = self.pinned.read();
            if let Some(key) = pinned.as_ref() {
                if let Some(current) = eligible.iter().find(|p| &p.key() == key) {
                    return Arc::clone(current);
                }
            }
        }

        let picked = self.pick(eligible);
        *self.pinned.write() = Some(picked.key());
        picked
    }

    fn strategy(&self) -> Strategy {
        Strategy::OnBlock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::test_support::record;

    fn eligible(records: Vec<ProxyRecord>) -> Vec<Arc<ProxyRecord>> {
        records.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_pin_survives_across_requests() {
        let selector = OnBlockSelector::with_seed(9);
        let list = eligible(vec![
            record("10.0.0.1", 8080),
            record("10.0.0.2", 8080),
            record("10.0.0.3", 8080),
        ]);

        let first = selector.select(&list, &SelectionContext::default(), &RotationConfig::default());
        for _ in 0..20 {
            let again =
                selector.select(&list, &SelectionContext::default(), &RotationConfig::default());
            assert_eq!(again.key(), first.key());
        }
    }

    #[test]
    fn test_invalidate_pin_forces_repick() {
        let selector = OnBlockSelector::with_seed(9);
        let list = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);

        let first = selector.select(&list, &SelectionContext::default(), &RotationConfig::default());
        selector.invalidate_pin();

        // The blocked upstream is excluded on the retry
        let survivors: Vec<Arc<ProxyRecord>> = list
            .iter()
            .filter(|p| p.key() != first.key())
            .cloned()
            .collect();
        let next =
            selector.select(&survivors, &SelectionContext::default(), &RotationConfig::default());
        assert_ne!(next.key(), first.key());

        // The replacement becomes the new pin
        let again = selector.select(&list, &SelectionContext::default(), &RotationConfig::default());
        assert_eq!(again.key(), next.key());
    }

    #[test]
    fn test_dead_pin_repicks_without_invalidate() {
        let selector = OnBlockSelector::with_seed(9);
        let list = eligible(vec![record("10.0.0.1", 8080), record("10.0.0.2", 8080)]);

        let first = selector.select(&list, &SelectionContext::default(), &RotationConfig::default());

        // Pin vanished from the healthy set (e.g. a probe marked it dead)
        let survivors: Vec<Arc<ProxyRecord>> = list
            .iter()
            .filter(|p| p.key() != first.key())
            .cloned()
            .collect();
        let next =
            selector.select(&survivors, &SelectionContext::default(), &RotationConfig::default());
        assert_ne!(next.key(), first.key());
    }
}
