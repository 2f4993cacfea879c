//! Time-based rotation: one process-wide pin, rotated on an interval

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ProxySelector, SelectionContext};
use crate::models::{ProxyRecord, RotationConfig, Strategy};

#[derive(Debug, Clone)]
struct TimePin {
    key: String,
    pinned_at: Instant,
}

/// Holds one pinned upstream for the whole process and re-picks once the
/// rotation interval has elapsed, or earlier if the pin leaves the pool.
pub struct TimeBasedSelector {
    pin: RwLock<Option<TimePin>>,
    rng: Mutex<StdRng>,
}

impl TimeBasedSelector {
    pub fn new() -> Self {
        Self {
            pin: RwLock::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            pin: RwLock::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pick(&self, eligible: &[Arc<ProxyRecord>]) -> Arc<ProxyRecord> {
        let mut rng = self.rng.lock();
        eligible
            .choose(&mut *rng)
            .cloned()
            .expect("eligible list is never empty")
    }
}

impl Default for TimeBasedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for TimeBasedSelector {
    fn select(
        &self,
        eligible: &[Arc<ProxyRecord>],
        _ctx: &SelectionContext,
        config: &RotationConfig,
    ) -> Arc<ProxyRecord> {
        let interval = Duration::from_secs(config.rotation_interval_seconds);
        let now = Instant::now();

        {
            let pin = self.pin.read();
            if let Some(current) = pin.as_ref() {
                if now.duration_since(current.pinned_at) < interval {
                    if let Some(pinned) = eligible.iter().find(|p| p.key() == current.key) {
                        return Arc::clone(pinned);
                    }
                }
            }
        }

        // Interval elapsed, no pin yet, or the pin is no longer eligible
        let picked = self.pick(eligible);
        *self.pin.write() = Some(TimePin {
            key: picked.key(),
            pinned_at: now,
        });
        picked
    }

    fn strategy(&self) -> Strategy {
        Strategy::TimeBased
    }
}
