use serde::{Deserialize, Serialize};
use tracing::debug;

/// Supply and stator current limits, amps and seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentLimitConfig {
    pub enabled: bool,
    /// Current the supply is held at once the limit has tripped.
    pub continuous_limit: f64,
    /// Supply current that starts the trip timer.
    pub threshold: f64,
    /// How long the supply must stay above `threshold` before limiting engages.
    pub threshold_time: f64,
    #[serde(default)]
    pub stator_enabled: bool,
    #[serde(default)]
    pub stator_limit: f64,
}

impl Default for CurrentLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            continuous_limit: 0.0,
            threshold: 0.0,
            threshold_time: 0.0,
            stator_enabled: false,
            stator_limit: 0.0,
        }
    }
}

/// Software current limiter with a timed supply trip.
///
/// Returns an output scale in `[0, 1]` every cycle. A trip only happens after
/// the supply current stays above the threshold for longer than the threshold
/// time so short spikes pass through untouched.
#[derive(Debug, Clone)]
pub struct CurrentLimiter {
    config: CurrentLimitConfig,
    over_threshold_for: f64,
    supply_limiting: bool,
    stator_limiting: bool,
    trips: u32,
}

impl CurrentLimiter {
    pub fn new(config: CurrentLimitConfig) -> Self {
        Self {
            config,
            over_threshold_for: 0.0,
            supply_limiting: false,
            stator_limiting: false,
            trips: 0,
        }
    }

    pub fn update(&mut self, supply_current: f64, stator_current: f64, dt: f64) -> f64 {
        let mut scale = 1.0;
        let supply = supply_current.abs();
        let stator = stator_current.abs();

        if self.config.enabled {
            if supply > self.config.threshold {
                self.over_threshold_for += dt;
            } else {
                self.over_threshold_for = 0.0;
            }

            if !self.supply_limiting && self.over_threshold_for > self.config.threshold_time {
                self.supply_limiting = true;
                self.trips += 1;
                debug!(
                    supply,
                    trips = self.trips,
                    "Supply current limit tripped"
                );
            } else if self.supply_limiting && supply < self.config.continuous_limit {
                self.supply_limiting = false;
            }

            if self.supply_limiting && supply > self.config.continuous_limit {
                scale = self.config.continuous_limit / supply;
            }
        } else {
            self.supply_limiting = false;
            self.over_threshold_for = 0.0;
        }

        self.stator_limiting = self.config.stator_enabled && stator > self.config.stator_limit;
        if self.stator_limiting {
            scale = f64::min(scale, self.config.stator_limit / stator);
        }

        scale
    }

    pub fn is_limiting(&self) -> bool {
        self.supply_limiting || self.stator_limiting
    }

    pub fn trip_count(&self) -> u32 {
        self.trips
    }
}
