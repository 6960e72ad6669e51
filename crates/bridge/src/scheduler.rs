//! Autonomous commands: a wall-clock irrigation pulse for the whole
//! installation, and per-barn lighting when a light reading crosses the
//! threshold.
//!
//! The scheduler only decides; the bridge sends whatever it returns.
//!
//! ```text
//! main loop tick ──▶ poll_irrigation(now) ──[interval elapsed]──▶ /-1/irrigation/={duration}
//! /{barn}/light/={level} ──▶ on_light_reading ──[level > threshold]──▶ /{barn}/lights/=on?{minutes}
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::codec::{BarnId, GatewayMessage};
use crate::config::ScheduleConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::router::{IRRIGATION, LIGHTS};

pub struct Scheduler {
    irrigation_interval: Duration,
    irrigation_duration_sec: u64,
    light_threshold: i64,
    light_on_min: u64,
    last_irrigation: Instant,
}

impl Scheduler {
    /// The first irrigation pulse is due one full interval after `now`.
    pub fn new(cfg: &ScheduleConfig, now: Instant) -> Self {
        Self {
            irrigation_interval: Duration::from_secs(cfg.irrigation_interval_sec),
            irrigation_duration_sec: cfg.irrigation_duration_sec,
            light_threshold: cfg.light_threshold,
            light_on_min: cfg.light_on_min,
            last_irrigation: now,
        }
    }

    /// Broadcast irrigation command when the interval has elapsed.
    pub fn poll_irrigation(&mut self, now: Instant) -> Option<GatewayMessage> {
        let since = now.saturating_duration_since(self.last_irrigation);
        if since < self.irrigation_interval {
            return None;
        }
        self.last_irrigation = now;

        info!(
            duration_sec = self.irrigation_duration_sec,
            interval_sec = self.irrigation_interval.as_secs(),
            "scheduler: irrigation pulse due"
        );
        Some(GatewayMessage::new(
            BarnId::Broadcast,
            IRRIGATION,
            self.irrigation_duration_sec.to_string(),
        ))
    }

    /// Lighting command for the reading's barn if the level is above threshold.
    pub fn on_light_reading(&self, reading: &GatewayMessage) -> BridgeResult<Option<GatewayMessage>> {
        let level: i64 = reading.payload.trim().parse().map_err(|_| {
            BridgeError::InvalidSensorValue {
                barn: reading.barn_id.to_string(),
                value: reading.payload.clone(),
            }
        })?;

        if level <= self.light_threshold {
            debug!(barn = %reading.barn_id, level, threshold = self.light_threshold, "light below threshold");
            return Ok(None);
        }

        info!(
            barn = %reading.barn_id,
            level,
            threshold = self.light_threshold,
            on_min = self.light_on_min,
            "scheduler: light above threshold, switching lights on"
        );
        Ok(Some(GatewayMessage::new(
            reading.barn_id,
            LIGHTS,
            format!("on?{}", self.light_on_min),
        )))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> ScheduleConfig {
        ScheduleConfig {
            irrigation_interval_sec: 60,
            irrigation_duration_sec: 5,
            light_threshold: 240,
            light_on_min: 1,
        }
    }

    fn reading(barn: u32, payload: &str) -> GatewayMessage {
        GatewayMessage::new(BarnId::Barn(barn), "light", payload)
    }

    // -- Periodic irrigation -------------------------------------------------

    #[test]
    fn irrigation_not_due_before_interval() {
        let start = Instant::now();
        let mut sched = Scheduler::new(&test_cfg(), start);
        assert_eq!(sched.poll_irrigation(start), None);
        assert_eq!(sched.poll_irrigation(start + Duration::from_secs(59)), None);
    }

    #[test]
    fn irrigation_due_at_interval() {
        let start = Instant::now();
        let mut sched = Scheduler::new(&test_cfg(), start);
        let msg = sched.poll_irrigation(start + Duration::from_secs(60)).unwrap();
        assert_eq!(msg, GatewayMessage::new(BarnId::Broadcast, "irrigation", "5"));
    }

    #[test]
    fn exactly_one_pulse_in_61_seconds() {
        let start = Instant::now();
        let mut sched = Scheduler::new(&test_cfg(), start);

        // Several polls per simulated second, like frames arriving quickly.
        let emitted: Vec<_> = (1..=61 * 4)
            .filter_map(|quarter| {
                sched.poll_irrigation(start + Duration::from_millis(quarter * 250))
            })
            .collect();

        assert_eq!(
            emitted,
            vec![GatewayMessage::new(BarnId::Broadcast, "irrigation", "5")]
        );
    }

    #[test]
    fn irrigation_interval_restarts_from_last_pulse() {
        let start = Instant::now();
        let mut sched = Scheduler::new(&test_cfg(), start);

        // Late poll: pulse fires at t=90, next one is due at t=150, not t=120.
        assert!(sched.poll_irrigation(start + Duration::from_secs(90)).is_some());
        assert!(sched.poll_irrigation(start + Duration::from_secs(120)).is_none());
        assert!(sched.poll_irrigation(start + Duration::from_secs(150)).is_some());
    }

    #[test]
    fn irrigation_ignores_clock_before_start() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut sched = Scheduler::new(&test_cfg(), start);
        assert!(sched.poll_irrigation(Instant::now()).is_none());
    }

    // -- Threshold lighting ---------------------------------------------------

    #[test]
    fn light_above_threshold_turns_lights_on() {
        let sched = Scheduler::new(&test_cfg(), Instant::now());
        let cmd = sched.on_light_reading(&reading(3, "250")).unwrap().unwrap();
        assert_eq!(cmd.to_string(), "/3/lights/=on?1");
    }

    #[test]
    fn light_below_threshold_does_nothing() {
        let sched = Scheduler::new(&test_cfg(), Instant::now());
        assert_eq!(sched.on_light_reading(&reading(3, "200")).unwrap(), None);
    }

    #[test]
    fn light_at_threshold_does_nothing() {
        let sched = Scheduler::new(&test_cfg(), Instant::now());
        assert_eq!(sched.on_light_reading(&reading(3, "240")).unwrap(), None);
    }

    #[test]
    fn light_command_targets_reading_barn() {
        let sched = Scheduler::new(&test_cfg(), Instant::now());
        let cmd = sched.on_light_reading(&reading(8, "255")).unwrap().unwrap();
        assert_eq!(cmd.barn_id, BarnId::Barn(8));
    }

    #[test]
    fn light_on_duration_comes_from_config() {
        let cfg = ScheduleConfig {
            light_on_min: 15,
            ..test_cfg()
        };
        let sched = Scheduler::new(&cfg, Instant::now());
        let cmd = sched.on_light_reading(&reading(1, "241")).unwrap().unwrap();
        assert_eq!(cmd.payload, "on?15");
    }

    #[test]
    fn non_numeric_light_is_invalid_sensor_value() {
        let sched = Scheduler::new(&test_cfg(), Instant::now());
        match sched.on_light_reading(&reading(3, "abc")) {
            Err(BridgeError::InvalidSensorValue { barn, value }) => {
                assert_eq!(barn, "3");
                assert_eq!(value, "abc");
            }
            other => panic!("expected InvalidSensorValue, got {other:?}"),
        }
    }

    #[test]
    fn empty_light_is_invalid_sensor_value() {
        let sched = Scheduler::new(&test_cfg(), Instant::now());
        assert!(sched.on_light_reading(&reading(3, "")).is_err());
    }

    #[test]
    fn invalid_light_does_not_disturb_irrigation() {
        let start = Instant::now();
        let mut sched = Scheduler::new(&test_cfg(), start);
        let _ = sched.on_light_reading(&reading(3, "abc"));
        assert!(sched.poll_irrigation(start + Duration::from_secs(60)).is_some());
    }
}
