//! Per-message routing decisions, in both directions.

use crate::codec::GatewayMessage;

pub const KEEP_ALIVE: &str = "keep_alive";
pub const LIGHT_READING: &str = "light";
pub const LIGHTS: &str = "lights";
pub const IRRIGATION: &str = "irrigation";

/// What to do with a message that arrived from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Heartbeat; goes nowhere.
    Suppress,
    /// Publish to the bus (when one is configured).
    Relay,
    /// Publish, and feed the lighting threshold rule.
    RelayAndSchedule,
}

pub fn route(msg: &GatewayMessage) -> Route {
    match msg.topic.as_str() {
        KEEP_ALIVE => Route::Suppress,
        LIGHT_READING => Route::RelayAndSchedule,
        _ => Route::Relay,
    }
}

/// Only actuator topics may be driven from the bus.
pub fn is_bus_command(msg: &GatewayMessage) -> bool {
    matches!(msg.topic.as_str(), LIGHTS | IRRIGATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BarnId;

    fn msg(topic: &str) -> GatewayMessage {
        GatewayMessage::new(BarnId::Barn(1), topic, "x")
    }

    #[test]
    fn keep_alive_is_suppressed() {
        assert_eq!(route(&msg("keep_alive")), Route::Suppress);
    }

    #[test]
    fn light_reading_relays_and_schedules() {
        assert_eq!(route(&msg("light")), Route::RelayAndSchedule);
    }

    #[test]
    fn other_topics_relay() {
        for topic in ["lights", "irrigation", "ack_irrigation", "temperature"] {
            assert_eq!(route(&msg(topic)), Route::Relay, "{topic}");
        }
    }

    #[test]
    fn bus_commands_are_lights_and_irrigation_only() {
        assert!(is_bus_command(&msg("lights")));
        assert!(is_bus_command(&msg("irrigation")));
        assert!(!is_bus_command(&msg("light")));
        assert!(!is_bus_command(&msg("keep_alive")));
        assert!(!is_bus_command(&msg("ack_irrigation")));
    }
}
