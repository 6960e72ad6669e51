//! Barn-side behaviour of the simulated gateway: what it reports and how it
//! reacts to bridge commands.

use std::time::Duration;

use barn_bridge::{BarnId, GatewayMessage};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::sim::LightLevelSim;

pub struct SimGateway {
    barns: Vec<u32>,
    sim: LightLevelSim,
    /// When each barn's timed lamps go off; `None` when no timer is running.
    lamps_until: Vec<Option<Instant>>,
}

impl SimGateway {
    pub fn new(barns: Vec<u32>, sim: LightLevelSim) -> Self {
        debug_assert_eq!(barns.len(), sim.barn_count());
        let lamps_until = vec![None; barns.len()];
        Self {
            barns,
            sim,
            lamps_until,
        }
    }

    /// One light reading per barn, after switching off expired lamp timers.
    pub fn readings(&mut self, now: Instant) -> Vec<GatewayMessage> {
        for (i, until) in self.lamps_until.iter_mut().enumerate() {
            if until.is_some_and(|t| t <= now) {
                *until = None;
                self.sim.set_lamps(i, false);
                info!(barn = self.barns[i], "lamp timer expired, lights off");
            }
        }

        (0..self.barns.len())
            .map(|i| {
                let level = self.sim.sample(i);
                GatewayMessage::new(BarnId::Barn(self.barns[i]), "light", level.to_string())
            })
            .collect()
    }

    pub fn keep_alives(&self) -> Vec<GatewayMessage> {
        self.barns
            .iter()
            .map(|&b| GatewayMessage::new(BarnId::Barn(b), "keep_alive", "1"))
            .collect()
    }

    /// Apply a command from the bridge; returns any replies for the wire.
    pub fn handle_command(&mut self, cmd: &GatewayMessage, now: Instant) -> Vec<GatewayMessage> {
        let targets = self.targets(cmd.barn_id);
        if targets.is_empty() {
            warn!(barn = %cmd.barn_id, "command for unknown barn");
            return Vec::new();
        }

        match cmd.topic.as_str() {
            "lights" => {
                self.set_lights(&targets, &cmd.payload, now);
                Vec::new()
            }
            "irrigation" => match cmd.payload.trim().parse::<u64>() {
                Ok(secs) => targets
                    .iter()
                    .map(|&i| {
                        info!(barn = self.barns[i], secs, "irrigating");
                        GatewayMessage::new(
                            BarnId::Barn(self.barns[i]),
                            "ack_irrigation",
                            format!("time:{secs}"),
                        )
                    })
                    .collect(),
                Err(_) => {
                    warn!(payload = %cmd.payload, "bad irrigation duration");
                    Vec::new()
                }
            },
            other => {
                warn!(topic = other, "unknown command topic");
                Vec::new()
            }
        }
    }

    fn set_lights(&mut self, targets: &[usize], payload: &str, now: Instant) {
        // "on?<minutes>" | "on" | "off"
        let (action, minutes) = match payload.split_once('?') {
            Some((action, arg)) => (action, arg.trim().parse::<u64>().ok()),
            None => (payload, None),
        };

        let (on, until) = match (action, minutes) {
            ("on", Some(m)) => {
                let until = m
                    .checked_mul(60)
                    .and_then(|secs| now.checked_add(Duration::from_secs(secs)));
                if until.is_none() {
                    warn!(payload, "lamp timer out of range");
                    return;
                }
                (true, until)
            }
            ("on", None) => (true, None),
            ("off", _) => (false, None),
            _ => {
                warn!(payload, "unknown lights payload");
                return;
            }
        };

        for &i in targets {
            self.sim.set_lamps(i, on);
            self.lamps_until[i] = until;
            info!(barn = self.barns[i], on, ?minutes, "lights");
        }
    }

    fn targets(&self, barn: BarnId) -> Vec<usize> {
        match barn {
            BarnId::Broadcast => (0..self.barns.len()).collect(),
            BarnId::Barn(n) => self.barns.iter().position(|&b| b == n).into_iter().collect(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
