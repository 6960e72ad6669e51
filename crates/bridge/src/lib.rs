//! Bridge between the barn gateway line protocol and an MQTT bus.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod mqtt;
pub mod router;
pub mod scheduler;

pub use bridge::{Bridge, BridgeState};
pub use codec::{BarnId, GatewayMessage};
pub use error::{BridgeError, BridgeResult};
