//! The bridge controller: one gateway connection, one optional MQTT session,
//! one cooperative loop.
//!
//! ```text
//! Connected ──[frame / timeout]──▶ Connected
//!     │
//!     └──[any transport error]──▶ Faulted (terminal)
//! ```
//!
//! Each loop iteration runs the irrigation check, waits at most
//! `read_timeout` for one frame, handles it, then drains whatever the MQTT
//! event loop has queued.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{self, GatewayMessage};
use crate::error::{BridgeError, BridgeResult};
use crate::frame::FrameReader;
use crate::mqtt::{MqttSession, Publisher};
use crate::router::{self, Route};
use crate::scheduler::Scheduler;

/// Cap on bus messages handled per iteration so a busy bus cannot starve
/// the gateway read.
const MAX_INBOUND_PER_TICK: usize = 64;

/// How many of our own command relays to remember for echo suppression.
const ECHO_WINDOW: usize = 16;

/// A relay the broker has not echoed back by now never will be (published
/// before the subscription, or a no-local broker).
const ECHO_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connected,
    /// A transport error happened; no more reads or writes.
    Faulted,
}

pub struct Bridge<S, P> {
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    scheduler: Scheduler,
    mqtt: Option<MqttSession<P>>,
    read_timeout: Duration,
    state: BridgeState,
    /// Command-topic messages we relayed to the bus. We subscribe to `/#`, so
    /// each one comes straight back and must not be sent to the gateway again.
    recent_relays: VecDeque<(Instant, String, Vec<u8>)>,
}

impl<S, P> Bridge<S, P>
where
    S: AsyncRead + AsyncWrite,
    P: Publisher,
{
    pub fn new(
        stream: S,
        scheduler: Scheduler,
        mqtt: Option<MqttSession<P>>,
        read_timeout: Duration,
        max_frame_len: usize,
    ) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half, max_frame_len),
            writer,
            scheduler,
            mqtt,
            read_timeout,
            state: BridgeState::Connected,
            recent_relays: VecDeque::with_capacity(ECHO_WINDOW),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Run until `shutdown` resolves (`Ok`) or the transport fails (`Err`).
    ///
    /// `shutdown` is only observed while waiting for a frame, never during a
    /// write, so a stop request cannot leave half a frame on the wire.
    pub async fn run<F>(&mut self, shutdown: F) -> BridgeResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.state == BridgeState::Faulted {
            return Err(BridgeError::Faulted);
        }
        tokio::pin!(shutdown);

        info!(
            read_timeout_ms = self.read_timeout.as_millis() as u64,
            mqtt = self.mqtt.is_some(),
            "bridge loop started"
        );

        loop {
            if let Some(cmd) = self.scheduler.poll_irrigation(Instant::now()) {
                self.send_or_skip(&cmd).await?;
            }

            let read = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, leaving bridge loop");
                    return Ok(());
                }
                read = tokio::time::timeout(self.read_timeout, self.reader.read_frame()) => read,
            };

            match read {
                Ok(Ok(frame)) => self.handle_frame(&frame).await?,
                Ok(Err(e)) if !e.is_fatal() => warn!("{e}; skipping"),
                Ok(Err(e)) => return Err(self.fault(e)),
                Err(_) => trace!("no frame within read timeout"),
            }

            self.drain_mqtt().await?;
        }
    }

    /// Serialize `msg` and write it as one frame. A write failure faults the
    /// bridge; a message that cannot be framed is refused with
    /// `MalformedFrame` and nothing is written.
    pub async fn send_command(&mut self, msg: &GatewayMessage) -> BridgeResult<()> {
        if self.state == BridgeState::Faulted {
            return Err(BridgeError::Faulted);
        }

        let frame = codec::encode_frame(msg)?;
        if let Err(e) = write_frame(&mut self.writer, &frame).await {
            return Err(self.fault(e.into()));
        }

        debug!(frame = %frame.trim_end(), "sent to gateway");
        Ok(())
    }

    /// `send_command` for the loop: only fatal errors stop it.
    async fn send_or_skip(&mut self, msg: &GatewayMessage) -> BridgeResult<()> {
        match self.send_command(msg).await {
            Err(e) if !e.is_fatal() => {
                warn!("{e}; command not sent");
                Ok(())
            }
            other => other,
        }
    }

    /// Handle one frame from the gateway. Only transport errors escape.
    pub async fn handle_frame(&mut self, frame: &[u8]) -> BridgeResult<()> {
        if !frame.starts_with(b"/") {
            if !frame.is_empty() {
                debug!(line = %String::from_utf8_lossy(frame), "ignoring non-message line");
            }
            return Ok(());
        }

        match codec::parse(frame) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                warn!("{e}; skipping");
                Ok(())
            }
        }
    }

    /// Legacy input path: a whole buffered chunk holding several lines.
    pub async fn handle_chunk(&mut self, text: &str) -> BridgeResult<()> {
        for parsed in codec::parse_batch(text) {
            match parsed {
                Ok(msg) => self.dispatch(msg).await?,
                Err(e) => warn!("{e}; skipping"),
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, msg: GatewayMessage) -> BridgeResult<()> {
        match router::route(&msg) {
            Route::Suppress => {
                trace!(barn = %msg.barn_id, "keep-alive");
            }
            Route::Relay => {
                info!(barn = %msg.barn_id, topic = %msg.topic, payload = %msg.payload, "gateway message");
                self.relay(&msg).await;
            }
            Route::RelayAndSchedule => {
                debug!(barn = %msg.barn_id, level = %msg.payload, "light reading");
                self.relay(&msg).await;
                match self.scheduler.on_light_reading(&msg) {
                    Ok(Some(cmd)) => self.send_or_skip(&cmd).await?,
                    Ok(None) => {}
                    Err(e) => warn!("{e}; skipping reading"),
                }
            }
        }
        Ok(())
    }

    /// Best-effort publish; no session means nothing to do.
    async fn relay(&mut self, msg: &GatewayMessage) {
        let Some(session) = &self.mqtt else {
            return;
        };

        let (topic, payload) = codec::to_mqtt(msg);
        let echo = router::is_bus_command(msg).then(|| (topic.clone(), payload.clone()));

        match session.publish(topic.clone(), payload).await {
            Ok(()) => {
                if let Some((topic, payload)) = echo {
                    if self.recent_relays.len() == ECHO_WINDOW {
                        self.recent_relays.pop_front();
                    }
                    self.recent_relays.push_back((Instant::now(), topic, payload));
                }
            }
            Err(e) => error!(%topic, "mqtt publish failed: {e}"),
        }
    }

    async fn drain_mqtt(&mut self) -> BridgeResult<()> {
        for _ in 0..MAX_INBOUND_PER_TICK {
            let Some(inbound) = self.mqtt.as_mut().and_then(MqttSession::try_next) else {
                return Ok(());
            };

            let Some(msg) = codec::from_mqtt(&inbound.topic, &inbound.payload) else {
                debug!(topic = %inbound.topic, "ignoring mqtt message that is not a gateway frame");
                continue;
            };
            if !router::is_bus_command(&msg) {
                trace!(topic = %inbound.topic, "ignoring non-command mqtt topic");
                continue;
            }
            if self.take_echo(&inbound.topic, &inbound.payload, Instant::now()) {
                trace!(topic = %inbound.topic, "ignoring echo of our own relay");
                continue;
            }

            info!(barn = %msg.barn_id, topic = %msg.topic, payload = %msg.payload, "bus command for gateway");
            self.send_or_skip(&msg).await?;
        }
        Ok(())
    }

    fn take_echo(&mut self, topic: &str, payload: &[u8], now: Instant) -> bool {
        while self
            .recent_relays
            .front()
            .is_some_and(|(at, _, _)| now.saturating_duration_since(*at) > ECHO_TTL)
        {
            self.recent_relays.pop_front();
        }

        let pos = self
            .recent_relays
            .iter()
            .position(|(_, t, p)| t == topic && p == payload);
        match pos {
            Some(i) => {
                self.recent_relays.remove(i);
                true
            }
            None => false,
        }
    }

    fn fault(&mut self, err: BridgeError) -> BridgeError {
        self.state = BridgeState::Faulted;
        error!("gateway transport failed: {err}");
        err
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> std::io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

// ===========================================================================
// Tests
// ===========================================================================
