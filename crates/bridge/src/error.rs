//! Error taxonomy for the bridge core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// A `/`-prefixed frame that does not follow `/{barn}/{topic}/={payload}`.
    #[error("malformed frame {frame:?}: {reason}")]
    MalformedFrame { frame: String, reason: &'static str },

    /// A gateway line ran past the frame size limit and was skipped.
    #[error("frame of {len} bytes exceeds the {limit}-byte limit")]
    FrameTooLong { len: usize, limit: usize },

    /// The gateway closed the connection.
    #[error("gateway connection closed")]
    ConnectionClosed,

    #[error("gateway transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A `light` reading whose payload is not an integer.
    #[error("invalid sensor value {value:?} from barn {barn}")]
    InvalidSensorValue { barn: String, value: String },

    /// The controller already hit a transport error and refuses further I/O.
    #[error("bridge is faulted; restart with a fresh connection")]
    Faulted,
}

impl BridgeError {
    pub(crate) fn malformed(frame: impl Into<String>, reason: &'static str) -> Self {
        BridgeError::MalformedFrame {
            frame: frame.into(),
            reason,
        }
    }

    /// Transport-level failures end the connection; everything else is skippable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionClosed | BridgeError::Transport(_) | BridgeError::Faulted
        )
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
