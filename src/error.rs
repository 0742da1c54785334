use thiserror::Error;

/// Failures while opening the link to the telemetry device.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("device {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures turning a raw response into register values.
///
/// `TruncatedSlot` never escapes `decode_response`: the slot is dropped from
/// its sequence and decoding carries on with the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response of {len} bytes is too short to carry the 9 byte header")]
    ShortFrame { len: usize },

    #[error("register {address}: need {needed} bytes at payload offset {offset}, {available} available")]
    TruncatedSlot {
        address: u16,
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Failures of a single poll cycle. None of them are fatal; the next tick
/// starts over.
#[derive(Error, Debug)]
pub enum PollError {
    /// Socket failure mid-cycle. The session has already been closed and one
    /// reconnect attempted by the time this is returned.
    #[error("transient link failure during {stage}: {reason}")]
    Transient { stage: &'static str, reason: String },

    #[error("session is not connected")]
    NotConnected,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PollError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PollError::Transient { .. })
    }
}

/// Failures talking to the discharge-type classification service.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("cannot read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to classification service at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("classification service returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed classification response: {0}")]
    MalformedResponse(String),

    #[error("classification request failed: {0}")]
    Request(#[from] reqwest::Error),
}
