use serde::{Deserialize, Serialize};

use crate::config::EncoderConfig;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a local client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    GetState,
    /// Empty the caption window right now.
    ClearCaptions,
    /// Drop the current link and start a fresh connection attempt.
    Reconnect,
    /// Replace the encoder session wholesale.
    Configure { encoder: EncoderConfig },
}

/// Messages sent from the daemon to local clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: CaptionState,
    },
    State {
        data: CaptionState,
    },
    /// The rendered caption window changed.
    Captions {
        text: String,
    },
    Status {
        status: InstanceStatus,
        message: String,
    },
    Log {
        message: String,
    },
}

/// Externally reported health of the encoder session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum InstanceStatus {
    #[default]
    Connecting,
    Ok,
    UnknownWarning,
    UnknownError,
    /// No usable host configured.  Sticks until reconfigured.
    BadConfig,
}

/// Link lifecycle as tracked by the supervisor.
///
/// Transitions:
///   Connecting -> Connected -> RetryPending -> Connecting ...
///   Connected -> Error -> RetryPending
///   any -> BadConfig (empty host)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    RetryPending,
    Error,
    BadConfig,
}

/// Everything collaborators can read.  `rev` is bumped on every change.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CaptionState {
    #[serde(default)]
    pub rev: u64,
    /// Current joined caption lines, the published `captions` variable.
    pub captions: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub status_message: String,
    pub connection: ConnectionState,
    pub host: String,
    pub port: u16,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let msg = Message::Command(Command::Configure {
            encoder: EncoderConfig {
                host: "10.0.0.7".to_string(),
                lines: 3,
                ..EncoderConfig::default()
            },
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Configure { encoder }) => {
                assert_eq!(encoder.host, "10.0.0.7");
                assert_eq!(encoder.lines, 3);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = CaptionState {
            rev: 42,
            captions: "HELLO\nWORLD".to_string(),
            status: InstanceStatus::Ok,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 42);
                assert_eq!(state.captions, "HELLO\nWORLD");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let encoded = Message::Command(Command::ClearCaptions).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }
}
