pub mod core;
pub mod http;
pub mod link;
pub mod log_relay;
pub mod socket;
pub mod status;

use caption_proto::protocol::InstanceStatus;

/// What the SessionCore tells everyone listening.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The rendered caption window changed.
    CaptionsUpdated(String),
    StatusUpdated {
        status: InstanceStatus,
        message: String,
    },
    /// A WARN/ERROR log line, already formatted.
    Log(String),
}
