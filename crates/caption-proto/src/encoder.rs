//! Wire constants for the caption encoder's raw TCP feed.
//!
//! The device speaks an unframed byte stream.  Lines are separated by a
//! three-character marker and a bare `E1` unit reports a device-side fault.
use std::time::Duration;

/// Sent once per connection to start the caption feed.
pub const REQUEST_CAPTIONS: &[u8] = b"\x015 F1 O\r\n";

/// No-op payload written periodically while the link is idle.
pub const KEEP_ALIVE: &[u8] = b" \n";

/// Line terminator inside the caption stream.
pub const LINE_MARKER: &str = "%-p";

/// Complete decoded unit the device sends when it is in an error state.
pub const ERROR_SENTINEL: &str = "E1";

/// Fixed delay between a transport failure and the next connection attempt.
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(60000);

/// Upper bound on a single request/keep-alive write.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);
