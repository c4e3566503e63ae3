use std::time::Duration;

use crate::framing::{FrameDecoder, FramingStrategy};
use crate::window::CaptionWindow;

/// One configuration generation for an encoder link.  Never mutated; a
/// reconfiguration builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub host: String,
    pub port: u16,
    /// Window capacity, 1..=10.
    pub lines: usize,
    pub clear_after_interval: bool,
    pub silence_interval: Duration,
    pub framing: FramingStrategy,
    pub keep_alive: bool,
}

impl Session {
    pub fn has_host(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.framing)
    }

    pub fn window(&self) -> CaptionWindow {
        CaptionWindow::new(self.lines, self.framing.render_style())
    }
}
