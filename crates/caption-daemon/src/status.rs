use std::time::Duration;

use caption_proto::protocol::InstanceStatus;
use tokio::time::Instant;

/// Identical reports closer together than this are dropped.
pub const STATUS_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
struct LastReport {
    status: InstanceStatus,
    message: String,
    at: Instant,
}

/// Remembers the last emitted (status, message) so repeats don't flood
/// collaborators.
#[derive(Debug)]
pub struct StatusReporter {
    last: Option<LastReport>,
    debounce: Duration,
}

impl StatusReporter {
    pub fn new(debounce: Duration) -> Self {
        Self {
            last: None,
            debounce,
        }
    }

    /// Returns the report to publish, or `None` when it repeats the last one
    /// within the debounce window.
    pub fn update(
        &mut self,
        status: InstanceStatus,
        message: impl Into<String>,
        now: Instant,
    ) -> Option<(InstanceStatus, String)> {
        let message = message.into();
        if let Some(last) = &self.last {
            if last.status == status
                && last.message == message
                && now.saturating_duration_since(last.at) < self.debounce
            {
                return None;
            }
        }
        self.last = Some(LastReport {
            status,
            message: message.clone(),
            at: now,
        });
        Some((status, message))
    }

    pub fn current(&self) -> Option<InstanceStatus> {
        self.last.as_ref().map(|l| l.status)
    }

    /// Forget everything; the next update always goes out.
    pub fn release(&mut self) {
        self.last = None;
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new(STATUS_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_repeats_within_window_coalesce() {
        let mut reporter = StatusReporter::default();
        let t0 = Instant::now();

        assert!(reporter.update(InstanceStatus::Ok, "Connected", t0).is_some());
        assert!(reporter
            .update(InstanceStatus::Ok, "Connected", t0 + Duration::from_millis(400))
            .is_none());
        assert!(reporter
            .update(InstanceStatus::Ok, "Connected", t0 + Duration::from_millis(1200))
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_always_pass() {
        let mut reporter = StatusReporter::default();
        let t0 = Instant::now();

        reporter.update(InstanceStatus::Ok, "Connected", t0);
        assert!(reporter
            .update(InstanceStatus::UnknownWarning, "Connected", t0)
            .is_some());
        assert!(reporter
            .update(InstanceStatus::UnknownWarning, "Caption request failed", t0)
            .is_some());
        assert_eq!(reporter.current(), Some(InstanceStatus::UnknownWarning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_forgets_last() {
        let mut reporter = StatusReporter::default();
        let t0 = Instant::now();
        reporter.update(InstanceStatus::BadConfig, "No host", t0);
        reporter.release();
        assert_eq!(reporter.current(), None);
        assert!(reporter.update(InstanceStatus::BadConfig, "No host", t0).is_some());
    }
}
