use crate::protocol::{CaptionState, ConnectionState, InstanceStatus};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly view of the session for collaborators (socket and
/// HTTP servers).  Only the supervisor writes to it.
pub struct StateManager {
    state: Arc<RwLock<CaptionState>>,
}

impl StateManager {
    pub fn new(host: &str, port: u16) -> Self {
        let state = CaptionState {
            rev: 1,
            captions: String::new(),
            status: InstanceStatus::Connecting,
            status_message: "Initialising".to_string(),
            connection: ConnectionState::Connecting,
            host: host.to_string(),
            port,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> CaptionState {
        self.state.read().await.clone()
    }

    pub async fn captions(&self) -> String {
        self.state.read().await.captions.clone()
    }

    pub async fn set_captions(&self, captions: String) {
        let mut state = self.state.write().await;
        state.captions = captions;
        state.rev += 1;
    }

    pub async fn set_status(&self, status: InstanceStatus, message: String) {
        let mut state = self.state.write().await;
        state.status = status;
        state.status_message = message;
        state.rev += 1;
    }

    pub async fn set_connection(&self, connection: ConnectionState) {
        let mut state = self.state.write().await;
        if state.connection != connection {
            state.connection = connection;
            state.rev += 1;
        }
    }

    pub async fn set_target(&self, host: &str, port: u16) {
        let mut state = self.state.write().await;
        state.host = host.to_string();
        state.port = port;
        state.rev += 1;
    }
}
