use crate::core::SessionEvent;
use crate::BroadcastMessage;
use caption_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use caption_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Serve caption/status updates to local clients over length-prefixed JSON.
pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

/// Accept loop on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Bytes read from one client, cut into length-prefixed frames.
#[derive(Default)]
struct Inbox {
    buf: Vec<u8>,
}

impl Inbox {
    /// One read from the client.  Cancel-safe: nothing is buffered until the
    /// read completes.
    async fn fill(&mut self, reader: &mut OwnedReadHalf) -> std::io::Result<usize> {
        let mut tmp = [0u8; 1024];
        let n = reader.read(&mut tmp).await?;
        self.buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    /// Every complete command received so far.  Anything else a client sends
    /// is skipped, malformed frames included.
    fn take_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Some(len) = complete_frame(&self.buf) {
            match Message::decode(&self.buf[..len]) {
                Ok((Message::Command(cmd), _)) => commands.push(cmd),
                Ok(_) => {}
                Err(e) => warn!("Dropping malformed client frame: {}", e),
            }
            self.buf.drain(..len);
        }
        commands
    }
}

fn complete_frame(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let len = 4 + u32::from_be_bytes(header) as usize;
    (buf.len() >= len).then_some(len)
}

/// What a caption client sees for each internal broadcast.
fn relay(msg: BroadcastMessage) -> Broadcast {
    match msg {
        BroadcastMessage::CaptionsUpdated(text) => Broadcast::Captions { text },
        BroadcastMessage::StatusUpdated { status, message } => Broadcast::Status { status, message },
        BroadcastMessage::Log(message) => Broadcast::Log { message },
    }
}

async fn send(writer: &mut OwnedWriteHalf, broadcast: Broadcast) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Hello first, then a State reply after each batch of commands and a
/// relayed broadcast for every caption or status change.
async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<SessionEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut inbox = Inbox::default();

    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: state_manager.get_state().await,
    };
    if send(&mut writer, hello).await.is_err() {
        return;
    }

    loop {
        let outgoing = tokio::select! {
            read = inbox.fill(&mut reader) => match read {
                Ok(0) => {
                    info!("Client {} closed connection", client_id);
                    return;
                }
                Ok(_) => {
                    let commands = inbox.take_commands();
                    if commands.is_empty() {
                        continue;
                    }
                    for cmd in commands {
                        info!("Client {} sent command: {:?}", client_id, cmd);
                        if event_tx.send(SessionEvent::ClientCommand(cmd)).await.is_err() {
                            warn!("SessionEvent channel closed");
                            return;
                        }
                    }
                    Broadcast::State { data: state_manager.get_state().await }
                }
                Err(e) => {
                    error!("Read error from client {}: {}", client_id, e);
                    return;
                }
            },
            msg = broadcast_rx.recv() => match msg {
                Ok(msg) => relay(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client {} missed {} broadcast messages", client_id, n);
                    Broadcast::State { data: state_manager.get_state().await }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };
        if send(&mut writer, outgoing).await.is_err() {
            return;
        }
    }
}
