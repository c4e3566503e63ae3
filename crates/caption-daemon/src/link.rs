/// Encoder link: one TCP connection split into a reader and a writer.
///
/// ```text
///   TcpConnector::open()
///         │
///         └── link task (one per connection attempt, tagged with a generation)
///               ├── connect           → LinkEvent::Connected(LinkHandle) | Error
///               ├── writer            ← WriteRequest via mpsc, replies via oneshot, then Drain
///               └── reader            → Data(bytes), Drain once the chunk is handed over, End | Error
/// ```
///
/// Aborting the link task drops both halves, which closes the socket.
use caption_proto::encoder::SEND_TIMEOUT;
use caption_proto::error::CaptionError;
use caption_proto::session::Session;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::SessionEvent;

/// Socket happenings, in the order the supervisor sees them.
#[derive(Debug)]
pub enum LinkEvent {
    Connected(LinkHandle),
    Data(Vec<u8>),
    /// Nothing left to write and the last read chunk has been delivered.
    Drain,
    /// Remote closed the stream.
    End,
    Error(String),
    /// The caption request written after connecting was not delivered.
    RequestFailed(String),
}

#[derive(Debug)]
pub struct WriteRequest {
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Result<(), CaptionError>>,
}

/// Cloneable handle to the writer half of a live link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl LinkHandle {
    /// A handle plus the receiving end its writes land on.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WriteRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), CaptionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest {
                payload: payload.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| CaptionError::LinkClosed)?;

        tokio::time::timeout(SEND_TIMEOUT, reply_rx)
            .await
            .map_err(|_| CaptionError::SendFailed("timed out".to_string()))?
            .map_err(|_| CaptionError::LinkClosed)?
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Starts connection attempts.  The supervisor owns the returned task and
/// aborts it to tear the link down.
pub trait Connector: Send {
    fn open(
        &self,
        generation: u64,
        session: &Session,
        events: mpsc::Sender<SessionEvent>,
    ) -> tokio::task::JoinHandle<()>;
}

pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(
        &self,
        generation: u64,
        session: &Session,
        events: mpsc::Sender<SessionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let host = session.host.clone();
        let port = session.port;
        tokio::spawn(run_link(generation, host, port, events))
    }
}

async fn emit(events: &mpsc::Sender<SessionEvent>, generation: u64, event: LinkEvent) {
    // Receiver gone means the supervisor is shutting down.
    let _ = events.send(SessionEvent::Link { generation, event }).await;
}

async fn run_link(generation: u64, host: String, port: u16, events: mpsc::Sender<SessionEvent>) {
    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(e) => {
            let err = CaptionError::Connect { host, port, source: e };
            emit(&events, generation, LinkEvent::Error(err.to_string())).await;
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("link {}: set_nodelay failed: {}", generation, e);
    }

    let (read_half, write_half) = stream.into_split();
    let (handle, write_rx) = LinkHandle::channel(16);
    emit(&events, generation, LinkEvent::Connected(handle)).await;

    tokio::select! {
        _ = reader_task(read_half, generation, events.clone()) => {}
        _ = writer_task(write_half, write_rx, generation, events.clone()) => {}
    }
    debug!("link {}: task exiting", generation);
}

async fn reader_task(
    mut reader: OwnedReadHalf,
    generation: u64,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("link {}: remote closed", generation);
                emit(&events, generation, LinkEvent::End).await;
                break;
            }
            Ok(n) => {
                emit(&events, generation, LinkEvent::Data(buf[..n].to_vec())).await;
                emit(&events, generation, LinkEvent::Drain).await;
            }
            Err(e) => {
                warn!("link {}: read error: {}", generation, e);
                emit(&events, generation, LinkEvent::Error(e.to_string())).await;
                break;
            }
        }
    }
}

async fn writer_task(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<WriteRequest>,
    generation: u64,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(req) = rx.recv().await {
        let result = match writer.write_all(&req.payload).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                let _ = req.reply.send(Ok(()));
                emit(&events, generation, LinkEvent::Drain).await;
            }
            Err(e) => {
                warn!("link {}: write error: {}", generation, e);
                let _ = req.reply.send(Err(CaptionError::SendFailed(e.to_string())));
                emit(&events, generation, LinkEvent::Error(e.to_string())).await;
                break;
            }
        }
    }
    // All handles dropped: keep the reader alive until the link is torn down.
    std::future::pending::<()>().await;
}
