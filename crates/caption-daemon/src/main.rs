use caption_daemon::core::{SessionCore, SessionEvent};
use caption_daemon::log_relay::LogRelay;
use caption_daemon::{http, socket, BroadcastMessage};
use caption_proto::config::Config;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so the log relay can feed it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = caption_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(LogRelay::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,caption_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: every input funnels into SessionCore
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);

    let core = SessionCore::new(
        config.encoder.session(),
        broadcast_tx.clone(),
        event_tx.clone(),
    );
    let state_manager = core.state_manager();

    let _socket_handle = socket::start_server(
        config.api.bind_address.clone(),
        config.api.socket_port,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.api.http_enabled {
        let _http_handle = http::start_server(
            config.api.bind_address.clone(),
            config.api.http_port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(SessionEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, running event loop");
    core.run(event_rx).await
}
