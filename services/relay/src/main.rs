use anyhow::{Context, Result};
use photo_relay::config::{Config, GalleryConfig, LogFormat};
use photo_relay::identity;
use photo_relay::{Gallery, Inbox, PermissionState, ReceiverEvent, ReceiverIdentity, Transport};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Command line mode
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Id,
    Send { source: &'a str, receiver_id: &'a str },
    Receive { receiver_id: Option<&'a str> },
    Both { source: &'a str },
}

impl<'a> Command<'a> {
    /// Parse `argv`; `None` means print usage
    fn parse(args: &'a [String]) -> Option<Self> {
        let arg = |i: usize| args.get(i).map(String::as_str);

        match (arg(1)?, arg(2), arg(3)) {
            ("id", _, _) => Some(Command::Id),
            ("send", Some(source), Some(receiver_id)) => Some(Command::Send { source, receiver_id }),
            ("receive", receiver_id, _) => Some(Command::Receive { receiver_id }),
            ("both", Some(source), _) => Some(Command::Both { source }),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Id => "id",
            Command::Send { .. } => "send",
            Command::Receive { .. } => "receive",
            Command::Both { .. } => "both",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let Some(command) = Command::parse(&args) else {
        print_usage();
        return Ok(());
    };

    if command == Command::Id {
        println!("{}", identity::generate());
        return Ok(());
    }

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, config.service.log_format);

    info!(service = %config.service.name, mode = command.name(), "Starting photo relay");

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    match command {
        Command::Send { source, receiver_id } => run_send(&config, source, receiver_id).await?,
        Command::Receive { receiver_id } => run_receive(&config, receiver_id).await?,
        Command::Both { source } => run_both(&config, source).await?,
        Command::Id => {}
    }

    Ok(())
}

/// Send one image to a receiver
async fn run_send(config: &Config, source: &str, receiver_id: &str) -> Result<()> {
    let transport = Transport::from_config(config)
        .await
        .context("Failed to initialize transport")?;

    let sent = transport.client().send_file(source, receiver_id).await?;
    println!("Image sent to {} ({})", sent.receiver_id, sent.record.url);

    Ok(())
}

/// Listen as a receiver until Ctrl+C or until the subscription ends
async fn run_receive(config: &Config, receiver_id: Option<&str>) -> Result<()> {
    let transport = Transport::from_config(config)
        .await
        .context("Failed to initialize transport")?;

    let receiver_id = match receiver_id {
        Some(id) => ReceiverIdentity::parse(id)?,
        None => identity::generate(),
    };
    println!("Your receiver ID: {}", receiver_id);

    let (mut session, events) = transport.session();
    session.start_listening(&receiver_id).await?;

    receive_until_shutdown(events, &config.gallery).await;

    session.stop_listening().await;
    info!("Receiver stopped");

    Ok(())
}

/// Run a receiver and send it one image through the same backend.
///
/// The only way to exercise the offline backend, whose database lives in
/// process memory.
async fn run_both(config: &Config, source: &str) -> Result<()> {
    let transport = Transport::from_config(config)
        .await
        .context("Failed to initialize transport")?;

    let receiver_id = identity::generate();
    let (mut session, events) = transport.session();
    session.start_listening(&receiver_id).await?;

    let receive_handle = {
        let gallery = config.gallery.clone();
        tokio::spawn(async move { receive_until_shutdown(events, &gallery).await })
    };

    match transport.client().send_file(source, receiver_id.as_str()).await {
        Ok(sent) => info!(record_key = %sent.record_key, "Sent image to self"),
        Err(e) => error!(error = %e, "Failed to send image"),
    }

    info!("Press Ctrl+C to stop the receiver...");
    receive_handle.await?;

    session.stop_listening().await;

    Ok(())
}

async fn receive_until_shutdown(
    mut events: mpsc::UnboundedReceiver<ReceiverEvent>,
    gallery_config: &GalleryConfig,
) {
    let mut inbox = Inbox::new();
    let mut gallery = Gallery::new(gallery_config);

    if gallery_config.auto_save && gallery.request_permission().await != PermissionState::Granted {
        warn!("Gallery permission denied; received images will not be saved");
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            event = events.recv() => {
                let incoming = match event {
                    Some(ReceiverEvent::Image(incoming)) => incoming,
                    Some(ReceiverEvent::Closed { receiver_id, reason }) => {
                        println!("Stopped receiving images for {}: {}", receiver_id, reason);
                        break;
                    }
                    None => break,
                };

                let Some(received) = inbox.record(&incoming).cloned() else {
                    continue;
                };
                println!("New image from {}: {}", incoming.sender, received.uri);

                if gallery.permission() != PermissionState::Granted {
                    continue;
                }

                match gallery.save(&received).await {
                    Ok(path) => {
                        inbox.mark_saved(received.id);
                        println!("Saved to {}", path.display());
                    }
                    Err(e) => error!(error = %e, "Failed to save image"),
                }
            }
        }
    }

    info!(received = inbox.len(), "Receive loop finished");
}

fn print_usage() {
    println!("Usage: photo-relay <command>");
    println!();
    println!("Commands:");
    println!("  id                          - Print a fresh receiver ID");
    println!("  send <image> <receiver-id>  - Send an image file to a receiver");
    println!("  receive [receiver-id]       - Listen for images (new ID when omitted)");
    println!("  both <image>                - Listen and send an image to yourself");
    println!();
    println!("Environment variables:");
    println!("  RELAY__TRANSPORT__BACKEND   - hosted (default) or offline");
    println!("  RELAY__STORAGE__BUCKET      - Bucket receiving uploaded images");
    println!("  RELAY__DATABASE__URL        - Realtime database root URL");
    println!("  RELAY__DATABASE__AUTH_TOKEN - Database auth token");
    println!("  RELAY__GALLERY__AUTO_SAVE   - Save every received image");
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let layer = match format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
