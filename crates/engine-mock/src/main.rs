mod config;
mod events;
mod server;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use config::EngineConfig;
use events::EngineEvent;
use server::EngineServer;

#[derive(Parser)]
#[command(name = "simp-engine-mock")]
#[command(about = "Stand-in visualization engine speaking SIMP")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(short, long, default_value_t = simp::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 8)]
    max_clients: usize,

    #[arg(long, default_value = "OpenSpace", help = "Name sent in the CONN reply")]
    name: String,

    #[arg(long, help = "Never answer CONN, to exercise client handshake timeouts")]
    no_handshake: bool,

    #[arg(long, help = "Send every received vis.val back to its client")]
    echo_visibility: bool,

    #[arg(long, help = "Shut down after this many seconds")]
    exit_after: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EngineConfig {
        software_name: args.name,
        max_clients: args.max_clients,
        answer_handshake: !args.no_handshake,
        echo_visibility: args.echo_visibility,
        ..Default::default()
    };

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let mut server = EngineServer::new(&bind_addr, config)
        .with_context(|| format!("failed to listen on {}", bind_addr))?;
    log::info!("Engine mock listening on {}", server.local_addr());

    if let Some(secs) = args.exit_after {
        let running = server.running();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            running.store(false, Ordering::SeqCst);
        });
    }

    server.run(log_event);

    let stats = server.stats();
    log::info!(
        "{} clients with {} entities still open at shutdown",
        stats.client_count,
        stats.entity_count
    );
    log::info!(
        "Engine mock shutting down after {} frames in, {} frames out",
        stats.frames_received,
        stats.frames_sent
    );
    Ok(())
}

fn log_event(event: EngineEvent) {
    match event {
        EngineEvent::ClientConnected {
            client_id,
            addr,
            software,
        } => log::info!("Client {} ({}) connected from {}", client_id, software, addr),
        EngineEvent::ClientDisconnected { client_id, reason } => {
            log::info!("Client {} {}", client_id, reason.as_str())
        }
        EngineEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason)
        }
        EngineEvent::EntityUpdated {
            client_id,
            entity_id,
            display_name,
            keys,
        } => log::info!(
            "Client {} updated {} ({}): {}",
            client_id,
            entity_id,
            display_name,
            keys.join(", ")
        ),
        EngineEvent::EntityRemoved {
            client_id,
            entity_id,
        } => log::info!("Client {} removed {}", client_id, entity_id),
        EngineEvent::Error { message } => log::error!("{}", message),
    }
}
