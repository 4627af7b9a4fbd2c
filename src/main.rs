use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use futures_util::StreamExt;
use log::{info, warn};
use peercall::calls::media::PeerSessionFactory;
use peercall::calls::media::loopback::{LoopbackDevices, LoopbackPeerFactory};
use peercall::store::InMemorySignalingStore;
use peercall::types::Identity;
use peercall::{CallConfig, CallEnvironment, CallManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// This is a demo of a call between two in-process users over loopback media.
//
// Usage:
//   cargo run                              # Audio call, hang up after 2s
//   cargo run -- --video                   # Video call with a camera switch
//   cargo run -- --video --hold-ms 10000   # Stay connected for 10s
//   cargo run -- --config call.json        # Load CallConfig from JSON
//   cargo run -- --webrtc                  # Real peer connections over localhost

#[derive(Parser, Debug)]
#[command(about = "Loopback call between two in-process users")]
struct Args {
    /// Place a video call instead of an audio call.
    #[arg(long)]
    video: bool,

    /// How long to stay connected before hanging up.
    #[arg(long, default_value_t = 2000)]
    hold_ms: u64,

    /// JSON file with call settings.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Negotiate real WebRTC peer connections instead of loopback sessions.
    #[cfg(feature = "webrtc")]
    #[arg(long)]
    webrtc: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Utc::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            CallConfig::from_json(&json).context("parsing call config")?
        }
        None => CallConfig::default(),
    };

    let store = Arc::new(InMemorySignalingStore::new());
    let peers = peer_factory(&args)?;
    let environment = |cameras: usize| CallEnvironment {
        store: store.clone(),
        media: Arc::new(LoopbackDevices::with_cameras(cameras)),
        peers: peers.clone(),
    };

    let alice = CallManager::new(
        Identity::new("alice", "Alice"),
        environment(2),
        config.clone(),
    );
    let bob = CallManager::new(Identity::new("bob", "Bob"), environment(1), config);

    let mut ringing = bob.incoming_calls().await?;
    let outgoing = alice.start(bob.local_identity().clone(), args.video)?;

    let invitation = ringing.next().await.context("Bob's inbox feed closed")?;
    info!(
        "Bob is being called by {} ({})",
        invitation.caller_display_name,
        if invitation.is_video { "video" } else { "audio" }
    );
    let incoming = bob.accept(invitation)?;

    let connected = |view: &peercall::CallView| {
        view.session.status.is_active() || view.session.status.is_ended()
    };
    outgoing.wait_until(connected).await?;
    incoming.wait_until(connected).await?;
    if !outgoing.status().is_active() {
        warn!("Call did not connect: {:?}", outgoing.status());
    }

    if args.video {
        match outgoing.switch_camera().await {
            Ok(()) => info!("Alice switched camera"),
            Err(e) => warn!("Alice could not switch camera: {}", e),
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(args.hold_ms)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, hanging up"),
    }

    let alice_view = outgoing.end().await;
    let bob_view = incoming
        .wait_until(|view| view.session.status.is_ended())
        .await?;
    info!("Alice: {:?}", alice_view.session.status);
    info!("Bob: {:?}", bob_view.session.status);
    info!("Keys left in the store: {:?}", store.live_keys());
    Ok(())
}

#[cfg(feature = "webrtc")]
fn peer_factory(args: &Args) -> anyhow::Result<Arc<dyn PeerSessionFactory>> {
    if args.webrtc {
        let factory = peercall::calls::media::WebRtcPeerFactory::new()
            .context("Failed to set up WebRTC")?;
        return Ok(Arc::new(factory));
    }
    Ok(Arc::new(LoopbackPeerFactory::new()))
}

#[cfg(not(feature = "webrtc"))]
fn peer_factory(_args: &Args) -> anyhow::Result<Arc<dyn PeerSessionFactory>> {
    Ok(Arc::new(LoopbackPeerFactory::new()))
}
