mod source;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camstream::rtmp::{PushConfig, RtmpConnector, SessionKey, SessionRegistry};
use camstream::stream::{FrameObserver, LocalStreamRegistry, StreamRegistry};
use camstream::{Result, Server, ServerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use source::AnnexBSource;

#[derive(Parser)]
#[command(
    name = "camstream",
    about = "Serve an H.264 stream over RTSP and optionally push it over RTMP"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Annex B H.264 file replayed as channel 0
    #[arg(long)]
    h264: PathBuf,

    /// Replay frame rate
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Push the stream to this RTMP endpoint (rtmp://host[:port]/app/stream)
    #[arg(long)]
    rtmp_url: Option<String>,

    /// RTSP session inactivity timeout in seconds
    #[arg(long, default_value_t = 60)]
    session_timeout: u32,

    /// Host advertised in SDP instead of the local address
    #[arg(long)]
    public_host: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "camstream failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let source = AnnexBSource::open(&args.h264)?;
    let registry = Arc::new(LocalStreamRegistry::new());
    registry.add_channel(0, 0, source.media_head(args.fps));

    let config = ServerConfig {
        public_host: args.public_host,
        session_timeout_secs: args.session_timeout,
        ..ServerConfig::default()
    };
    let mut server = Server::with_config(&args.bind, registry.clone(), config);
    server.start()?;

    let push = match &args.rtmp_url {
        Some(url) => Some(start_push(&registry, url)?),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    let replay = source::spawn_replay(source, registry.clone(), args.fps, running.clone())?;

    if let Some(addr) = server.local_addr() {
        println!("RTSP server on {}, press Enter to stop", stream_url(addr, 0));
    }
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    running.store(false, Ordering::SeqCst);
    if replay.join().is_err() {
        tracing::warn!("replay thread panicked");
    }
    if let Some(push) = push {
        push.clear();
    }
    server.stop()
}

/// Playback URL of a channel; `/streamN` serves channel N-1.
fn stream_url(addr: SocketAddr, channel: u32) -> String {
    format!("rtsp://{addr}/stream{}", channel + 1)
}

fn start_push(registry: &LocalStreamRegistry, url: &str) -> Result<Arc<SessionRegistry>> {
    let push = Arc::new(SessionRegistry::new(
        Arc::new(RtmpConnector),
        PushConfig::default(),
    ));
    push.create(SessionKey::new(0, 0, url))?;

    if let Some(bus) = registry.get_stream(0, 0) {
        bus.register(push.clone() as Arc<dyn FrameObserver>);
    }
    tracing::info!(url, "RTMP push enabled");
    Ok(push)
}
