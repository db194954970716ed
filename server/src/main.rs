//! relaycast-server: a headless demo binary that wires the
//! relaycast-core library together end to end — settings store, EPG
//! scrape worker, transcoder session, container mux — and runs a
//! synthetic subscription through it to prove the pipeline compiles
//! and runs as a whole, the way a headless daemon would.
//!
//! There is no HTTP/WebSocket server and no web UI here; those are
//! explicit non-goals carried from the library (see relaycast-core's
//! crate docs). The demo source is synthetic because tuner I/O and
//! broadcast-table parsing are out of scope too.

mod config;

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use parking_lot::Mutex;
use relaycast_core::bus::{Sink, StreamMessage};
use relaycast_core::descriptor::{ComponentDescriptor, StartDescriptor, StreamKind};
use relaycast_core::epg::model::Broadcast;
use relaycast_core::epg::{EpgModel, ScrapeWorker};
use relaycast_core::mux::{ContainerKind, ContainerMux};
use relaycast_core::settings::{get_config, set_config, FileSettingsStore};
use relaycast_core::transcoder::{TranscodeTarget, TranscoderSession};
use relaycast_core::utils::SystemClock;

use crate::config::ServerConfig;

/// relaycast-server: demo driver for the transcoder pipeline.
#[derive(Parser, Debug)]
#[command(name = "relaycast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RELAYCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Data directory for the settings store and the demo mux output.
    #[arg(short = 'd', long, env = "RELAYCAST_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

/// Writes muxed output to a file, lazily opened once the (possibly
/// rewritten) start descriptor arrives downstream of the transcoder
/// session.
struct MuxSink {
    container: ContainerKind,
    output_path: PathBuf,
    mux: Mutex<Option<ContainerMux<File>>>,
    packets_written: AtomicU64,
    mux_errors: AtomicU64,
}

impl MuxSink {
    fn new(container: ContainerKind, output_path: PathBuf) -> Self {
        Self {
            container,
            output_path,
            mux: Mutex::new(None),
            packets_written: AtomicU64::new(0),
            mux_errors: AtomicU64::new(0),
        }
    }
}

impl Sink for MuxSink {
    fn accept(&self, msg: StreamMessage) {
        match msg {
            StreamMessage::Start(start) => match File::create(&self.output_path) {
                Ok(file) => {
                    log::info!(
                        "mux: opened {} with {} component(s) -> {}",
                        describe_container(self.container),
                        start.components.len(),
                        self.output_path.display()
                    );
                    *self.mux.lock() = Some(ContainerMux::new(file, &start, self.container));
                }
                Err(err) => log::error!("mux: failed to open output file: {err}"),
            },
            StreamMessage::Packet(packet) => {
                let mut guard = self.mux.lock();
                if let Some(mux) = guard.as_mut() {
                    match mux.write_packet(&packet) {
                        Ok(_) => {
                            self.packets_written.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            self.mux_errors.fetch_add(1, Ordering::Relaxed);
                            log::warn!("mux: {err}");
                        }
                    }
                }
            }
            StreamMessage::Stop | StreamMessage::Exit => {
                *self.mux.lock() = None;
            }
            _ => {}
        }
    }
}

fn describe_container(container: ContainerKind) -> &'static str {
    match container {
        ContainerKind::Mpegts => "MPEG-TS",
        ContainerKind::Matroska => "Matroska",
        ContainerKind::Webm => "WebM",
    }
}

/// Builds a synthetic subscription: one video and one audio component,
/// a handful of packets, then a clean stop. Stands in for tuner I/O,
/// which is out of scope for this library.
fn synthetic_start_descriptor() -> StartDescriptor {
    let mut desc = StartDescriptor::new();
    let mut video = ComponentDescriptor::new(1, StreamKind::Video, relaycast_core::CodecTag::Mpeg2Video);
    video.width = 1280;
    video.height = 720;
    video.aspect_num = 16;
    video.aspect_den = 9;
    let mut audio = ComponentDescriptor::new(2, StreamKind::Audio, relaycast_core::CodecTag::Ac3);
    audio.channels = 2;
    audio.sri = 3;
    desc.components.push(video);
    desc.components.push(audio);
    desc.pcr_pid = 0x100;
    desc
}

fn run_demo_subscription(session: &Arc<TranscoderSession>) {
    session.accept(StreamMessage::Start(Arc::new(synthetic_start_descriptor())));

    for i in 0..8u8 {
        let mut video_pkt = relaycast_core::Packet::new(1, Bytes::from(vec![i; 4096]));
        video_pkt.pts = i as i64 * 3600;
        session.accept(StreamMessage::Packet(video_pkt));

        let mut audio_pkt = relaycast_core::Packet::new(2, Bytes::from(vec![i; 4096]));
        audio_pkt.channels = 2;
        audio_pkt.sri = 3;
        audio_pkt.pts = i as i64 * 3600;
        session.accept(StreamMessage::Packet(audio_pkt));
    }

    std::thread::sleep(std::time::Duration::from_millis(200));
    session.accept(StreamMessage::Stop);
}

fn run_demo_scrape(data_dir: &std::path::Path) -> Result<()> {
    let store = FileSettingsStore::new(data_dir.join("settings"));
    let scrape_config = get_config(&store);
    log::info!(
        "scrape: loaded config (enabled={}, exec={:?})",
        scrape_config.enabled,
        scrape_config.exec
    );
    set_config(&store, &scrape_config).context("failed to persist scrape config")?;

    let model = Arc::new(EpgModel::new());
    let broadcast_id = model.insert_broadcast(Broadcast {
        channel_name: "Demo Channel".into(),
        title: "Demo Broadcast".into(),
        ..Default::default()
    });

    let worker = ScrapeWorker::spawn(Arc::clone(&model), scrape_config, Arc::new(SystemClock));
    match worker.enqueue_broadcast(broadcast_id) {
        Ok(()) => log::info!("scrape: enqueued demo broadcast {broadcast_id}"),
        Err(err) => log::info!("scrape: enqueue skipped ({err})"),
    }
    std::thread::sleep(std::time::Duration::from_millis(150));
    worker.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("relaycast-server v{}", env!("CARGO_PKG_VERSION"));

    let mut server_config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    server_config.apply_data_dir_override(args.data_dir);

    let data_dir = PathBuf::from(&server_config.core.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let target = TranscodeTarget {
        audio_codec: server_config.core.transcoder.audio_codec.into(),
        video_codec: server_config.core.transcoder.video_codec.into(),
        max_height: server_config.core.transcoder.max_height,
        rate_controlled: server_config.core.transcoder.rate_controlled,
    };
    let container: ContainerKind = server_config.core.container.into();
    let output_path = data_dir.join("demo-output.bin");

    let sink = Arc::new(MuxSink::new(container, output_path.clone()));
    let session = TranscoderSession::new(target, sink.clone());

    log::info!(
        "transcoder: audio={:?} video={:?} max_height={} container={}",
        target.audio_codec,
        target.video_codec,
        target.max_height,
        describe_container(container)
    );

    run_demo_subscription(&session);
    run_demo_scrape(&data_dir)?;

    log::info!(
        "demo complete: {} packet(s) muxed, {} mux error(s), output at {}",
        sink.packets_written.load(Ordering::Relaxed),
        sink.mux_errors.load(Ordering::Relaxed),
        output_path.display()
    );

    Ok(())
}
