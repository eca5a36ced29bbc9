//! TCP bootstrap: accept one client at a time and dispatch on its stream mode

use std::future::Future;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::capture::{FrameSource, SyntheticSource};
use crate::consent::ConsentGate;
use crate::encoder::{CodecError, PassthroughCodec, SampleCodec, VideoFormat};
use crate::error::{Result, StreamError};
use crate::pipeline::{
    transfer_calibration, PipelineController, SensorCalibration, SessionSummary, StreamMode,
    StreamSession,
};
use crate::pose::{PoseMatrix, StaticPoseSource};
use crate::transport::SocketTransmitter;
use crate::{Config, EncoderBackend, SensorConfig, ServerConfig, SourceKind, CONFIG};

/// Serve clients until Ctrl-C.
///
/// Each connection gets a fresh configuration snapshot from [`CONFIG`].
pub async fn run(consent: Arc<ConsentGate>) -> Result<()> {
    let bind = CONFIG.load().server.bind.clone();
    let listener = TcpListener::bind(&bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, consent, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Accept loop that stops when `shutdown` resolves.
///
/// A shutdown during a session hangs up the client socket, which fails the
/// next send and lets the pipeline drain before this returns.
pub async fn serve<F>(listener: TcpListener, consent: Arc<ConsentGate>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        info!("Client connected: {}", peer);

        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        let hangup = stream.try_clone()?;
        let config = CONFIG.load_full();
        let consent = Arc::clone(&consent);

        let session = tokio::task::spawn_blocking(move || handle_connection(stream, config, consent));
        tokio::pin!(session);

        let (outcome, stopping) = tokio::select! {
            outcome = &mut session => (outcome, false),
            _ = &mut shutdown => {
                info!("Shutdown requested, closing client {}", peer);
                if let Err(e) = hangup.shutdown(Shutdown::Both) {
                    debug!("Client {} already gone: {}", peer, e);
                }
                ((&mut session).await, true)
            }
        };

        match outcome {
            Ok(Ok(summary)) => info!("Client {} done: {:?}", peer, summary.exit),
            Ok(Err(e)) => warn!("Client {} rejected: {}", peer, e),
            Err(e) => error!("Session task failed: {}", e),
        }
        if stopping {
            return Ok(());
        }
    }
}

/// Run one connection on a dedicated, optionally pinned, acquisition thread.
pub fn handle_connection(
    stream: TcpStream,
    config: Arc<Config>,
    consent: Arc<ConsentGate>,
) -> Result<SessionSummary> {
    let core = config.pipeline.acquisition_core;
    let acquisition = thread::Builder::new()
        .name("hermes-acquisition".into())
        .spawn(move || {
            if let Some(core) = core {
                pin_to_core(core);
            }
            serve_connection(stream, &config, &consent)
        })?;

    acquisition
        .join()
        .map_err(|_| StreamError::Io(io::Error::other("acquisition thread panicked")))?
}

/// Consent, mode byte, then either the streaming session or the calibration dump.
pub fn serve_connection(
    stream: TcpStream,
    config: &Config,
    consent: &ConsentGate,
) -> Result<SessionSummary> {
    let mut source = build_source(&config.sensor)?;
    serve_connection_with(stream, config, consent, &mut source)
}

/// [`serve_connection`] over a caller-provided frame source.
///
/// The source is opened only once the client's format request is accepted.
pub fn serve_connection_with<S: FrameSource + ?Sized>(
    stream: TcpStream,
    config: &Config,
    consent: &ConsentGate,
    source: &mut S,
) -> Result<SessionSummary> {
    consent.require()?;
    configure_socket(&stream, &config.server)?;

    let mut reader = stream.try_clone()?;
    let mut mode = [0u8; 1];
    reader.read_exact(&mut mode)?;
    let mode = StreamMode::from_wire(mode[0]).ok_or(StreamError::UnknownMode(mode[0]))?;
    info!("Client selected {:?}", mode);

    let Some(layout) = mode.layout() else {
        let sensor = &config.sensor;
        let calibration = SensorCalibration::compute(
            &sensor.camera,
            sensor.width,
            sensor.height,
            PoseMatrix(sensor.extrinsics),
        )
        .map_err(StreamError::Calibration)?;
        let mut writer = stream;
        return transfer_calibration(&mut writer, &calibration);
    };

    let session = StreamSession::new(reader, SocketTransmitter::new(stream, layout), mode);
    let controller = PipelineController::new(config.sensor.clone(), config.encoder.clone());
    let pose = StaticPoseSource(PoseMatrix(config.pose.world_from_device));
    let backend = config.encoder.backend;

    controller.run(
        session,
        source,
        |format| build_codec(backend, format),
        Some(&pose),
    )
}

fn configure_socket(stream: &TcpStream, config: &ServerConfig) -> io::Result<()> {
    stream.set_nodelay(config.nodelay)?;
    if config.write_timeout_ms > 0 {
        stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;
    }
    Ok(())
}

/// Frame source described by the sensor configuration. No device is touched until `open`.
pub fn build_source(sensor: &SensorConfig) -> Result<Box<dyn FrameSource>> {
    match sensor.source {
        SourceKind::Synthetic => {
            let mut source =
                SyntheticSource::new(sensor.width, sensor.height, sensor.fps, sensor.tick_frequency)
                    .paced(true);
            if let Some(limit) = sensor.frame_limit {
                source = source.with_limit(limit);
            }
            Ok(Box::new(source))
        }
        #[cfg(feature = "v4l2-capture")]
        SourceKind::V4l2 => Ok(Box::new(crate::capture::V4l2Source::new(sensor.clone()))),
        #[cfg(not(feature = "v4l2-capture"))]
        SourceKind::V4l2 => Err(StreamError::Source(crate::capture::AcquireError::Fatal(format!(
            "{} requested but built without v4l2-capture",
            sensor.device
        )))),
    }
}

pub fn build_codec(
    backend: EncoderBackend,
    format: &VideoFormat,
) -> std::result::Result<Box<dyn SampleCodec>, CodecError> {
    match backend {
        EncoderBackend::Passthrough => Ok(Box::new(PassthroughCodec)),
        #[cfg(feature = "gstreamer-encoder")]
        EncoderBackend::Gstreamer => Ok(Box::new(crate::encoder::GstH26xCodec::new(format)?)),
        #[cfg(not(feature = "gstreamer-encoder"))]
        EncoderBackend::Gstreamer => Err(CodecError::Unsupported(format!(
            "{:?} requested but built without gstreamer-encoder",
            format.profile
        ))),
    }
}

fn pin_to_core(id: usize) {
    let core = core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .find(|core| core.id == id);

    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            debug!("Acquisition thread pinned to core {}", id)
        }
        _ => warn!("Could not pin acquisition thread to core {}", id),
    }
}
