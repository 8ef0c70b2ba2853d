use crate::config::{CaptureBackend, Config};
use crate::controller::{Controller, ControllerError, SystemClock, Timing};
use crate::notifier::{DispatchError, TelegramNotifier};
use crate::pipeline::Pipeline;
use doorsight_core::{build_gallery, EncodeError, GalleryError, OnnxFaceEncoder};
use doorsight_hw::{Camera, Capture, LibcameraStill, SysfsGpioSensor};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] EncodeError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("sensor error: {0}")]
    Sensor(#[from] doorsight_hw::SensorError),
    #[error("camera error: {0}")]
    Camera(#[from] doorsight_hw::CameraError),
    #[error("notifier error: {0}")]
    Notifier(#[from] DispatchError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Spawn the detector on a dedicated OS thread.
///
/// Models, gallery, sensor, camera and notifier are all acquired inside the
/// thread, which then runs the trigger controller until `shutdown` is set or
/// a fatal error occurs. The outcome is delivered on the returned receiver.
pub fn spawn_engine(
    config: Config,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<oneshot::Receiver<Result<(), EngineError>>> {
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("doorsight-controller".into())
        .spawn(move || {
            tracing::info!("controller thread started");
            let result = run_engine(&config, &shutdown);
            if let Err(e) = &result {
                tracing::error!(error = %e, "controller stopped");
            }
            let _ = done_tx.send(result);
            tracing::info!("controller thread exiting");
        })?;

    Ok(done_rx)
}

fn run_engine(config: &Config, shutdown: &AtomicBool) -> Result<(), EngineError> {
    let mut encoder = OnnxFaceEncoder::load(&config.scrfd_model_path(), &config.arcface_model_path())?;

    let gallery = build_gallery(&config.gallery_dir, &mut encoder)?;
    tracing::info!(
        root = %config.gallery_dir.display(),
        entries = gallery.len(),
        labels = ?gallery.labels(),
        "gallery loaded"
    );

    let sensor = SysfsGpioSensor::open(&config.gpio_root, config.sensor_line(), config.sensor_active_low)?;
    let capture = open_capture(config)?;
    let notifier = TelegramNotifier::new(
        &config.telegram_api_base,
        &config.telegram_token,
        &config.telegram_chat_id,
    )?;

    let pipeline = Pipeline::new(
        capture,
        encoder,
        notifier,
        config.match_policy.matcher(config.match_tolerance),
        gallery,
        config.image_path.clone(),
    );
    tracing::info!(
        policy = %config.match_policy,
        tolerance = config.match_tolerance,
        image = %config.image_path.display(),
        "pipeline ready"
    );

    let timing = Timing {
        poll_interval: config.poll_interval(),
        cooldown: config.cooldown(),
    };
    let mut controller = Controller::new(sensor, pipeline, SystemClock, timing, config.error_policy);
    let outcome = controller.run(shutdown);
    tracing::info!(triggers = controller.triggers(), "controller finished");
    Ok(outcome?)
}

fn open_capture(config: &Config) -> Result<Box<dyn Capture>, EngineError> {
    let settings = config.capture_settings();
    match config.capture_backend {
        CaptureBackend::Libcamera => {
            tracing::info!(
                program = %config.libcamera_program,
                width = settings.width,
                height = settings.height,
                "using libcamera still capture"
            );
            Ok(Box::new(LibcameraStill::new(config.libcamera_program.clone(), settings)))
        }
        CaptureBackend::V4l2 => {
            let camera = Camera::open(&config.camera_device, settings, config.warmup_frames)?;
            Ok(Box::new(camera))
        }
    }
}
