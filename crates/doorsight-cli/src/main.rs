use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use doorsight_core::{build_gallery, FaceEncoder, Gallery, MatchPolicy, MatchResult, OnnxFaceEncoder, DEFAULT_TOLERANCE};
use doorsight_hw::{Camera, Capture, CaptureSettings, LibcameraStill, MotionSensor, SysfsGpioSensor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "doorsight", about = "doorsight presence detector tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the face gallery and list who it recognises
    Gallery {
        #[command(flatten)]
        models: ModelArgs,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Match a photo against the gallery and print the caption
    Identify {
        /// Image to identify
        image: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
        /// Maximum embedding distance for a match
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f32,
        /// Which gallery entry wins when several are within tolerance
        #[arg(long, default_value = "first")]
        policy: MatchPolicy,
    },
    /// Take one still and write it to disk
    Capture {
        /// Output JPEG path
        #[arg(short, long, default_value = "detected.jpg")]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = Backend::Libcamera)]
        backend: Backend,
        /// V4L2 device for the v4l2 backend
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        /// Still capture program for the libcamera backend
        #[arg(long, default_value = "libcamera-still")]
        program: String,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    /// Watch the motion sensor and print every change
    Sensor {
        /// BCM GPIO pin
        #[arg(long, default_value_t = 17)]
        pin: u32,
        /// First sysfs GPIO number of the chip (512 on Raspberry Pi kernels from 6.6)
        #[arg(long, default_value_t = 0)]
        chip_base: u32,
        /// Treat a low line as motion
        #[arg(long)]
        active_low: bool,
        #[arg(long, default_value = doorsight_hw::DEFAULT_GPIO_ROOT)]
        gpio_root: PathBuf,
        /// How long to watch
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        #[arg(long, default_value_t = 100)]
        poll_ms: u64,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Gallery root with one folder of photos per person
    #[arg(long, default_value = "dataset")]
    gallery: PathBuf,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

impl ModelArgs {
    fn load(&self) -> Result<(OnnxFaceEncoder, Gallery)> {
        let model_dir = self.model_dir.clone().unwrap_or_else(doorsight_core::default_model_dir);
        let scrfd = model_dir.join(doorsight_core::SCRFD_MODEL_FILE);
        let arcface = model_dir.join(doorsight_core::ARCFACE_MODEL_FILE);

        let mut encoder = OnnxFaceEncoder::load(&scrfd.to_string_lossy(), &arcface.to_string_lossy())
            .context("failed to load face models")?;
        let gallery = build_gallery(&self.gallery, &mut encoder)
            .with_context(|| format!("failed to build gallery from {}", self.gallery.display()))?;
        Ok((encoder, gallery))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Libcamera,
    V4l2,
}

#[derive(Serialize)]
struct GallerySummary {
    entries: usize,
    labels: Vec<LabelCount>,
}

#[derive(Serialize)]
struct LabelCount {
    label: String,
    photos: usize,
}

/// Entries per label, in gallery order.
fn summarize(gallery: &Gallery) -> GallerySummary {
    let mut labels: Vec<LabelCount> = Vec::new();
    for entry in gallery {
        match labels.last_mut() {
            Some(last) if last.label == entry.label => last.photos += 1,
            _ => labels.push(LabelCount {
                label: entry.label.clone(),
                photos: 1,
            }),
        }
    }
    GallerySummary {
        entries: gallery.len(),
        labels,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gallery { models, json } => {
            let (_, gallery) = models.load()?;
            let summary = summarize(&gallery);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if summary.entries == 0 {
                println!("Gallery is empty: every visitor will be reported as unknown");
            } else {
                println!("{} reference encodings:", summary.entries);
                for item in &summary.labels {
                    println!("  {:<20} {}", item.label, item.photos);
                }
            }
        }
        Commands::Identify {
            image,
            models,
            tolerance,
            policy,
        } => {
            let (mut encoder, gallery) = models.load()?;
            let result = identify(&mut encoder, &gallery, &image, policy, tolerance)?;
            println!("{}", result.caption());
        }
        Commands::Capture {
            output,
            backend,
            device,
            program,
            width,
            height,
        } => {
            let settings = CaptureSettings {
                width,
                height,
                ..CaptureSettings::default()
            };
            let mut capture: Box<dyn Capture> = match backend {
                Backend::Libcamera => Box::new(LibcameraStill::new(program, settings)),
                Backend::V4l2 => Box::new(Camera::open(&device, settings, 4)?),
            };
            let started = Instant::now();
            capture.capture(&output)?;
            println!(
                "Wrote {} in {} ms",
                output.display(),
                started.elapsed().as_millis()
            );
        }
        Commands::Sensor {
            pin,
            chip_base,
            active_low,
            gpio_root,
            seconds,
            poll_ms,
        } => {
            if poll_ms == 0 {
                bail!("--poll-ms must be greater than zero");
            }
            let line = chip_base
                .checked_add(pin)
                .context("--chip-base plus --pin overflows")?;
            let mut sensor = SysfsGpioSensor::open(&gpio_root, line, active_low)?;
            watch_sensor(&mut sensor, Duration::from_secs(seconds), Duration::from_millis(poll_ms))?;
        }
    }

    Ok(())
}

fn identify(
    encoder: &mut impl FaceEncoder,
    gallery: &Gallery,
    image: &Path,
    policy: MatchPolicy,
    tolerance: f32,
) -> Result<MatchResult> {
    let encodings = encoder
        .encode(image)
        .with_context(|| format!("failed to encode {}", image.display()))?;
    let Some(probe) = encodings.first() else {
        eprintln!("No face found in {}", image.display());
        return Ok(MatchResult::Unknown);
    };

    for entry in gallery {
        tracing::debug!(
            label = %entry.label,
            distance = probe.distance(&entry.encoding),
            similarity = probe.similarity(&entry.encoding),
            "candidate"
        );
    }
    Ok(policy.matcher(tolerance).find(probe, gallery))
}

fn watch_sensor(sensor: &mut impl MotionSensor, duration: Duration, poll: Duration) -> Result<()> {
    println!("Watching GPIO for {} s (Ctrl-C to stop)", duration.as_secs());
    let started = Instant::now();
    let mut last = None;
    while started.elapsed() < duration {
        let active = sensor.is_active()?;
        if last != Some(active) {
            println!(
                "{:>8.1}s  {}",
                started.elapsed().as_secs_f32(),
                if active { "motion" } else { "clear" }
            );
            last = Some(active);
        }
        std::thread::sleep(poll);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorsight_core::{EncodeError, Embedding, GalleryEntry};

    fn entry(label: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            label: label.into(),
            encoding: Embedding::new(values),
        }
    }

    struct FixedEncoder(Vec<Embedding>);

    impl FaceEncoder for FixedEncoder {
        fn encode(&mut self, _image_path: &Path) -> Result<Vec<Embedding>, EncodeError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_summarize_groups_consecutive_labels() {
        let gallery: Gallery = vec![
            entry("alice", vec![0.0]),
            entry("alice", vec![0.1]),
            entry("bob", vec![1.0]),
        ]
        .into_iter()
        .collect();

        let summary = summarize(&gallery);
        assert_eq!(summary.entries, 3);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["labels"][0]["label"], "alice");
        assert_eq!(json["labels"][0]["photos"], 2);
        assert_eq!(json["labels"][1]["photos"], 1);
    }

    #[test]
    fn test_identify_policies() {
        let gallery: Gallery = vec![entry("far", vec![0.5, 0.0]), entry("near", vec![0.1, 0.0])]
            .into_iter()
            .collect();
        let mut encoder = FixedEncoder(vec![Embedding::new(vec![0.0, 0.0])]);
        let image = Path::new("visitor.jpg");

        let first = identify(&mut encoder, &gallery, image, MatchPolicy::First, 0.6).unwrap();
        assert_eq!(first.label(), Some("far"));

        let nearest = identify(&mut encoder, &gallery, image, MatchPolicy::Nearest, 0.6).unwrap();
        assert_eq!(nearest.label(), Some("near"));
    }

    #[test]
    fn test_identify_without_face_is_unknown() {
        let gallery: Gallery = vec![entry("alice", vec![0.0])].into_iter().collect();
        let mut encoder = FixedEncoder(Vec::new());
        let result = identify(&mut encoder, &gallery, Path::new("empty.jpg"), MatchPolicy::First, 1.1).unwrap();
        assert_eq!(result, MatchResult::Unknown);
    }

    #[test]
    fn test_cli_parses_identify() {
        let cli = Cli::try_parse_from(["doorsight", "identify", "door.jpg", "--policy", "nearest"]).unwrap();
        match cli.command {
            Commands::Identify { image, policy, tolerance, models } => {
                assert_eq!(image, PathBuf::from("door.jpg"));
                assert_eq!(policy, MatchPolicy::Nearest);
                assert_eq!(tolerance, DEFAULT_TOLERANCE);
                assert_eq!(models.gallery, PathBuf::from("dataset"));
            }
            _ => panic!("expected identify"),
        }
    }
}
