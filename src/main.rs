// Example runner for the `shape_vision` library. Builds a synthetic depth scene
// (a flat wall with one object in front of it), learns the wall as background,
// then classifies the object and writes the overlay to disk.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use shape_vision::{
    DepthFrame, DepthSample, FramePipeline, LensModel, OutputMode, PipelineConfig, PipelineOutput,
    ProjectorConfig,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SceneShape {
    Rectangle,
    Triangle,
    Circle,
}

#[derive(Debug, Parser)]
#[command(name = "shape_vision", about = "Detect shapes in a synthetic depth scene")]
struct Args {
    /// Object placed in front of the wall.
    #[arg(long, value_enum, default_value_t = SceneShape::Rectangle)]
    shape: SceneShape,
    /// Object size in pixels (side length or diameter).
    #[arg(long, default_value_t = 60)]
    size: u32,
    /// Wall distance in meters.
    #[arg(long, default_value_t = 1.0)]
    wall_depth: f32,
    /// Object distance in meters.
    #[arg(long, default_value_t = 0.8)]
    object_depth: f32,
    #[arg(long, default_value_t = 224)]
    width: u32,
    #[arg(long, default_value_t = 172)]
    height: u32,
    /// JSON file overriding pipeline defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON lens calibration (`fx fy cx cy k1 k2 k3 p1 p2`). Without it no undistortion is applied.
    #[arg(long)]
    lens: Option<PathBuf>,
    /// Where to write the overlay PNG.
    #[arg(long, short, default_value = "overlay.png")]
    output: PathBuf,
    /// Print raw shape reports as JSON instead of only logging them.
    #[arg(long)]
    json: bool,
    /// Attach projector coordinates to the JSON reports.
    #[arg(long)]
    projector: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let lens = args.lens.as_deref().map(load_lens).transpose()?;

    let mut pipeline = FramePipeline::new(args.width, args.height, config.clone(), lens)?;
    if args.projector {
        pipeline = pipeline.with_projector(ProjectorConfig::default());
    }
    let control = pipeline.control();

    let wall = DepthFrame::filled(args.width, args.height, DepthSample::new(args.wall_depth, 1, 400));
    control.capture_background();
    for _ in 0..config.background_frames {
        pipeline.process_frame(&wall)?;
    }
    info!(state = ?control.background_state(), "Background learned.");

    let scene = synthetic_scene(&args);

    control.set_mode(OutputMode::RawShapes);
    if let PipelineOutput::RawShapes(reports) = pipeline.process_frame(&scene)? {
        for report in &reports {
            info!(
                kind = ?report.shape_type,
                valid = report.is_valid,
                cx = report.centroid.0,
                cy = report.centroid.1,
                area = report.area,
                "Shape detected."
            );
        }
        if args.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    control.set_mode(OutputMode::Overlay);
    if let PipelineOutput::Overlay(image) = pipeline.process_frame(&scene)? {
        image
            .to_rgb()
            .save(&args.output)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!(path = %args.output.display(), "Overlay saved.");
    }
    Ok(())
}

fn load_lens(path: &Path) -> Result<LensModel> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let raw: LensModel = serde_json::from_str(&text).context("invalid lens calibration")?;
    // Run the values through the constructor so unusable intrinsics are rejected.
    Ok(LensModel::new((raw.fx, raw.fy), (raw.cx, raw.cy), [raw.k1, raw.k2, raw.k3], (raw.p1, raw.p2))?)
}

fn synthetic_scene(args: &Args) -> DepthFrame {
    let mut frame = DepthFrame::filled(args.width, args.height, DepthSample::new(args.wall_depth, 1, 400));
    let (cx, cy) = (args.width as f64 / 2.0, args.height as f64 / 2.0);
    let half = args.size as f64 / 2.0;
    let object = DepthSample::new(args.object_depth, 1, 900);

    for index in 0..frame.samples().len() {
        let (x, y) = frame.coords_of(index);
        let (dx, dy) = (x as f64 - cx, y as f64 - cy);
        let inside = match args.shape {
            SceneShape::Rectangle => dx.abs() <= half && dy.abs() <= half,
            SceneShape::Circle => dx * dx + dy * dy <= half * half,
            // Apex up, base at the bottom of the bounding square.
            SceneShape::Triangle => dy <= half && dy >= -half && dx.abs() <= (dy + half) / 2.0,
        };
        if inside {
            frame.samples_mut()[index] = object;
        }
    }
    frame
}
