//! fisheye-calib CLI: calibrate from frames, rectify images, rescale artifacts.

use clap::{Args, Parser, Subcommand};
use fisheye_calib::core::{CalibrationArtifact, Resolution};
use fisheye_calib::detect::orient_frame;
use fisheye_calib::undistort::Rectifier;
use fisheye_calib::CalibrateConfig;
use image::{DynamicImage, ImageReader};
use std::{fs, path::PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fisheye-calib")]
#[command(about = "Fisheye camera calibration from checkerboard frames, and frame rectification")]
#[command(version)]
struct Cli {
    /// Log debug details.
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate from a directory of checkerboard frames.
    Calibrate(CalibrateArgs),

    /// Rectify images with a stored calibration.
    Undistort(UndistortArgs),

    /// Rescale a stored calibration to another resolution.
    Scale(ScaleArgs),
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// JSON config; command line flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of frames, played back in file-name order.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Interior corner rows of the board.
    #[arg(long)]
    rows: Option<usize>,

    /// Interior corner columns of the board.
    #[arg(long)]
    cols: Option<usize>,

    /// Number of samples to collect.
    #[arg(long)]
    samples: Option<usize>,

    /// Delay between captures in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Where to write the calibration artifact.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Use frames as captured instead of rotating them by 180°.
    #[arg(long)]
    no_rotate: bool,
}

#[derive(Debug, Clone, Args)]
struct UndistortArgs {
    /// Calibration artifact (JSON).
    #[arg(long)]
    calibration: PathBuf,

    /// Directory for the rectified images.
    #[arg(long)]
    out_dir: PathBuf,

    /// Output focal length relative to the calibrated one.
    #[arg(long, default_value_t = 1.0)]
    projection_scale: f64,

    /// Use images as captured instead of rotating them by 180°.
    #[arg(long)]
    no_rotate: bool,

    /// Images to rectify.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ScaleArgs {
    /// Calibration artifact (JSON).
    #[arg(long)]
    calibration: PathBuf,

    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    /// Where to write the scaled artifact; printed to stdout otherwise.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_log);
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        let _ = tracing_log::LogTracer::init();
        fisheye_calib::core::init_tracing(json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        let _ = fisheye_calib::core::init_with_level(level);
        if json {
            log::warn!("--json-log needs the `tracing` feature; using plain logs");
        }
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::Undistort(args) => run_undistort(args),
        Commands::Scale(args) => run_scale(args),
    }
}

fn run_calibrate(args: CalibrateArgs) -> CliResult<()> {
    let mut cfg = match &args.config {
        Some(path) => CalibrateConfig::load_json(path)?,
        None => CalibrateConfig::default(),
    };
    if let Some(frames) = &args.frames {
        cfg.frames_dir = Some(frames.display().to_string());
    }
    if let Some(rows) = args.rows {
        cfg.target.rows = rows;
    }
    if let Some(cols) = args.cols {
        cfg.target.cols = cols;
    }
    if let Some(samples) = args.samples {
        cfg.accumulator.target_samples = samples;
    }
    if let Some(interval_ms) = args.interval_ms {
        cfg.accumulator.capture_interval_ms = interval_ms;
    }
    if let Some(output) = &args.output {
        cfg.output_path = Some(output.display().to_string());
    }
    if args.no_rotate {
        cfg.rotate_180 = false;
    }

    let mut source = cfg.frame_source()?;
    let mut session = cfg.build_session()?;
    let report = session.run(&mut source)?;

    let artifact = &report.calibration.artifact;
    println!("{}", artifact.to_json()?);
    println!(
        "rms {:.4} px over {} views ({} frames examined); wrote {}",
        artifact.rms(),
        report.calibration.views.len(),
        report.attempts,
        report.output_path.display()
    );
    Ok(())
}

fn run_undistort(args: UndistortArgs) -> CliResult<()> {
    let artifact = CalibrationArtifact::load_json(&args.calibration)?;
    let mut rectifier = Rectifier::new(artifact).with_projection_scale(args.projection_scale);
    fs::create_dir_all(&args.out_dir)?;

    for path in &args.images {
        let frame = orient_frame(ImageReader::open(path)?.decode()?, !args.no_rotate);
        let rectified: DynamicImage = match frame {
            DynamicImage::ImageLuma8(gray) => rectifier.rectify(&gray)?.into(),
            DynamicImage::ImageRgba8(rgba) => rectifier.rectify(&rgba)?.into(),
            other => rectifier.rectify(&other.to_rgb8())?.into(),
        };
        let name = path
            .file_name()
            .ok_or_else(|| format!("not a file: {}", path.display()))?;
        let out = args.out_dir.join(name);
        rectified.save(&out)?;
        log::info!("rectified {} -> {}", path.display(), out.display());
    }
    log::info!(
        "rectified {} images with {} map build(s)",
        args.images.len(),
        rectifier.cache().builds()
    );
    Ok(())
}

fn run_scale(args: ScaleArgs) -> CliResult<()> {
    let artifact = CalibrationArtifact::load_json(&args.calibration)?;
    let scaled = artifact.scaled_to(Resolution::new(args.width, args.height))?;
    match &args.output {
        Some(path) => {
            scaled.write_json(path)?;
            println!("wrote {} ({})", path.display(), scaled.resolution());
        }
        None => println!("{}", scaled.to_json()?),
    }
    Ok(())
}
