//! Wellkeeper — host entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedPump     LogEventSink   VolumeLogSink   SystemClock  │
//! │  (ActuatorPort)    (EventSink)    (EventSink)     (ClockPort)  │
//! │  FileImageSource   ScheduleInbox  DirStore                     │
//! │  (ImageSourcePort)                (ConfigPort, StoragePort)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (domain logic)                 │    │
//! │  │  Estimator · FeedbackController · WellRegistry         │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (delegate-driven) · request server (rpc::io_task)   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Subcommands: `estimate` one image, `fit` a calibration curve from a
//! labeled set, `evaluate` a curve against a labeled set, `serve`
//! newline-delimited JSON requests on stdin.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueHint};
use log::{info, warn};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use wellkeeper::adapters::image_source::{FileImageSource, list_images, load_rgb};
use wellkeeper::adapters::log_sink::LogEventSink;
use wellkeeper::adapters::sim_actuator::SimulatedPump;
use wellkeeper::adapters::store::{
    DirStore, curve_from_json, curve_to_json, load_curve as load_stored_curve, save_curve,
};
use wellkeeper::adapters::time::SystemClock;
use wellkeeper::adapters::volume_log::VolumeLogSink;
use wellkeeper::app::ports::{ConfigError, ConfigPort};
use wellkeeper::app::service::AppService;
use wellkeeper::calibration::label::volume_from_label;
use wellkeeper::calibration::report::EvaluationReport;
use wellkeeper::calibration::{CalibrationCurve, CalibrationFitter, REFERENCE_RIG};
use wellkeeper::config::SystemConfig;
use wellkeeper::error::Error;
use wellkeeper::rpc::io_task::{ServeOptions, serve};
use wellkeeper::scheduler::ScheduleInbox;
use wellkeeper::vision::{Side, VolumeEstimate, VolumeEstimator};

#[derive(Parser)]
#[command(author, version, about = "Camera-based volume control for culture wells")]
struct Cli {
    /// System configuration (JSON); defaults to the reference rig values
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Calibration curve (JSON); overrides the stored curve
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    curve: Option<PathBuf>,

    /// Persistent store for the configuration and per-rig curves
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    store: Option<PathBuf>,

    /// Rig whose curve is loaded from, or fitted into, the store
    #[arg(long, global = true, default_value = REFERENCE_RIG)]
    rig: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate the volume in one image
    Estimate(EstimateArgs),

    /// Fit a calibration curve from a directory of labeled images
    Fit(FitArgs),

    /// Report estimator accuracy on a directory of labeled images
    Evaluate(EvaluateArgs),

    /// Serve newline-delimited JSON requests on stdin
    Serve(ServeArgs),
}

#[derive(Args)]
struct EstimateArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    image: PathBuf,

    /// Tube to read (LEFT or RIGHT); both when omitted
    #[arg(long, value_parser = parse_side)]
    side: Option<Side>,
}

#[derive(Args)]
struct FitArgs {
    #[arg(value_hint = ValueHint::DirPath)]
    dir: PathBuf,

    /// Where to write the curve; stdout when omitted
    #[arg(long, value_hint = ValueHint::FilePath)]
    out: Option<PathBuf>,

    /// Write the curve even if it fails continuity or monotonicity checks
    #[arg(long)]
    allow_defects: bool,
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(value_hint = ValueHint::DirPath)]
    dir: PathBuf,
}

#[derive(Args)]
struct ServeArgs {
    /// Directory image references are resolved against
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    images: PathBuf,

    /// Directory for per-well volume logs; disabled when omitted
    #[arg(long, value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,

    /// Concurrent request workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Replenish every registered well at this interval (seconds)
    #[arg(long)]
    feed_interval: Option<u32>,

    /// Simulated duration of each pump operation (milliseconds)
    #[arg(long, default_value_t = 0)]
    pump_delay_ms: u64,
}

fn parse_side(s: &str) -> Result<Side, String> {
    s.parse().map_err(|()| format!("'{s}' is not LEFT or RIGHT"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries responses; logs go to stderr.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    info!("wellkeeper v{}", env!("CARGO_PKG_VERSION"));

    let mut store = match &cli.store {
        Some(dir) => Some(DirStore::open(dir).with_context(|| format!("opening store {}", dir.display()))?),
        None => None,
    };
    let config = load_config(cli.config.as_deref(), store.as_ref())?;
    let curve = load_curve(cli.curve.as_deref(), store.as_ref(), &cli.rig)?;

    match cli.command {
        Command::Estimate(args) => estimate(config, curve, &args),
        Command::Fit(args) => fit(&config, &cli.rig, store.as_mut(), &args),
        Command::Evaluate(args) => evaluate(config, curve, &args),
        Command::Serve(args) => run_server(config, curve, &args),
    }
}

/// An explicit file wins over the store; the store falls back to the
/// reference defaults.
fn load_config(path: Option<&Path>, store: Option<&DirStore>) -> Result<SystemConfig> {
    let Some(path) = path else {
        return match store {
            Some(store) => {
                let config = store.load().context("loading stored config")?;
                config.validate().context("validating stored config")?;
                Ok(config)
            }
            None => {
                info!("Config: reference defaults");
                Ok(SystemConfig::default())
            }
        };
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: SystemConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    info!("Config loaded from {}", path.display());
    Ok(config)
}

fn load_curve(path: Option<&Path>, store: Option<&DirStore>, rig: &str) -> Result<CalibrationCurve> {
    let Some(path) = path else {
        if let Some(store) = store {
            match load_stored_curve(store, rig) {
                Ok(curve) => {
                    info!("Curve '{}' v{} loaded from the store", curve.rig_id, curve.format_version);
                    return Ok(curve);
                }
                Err(ConfigError::NotFound) => info!("Curve: no stored curve for rig '{rig}'"),
                Err(e) => return Err(e).with_context(|| format!("loading stored curve for rig '{rig}'")),
            }
        }
        info!("Curve: reference rig");
        return Ok(CalibrationCurve::reference());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let curve = curve_from_json(&text).with_context(|| format!("loading curve {}", path.display()))?;
    info!(
        "Curve '{}' v{} loaded from {}",
        curve.rig_id,
        curve.format_version,
        path.display()
    );
    Ok(curve)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ── estimate ──────────────────────────────────────────────────

fn estimate(config: SystemConfig, curve: CalibrationCurve, args: &EstimateArgs) -> Result<()> {
    let estimator = VolumeEstimator::new(config.estimator, curve);
    let img = load_rgb(&args.image)?;
    let sides = match args.side {
        Some(side) => vec![side],
        None => Side::ALL.to_vec(),
    };
    for side in sides {
        let estimate = estimator.estimate(&img, side).map_err(Error::from)?;
        let line = serde_json::json!({ "side": side, "estimate": estimate });
        println!("{line}");
    }
    Ok(())
}

// ── fit ───────────────────────────────────────────────────────

fn fit(config: &SystemConfig, rig: &str, store: Option<&mut DirStore>, args: &FitArgs) -> Result<()> {
    let paths = list_images(&args.dir).with_context(|| format!("listing {}", args.dir.display()))?;
    if paths.is_empty() {
        bail!("no images in {}", args.dir.display());
    }
    let mut images = Vec::with_capacity(paths.len());
    for path in &paths {
        images.push((file_name(path), load_rgb(path)?));
    }
    info!("fit: {} labeled images from {}", images.len(), args.dir.display());

    let fitter = CalibrationFitter::new(config.calibration.clone(), rig.to_owned());
    let fitted = fitter
        .fit_images(
            &config.estimator,
            images.iter().map(|(name, img)| (name.as_str(), img)),
        )
        .map_err(Error::from)?;
    info!(
        "fit: cone {} / cylinder {} samples, {} at the breakpoint",
        fitted.cone_samples, fitted.cylinder_samples, fitted.breakpoint_samples
    );

    let tolerance = config.calibration.continuity_tolerance_ul;
    let curve = if args.allow_defects {
        for defect in fitted.validate(tolerance) {
            warn!("fit: curve defect: {}", defect);
        }
        fitted.curve
    } else {
        fitted.into_validated(tolerance).map_err(Error::from)?
    };

    if let Some(store) = store {
        save_curve(store, &curve).context("saving curve to the store")?;
    }
    let json = curve_to_json(&curve)?;
    match &args.out {
        Some(out) => {
            fs::write(out, json + "\n").with_context(|| format!("writing {}", out.display()))?;
            info!("fit: curve written to {}", out.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ── evaluate ──────────────────────────────────────────────────

fn evaluate(config: SystemConfig, curve: CalibrationCurve, args: &EvaluateArgs) -> Result<()> {
    let estimator = VolumeEstimator::new(config.estimator, curve);
    let paths = list_images(&args.dir).with_context(|| format!("listing {}", args.dir.display()))?;

    let mut samples = Vec::new();
    let mut rejected = 0usize;
    for path in &paths {
        let name = file_name(path);
        let truth = volume_from_label(&name).map_err(Error::from)?;
        let img = load_rgb(path)?;
        for side in Side::ALL {
            match estimator.estimate(&img, side).map_err(Error::from)? {
                VolumeEstimate::Measured { volume_ul, .. } => samples.push((side, truth, volume_ul)),
                VolumeEstimate::Rejected { reason } => {
                    warn!("evaluate: {} {} rejected: {}", name, side, reason);
                    rejected += 1;
                }
            }
        }
    }

    let report = EvaluationReport::from_samples(&samples);
    for (label, r) in [("LEFT", &report.left), ("RIGHT", &report.right), ("ALL", &report.overall)] {
        match r {
            Some(r) => info!("evaluate: {label}: {r}"),
            None => info!("evaluate: {label}: no samples"),
        }
    }
    if rejected > 0 {
        warn!("evaluate: {} reading(s) rejected by the quality gate", rejected);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── serve ─────────────────────────────────────────────────────

fn run_server(config: SystemConfig, curve: CalibrationCurve, args: &ServeArgs) -> Result<()> {
    let inbox = ScheduleInbox::new();
    let opts = ServeOptions {
        workers: args.workers,
        tick: Duration::from_millis(u64::from(config.follow_up.tick_ms)),
        feed_interval_secs: args.feed_interval,
    };
    let service = AppService::new(config, curve, SystemClock::new(), &inbox)?;

    let volume_log = match &args.log_dir {
        Some(dir) => Some(
            VolumeLogSink::new(dir).with_context(|| format!("creating {}", dir.display()))?,
        ),
        None => None,
    };
    let sink = (LogEventSink::new(), volume_log);
    let hw = SimulatedPump::new(Duration::from_millis(args.pump_delay_ms));
    let images = FileImageSource::new(&args.images);

    serve(
        &service,
        &inbox,
        &hw,
        &sink,
        &images,
        io::stdin(),
        io::stdout().lock(),
        &opts,
    )
    .context("request server")
}
