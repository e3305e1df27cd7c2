use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use photocal_core::batch::{
    calibrate_date_reported, DateReport, DateStatus, ProgressReporter, ReductionConfig,
    ReductionStage,
};
use photocal_core::manifest::DateLayout;
use photocal_core::solver::{CommandSolver, SolveOutcome, WcsSolver};
use tracing::warn;

use crate::summary;

#[derive(Args)]
pub struct RunArgs {
    /// A YYYY-MM-DD date directory, or a directory containing them
    pub path: PathBuf,

    /// Reduction config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Memory budget for frame combination, in GB
    #[arg(long)]
    pub mem_limit: Option<f64>,

    /// Recalibrate dates whose outputs already exist
    #[arg(short, long)]
    pub force: bool,

    /// Detector gain in electrons per ADU (overrides the GAIN header key)
    #[arg(long)]
    pub gain: Option<f32>,

    /// Read noise in electrons (overrides the RDNOISE header key)
    #[arg(long)]
    pub readnoise: Option<f32>,

    /// Sigma threshold for clipped combination of calibration frames
    #[arg(long)]
    pub sigma: Option<f32>,

    /// Sigma multiple for the bad-pixel mask bounds
    #[arg(long)]
    pub mask_sigma: Option<f32>,

    /// Plate-solver binary to run on each calibrated frame
    #[arg(long)]
    pub solver: Option<PathBuf>,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;
    let dates = discover_dates(&args.path)?;

    println!("Photometric Calibration");
    println!("  Dates:      {}", dates.len());
    println!("  Mem limit:  {} GB", config.mem_limit_gb);
    println!(
        "  Combine:    {}\u{3c3} clip, {} iteration(s)",
        config.combine.sigma, config.combine.iterations
    );
    println!("  Mask:       {}\u{3c3}", config.mask_sigma);
    if config.force {
        println!("  Force:      recalibrating existing outputs");
    }
    println!();

    let pb = ProgressBar::new(1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:20} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    let reporter = ConsoleReporter { pb: pb.clone() };

    let solver = args.solver.as_ref().map(CommandSolver::new);

    let mut reports = Vec::with_capacity(dates.len());
    for date_dir in &dates {
        let report = calibrate_date_reported(date_dir, &config, &reporter);
        if let Some(ref solver) = solver {
            solve_outputs(solver, &report, &pb);
        }
        reports.push(report);
    }
    pb.finish_and_clear();

    summary::print_run_summary(&reports);

    let fatal = reports
        .iter()
        .filter(|r| r.status == DateStatus::FatalError)
        .count();
    if fatal > 0 {
        bail!("{fatal} date(s) failed");
    }
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<ReductionConfig> {
    let mut config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid reduction config")?
    } else {
        ReductionConfig::default()
    };

    if let Some(mem_limit) = args.mem_limit {
        config.mem_limit_gb = mem_limit;
    }
    if args.force {
        config.force = true;
    }
    if args.gain.is_some() {
        config.gain = args.gain;
    }
    if args.readnoise.is_some() {
        config.readnoise = args.readnoise;
    }
    if let Some(sigma) = args.sigma {
        config.combine.sigma = sigma;
    }
    if let Some(mask_sigma) = args.mask_sigma {
        config.mask_sigma = mask_sigma;
    }
    Ok(config)
}

/// A single date directory is accepted directly; anything else is
/// treated as an archive root holding date directories.
fn discover_dates(path: &Path) -> Result<Vec<PathBuf>> {
    let name = path.file_name().and_then(|n| n.to_str());
    if name.is_some_and(DateLayout::is_date_name) {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut dates: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(DateLayout::is_date_name)
        })
        .collect();
    dates.sort();

    if dates.is_empty() {
        bail!(
            "no YYYY-MM-DD date directories under {}",
            path.display()
        );
    }
    Ok(dates)
}

fn solve_outputs(solver: &CommandSolver, report: &DateReport, pb: &ProgressBar) {
    if report.outputs.is_empty() {
        return;
    }
    pb.set_message("Plate solving");
    pb.set_position(0);
    pb.set_length(report.outputs.len() as u64);
    for (idx, output) in report.outputs.iter().enumerate() {
        if let SolveOutcome::Failed { detail } = solver.solve(output) {
            warn!(path = %output.display(), detail, "no WCS solution");
        }
        pb.set_position(idx as u64 + 1);
    }
}

struct ConsoleReporter {
    pb: ProgressBar,
}

impl ProgressReporter for ConsoleReporter {
    fn begin_stage(&self, stage: ReductionStage, total_items: Option<usize>) {
        self.pb.set_message(stage.to_string());
        self.pb.set_position(0);
        self.pb.set_length(total_items.unwrap_or(1) as u64);
    }

    fn advance(&self, items_done: usize) {
        self.pb.set_position(items_done as u64);
    }

    fn finish_stage(&self) {
        if let Some(len) = self.pb.length() {
            self.pb.set_position(len);
        }
    }
}
