use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use photocal_core::batch::{build_date_masters, ReductionConfig};
use photocal_core::frame::MasterFrame;

#[derive(Args)]
pub struct MastersArgs {
    /// Observing date directory (YYYY-MM-DD)
    pub date_dir: PathBuf,

    /// Reduction config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Memory budget for frame combination, in GB
    #[arg(long)]
    pub mem_limit: Option<f64>,

    /// Rebuild masters even when cached copies exist
    #[arg(short, long)]
    pub force: bool,
}

/// Build and persist the masters and bad-pixel mask for one date,
/// without calibrating any science frames.
pub fn run(args: &MastersArgs) -> Result<()> {
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

    let (masters, mask) = build_date_masters(&args.date_dir, &config)
        .with_context(|| format!("Failed to build masters for {}", args.date_dir.display()))?;

    print_master("bias", &masters.bias);
    for (exptime, master) in &masters.darks {
        print_master(&format!("dark {exptime}"), master);
    }
    for (filter, master) in &masters.flats {
        print_master(&format!("flat [{filter}]"), master);
    }
    println!(
        "{:<16}{} bad pixel(s)",
        "mask",
        mask.bad_count()
    );

    Ok(())
}

fn print_master(label: &str, master: &MasterFrame) {
    let p = &master.provenance;
    print!(
        "{label:<16}{} x {}  {} frame(s), {}",
        master.width(),
        master.height(),
        p.input_count,
        p.method
    );
    if p.chunks > 1 {
        print!(", {} chunk(s)", p.chunks);
    }
    println!();
}
