use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use photocal_core::io::fits::{CardValue, FitsReader};

#[derive(Args)]
pub struct InfoArgs {
    /// Input FITS file
    pub file: PathBuf,

    /// Dump every header card
    #[arg(long)]
    pub header: bool,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let reader = FitsReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let (height, width) = reader.dimensions();

    println!("File:      {}", args.file.display());
    println!("Size:      {width} x {height}");
    if let Some(bitpix) = reader.header.get_i64("BITPIX") {
        println!("BITPIX:    {bitpix}");
    }
    if let Some(acqtype) = reader.header.get_str("ACQTYPE") {
        println!("Type:      {acqtype}");
    }
    if let Some(exptime) = reader.header.get_f64("EXPTIME") {
        println!("Exposure:  {exptime}s");
    }
    if let Some(filter) = reader.header.get_str("FILTER") {
        println!("Filter:    {filter}");
    }
    if let Some(gain) = reader.header.get_f64("GAIN") {
        println!("Gain:      {gain} e-/ADU");
    }
    if let Some(rdnoise) = reader.header.get_f64("RDNOISE") {
        println!("Readnoise: {rdnoise} e-");
    }

    if args.header {
        println!();
        for card in reader.header.cards() {
            match &card.value {
                CardValue::Str(s) => println!("{:8} = '{s}'", card.key),
                CardValue::Int(i) => println!("{:8} = {i}", card.key),
                CardValue::Real(r) => println!("{:8} = {r}", card.key),
                CardValue::Logical(b) => {
                    println!("{:8} = {}", card.key, if *b { "T" } else { "F" })
                }
                CardValue::Commentary(text) => println!("{:8} {text}", card.key),
            }
        }
    }

    Ok(())
}
