//! Generate a development powers-of-tau file (NOT FOR PRODUCTION)
//!
//! `generate_dev_ptau <power> <contributions> <out> [--seed <u64>]`
//!
//! τ, α and β come from a seeded RNG and are therefore public.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{anyhow, bail, Context, Result};
use groth16_setup::ptau::dev::{write_dev_ptau, DevSecrets};
use rand::{rngs::StdRng, SeedableRng};

const MAX_DEV_POWER: u8 = 24;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        bail!("usage: generate_dev_ptau <power> <contributions> <out> [--seed <u64>]");
    }
    let power: u8 = args[1].parse().context("power must be an integer")?;
    if power > MAX_DEV_POWER {
        bail!("dev files are limited to power {MAX_DEV_POWER}");
    }
    let contributions: u16 = args[2].parse().context("contributions must fit in u16")?;
    let out = &args[3];
    let seed: u64 = match args.iter().position(|s| s == "--seed") {
        Some(i) => args
            .get(i + 1)
            .ok_or_else(|| anyhow!("--seed needs a value"))?
            .parse()
            .context("--seed must be a u64")?,
        None => 42,
    };

    eprintln!("WARNING: development source (seed={seed}); the secrets are PUBLIC.");
    eprintln!("Never use this file or anything derived from it in production.");

    let mut rng = StdRng::seed_from_u64(seed);
    let secrets = DevSecrets::sample(&mut rng, power)?;
    let file = File::create(out).with_context(|| format!("creating {out}"))?;
    let mut w = BufWriter::new(file);
    let written = write_dev_ptau(&mut w, power, contributions, &secrets)?;
    w.flush()?;

    println!("wrote {out}: power={power} contributions={contributions} bytes={written}");
    Ok(())
}
