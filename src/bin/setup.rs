//! Ceremony CLI
//!
//! ```text
//! setup p2n --ptau <src.ptau> --r1cs <circuit.json> --out <phase2.bin>
//!           --keys <pedersen.bin> [--bases <bases.bin>] [--raw]
//! setup pedersen-contribute --in <pedersen.bin> --out <next.bin> [--raw]
//! setup pedersen-verify --prev <pedersen.bin> --next <next.bin>
//! setup pedersen-verify --in <pedersen.bin>
//! setup offsets --power <p> [--contributions <c>]
//! ```
//!
//! Buffering and chunking come from `SETUP_BUFFER_SIZE` and
//! `SETUP_CHUNK_POINTS`; `RUST_LOG` controls verbosity.

#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use groth16_setup::{
    derive_commitment_bases,
    encoding::{Encoder, PointEncoding},
    phase2::derive_phase2_file,
    ptau::{LagrangeG1, SourceLayout, MAX_SOURCE_POWER},
    ConstraintSystem, PedersenKeys, SetupConfig,
};
use rand::rngs::OsRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: setup <p2n|pedersen-contribute|pedersen-verify|offsets> [flags]";

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn required(args: &[String], key: &str) -> Result<PathBuf> {
    parse_flag(args, key).map(PathBuf::from).ok_or_else(|| anyhow!("missing {key}\n{USAGE}"))
}

/// Run `f`, deleting every path in `outputs` if it fails.
fn or_cleanup<T>(outputs: &[&Path], f: impl FnOnce() -> Result<T>) -> Result<T> {
    let res = f();
    if res.is_err() {
        for p in outputs {
            if p.exists() {
                if let Err(e) = fs::remove_file(p) {
                    warn!(path = %p.display(), error = %e, "could not remove partial output");
                }
            }
        }
    }
    res
}

fn config(args: &[String]) -> Result<SetupConfig> {
    let mut cfg = SetupConfig::from_env();
    if has_flag(args, "--raw") {
        cfg.encoding = PointEncoding::Raw;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn load_circuit(path: &Path) -> Result<ConstraintSystem> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let cs = ConstraintSystem::from_json_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(cs)
}

fn p2n(args: &[String]) -> Result<()> {
    let cfg = config(args)?;
    let ptau = required(args, "--ptau")?;
    let r1cs = required(args, "--r1cs")?;
    let out = required(args, "--out")?;
    let keys_path = required(args, "--keys")?;
    let bases_path = parse_flag(args, "--bases").map(PathBuf::from);

    let cs = load_circuit(&r1cs)?;
    info!(
        constraints = cs.nb_constraints(),
        wires = cs.nb_wires(),
        commitments = cs.commitments.len(),
        "circuit loaded"
    );

    let mut outputs = vec![out.as_path(), keys_path.as_path()];
    if let Some(p) = &bases_path {
        outputs.push(p.as_path());
    }
    or_cleanup(&outputs, || {
        let summary = derive_phase2_file(&cs, &ptau, &out, &cfg)
            .with_context(|| format!("deriving phase-2 parameters from {}", ptau.display()))?;
        info!(path = %out.display(), bytes = summary.bytes_written, domain = summary.header.domain, "phase-2 written");

        let bases = derive_commitment_bases(&cs, &mut OsRng).context("deriving commitment bases")?;
        if let Some(path) = &bases_path {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let mut enc = Encoder::with_encoding(BufWriter::with_capacity(cfg.buffer_size, file), cfg.encoding);
            enc.write_points(&bases.vk_k)?;
            enc.write_points(&bases.pk_k)?;
            enc.get_mut().flush()?;
            info!(path = %path.display(), bytes = enc.bytes_written(), "verifying/proving bases written");
        }

        let keys = PedersenKeys::initialize(bases.commitment_bases, &mut OsRng).context("initializing commitment keys")?;
        let bytes = keys.save(&keys_path, &cfg).with_context(|| format!("writing {}", keys_path.display()))?;
        let digest = keys.digest()?;
        info!(path = %keys_path.display(), bytes, digest = %hex::encode(digest), "commitment keys written");
        Ok(())
    })
}

fn pedersen_contribute(args: &[String]) -> Result<()> {
    let cfg = config(args)?;
    let input = required(args, "--in")?;
    let out = required(args, "--out")?;

    let prev = PedersenKeys::load(&input, &cfg).with_context(|| format!("loading {}", input.display()))?;
    let mut next = prev.clone();
    next.contribute(&mut OsRng)?;
    groth16_setup::pedersen::verify_contribution(&prev, &next).context("self-check of the new contribution")?;

    or_cleanup(&[out.as_path()], || {
        let bytes = next.save(&out, &cfg).with_context(|| format!("writing {}", out.display()))?;
        let digest = next.digest()?;
        info!(path = %out.display(), bytes, digest = %hex::encode(digest), "contribution written");
        Ok(())
    })
}

fn pedersen_verify(args: &[String]) -> Result<()> {
    let cfg = config(args)?;
    if let Some(input) = parse_flag(args, "--in") {
        let keys = PedersenKeys::load(&input, &cfg).with_context(|| format!("loading {input}"))?;
        keys.verify_consistency()?;
        let digest = keys.digest()?;
        info!(commitments = keys.proving.len(), digest = %hex::encode(digest), "snapshot is consistent");
        return Ok(());
    }
    let prev_path = required(args, "--prev")?;
    let next_path = required(args, "--next")?;
    let prev = PedersenKeys::load(&prev_path, &cfg).with_context(|| format!("loading {}", prev_path.display()))?;
    let next = PedersenKeys::load(&next_path, &cfg).with_context(|| format!("loading {}", next_path.display()))?;
    groth16_setup::pedersen::verify_contribution(&prev, &next)?;
    let (prev_digest, next_digest) = (prev.digest()?, next.digest()?);
    info!(
        prev = %hex::encode(prev_digest),
        next = %hex::encode(next_digest),
        "contribution verified"
    );
    Ok(())
}

fn offsets(args: &[String]) -> Result<()> {
    let power: u8 = parse_flag(args, "--power")
        .ok_or_else(|| anyhow!("missing --power\n{USAGE}"))?
        .parse()
        .context("--power must be an integer")?;
    if power > MAX_SOURCE_POWER {
        bail!("--power must be at most {MAX_SOURCE_POWER}");
    }
    let contributions: u16 = match parse_flag(args, "--contributions") {
        Some(s) => s.parse().context("--contributions must fit in u16")?,
        None => 0,
    };
    let layout = SourceLayout::new(power, contributions);
    println!("N                     {}", layout.n);
    println!("tau_g1                {}", layout.tau_g1());
    println!("tau_g2                {}", layout.tau_g2());
    println!("alpha_tau_g1          {}", layout.alpha_tau_g1());
    println!("beta_tau_g1           {}", layout.beta_tau_g1());
    println!("beta_g2               {}", layout.beta_g2());
    println!("contributions_start   {}", layout.contributions_start());
    match layout.last_contribution() {
        Ok(off) => println!("last_contribution     {off}"),
        Err(_) => println!("last_contribution     -"),
    }
    println!("lagrange_g1           {}", layout.lagrange_g1(LagrangeG1::Tau));
    println!("lagrange_alpha_g1     {}", layout.lagrange_g1(LagrangeG1::AlphaTau));
    println!("lagrange_beta_g1      {}", layout.lagrange_g1(LagrangeG1::BetaTau));
    println!("lagrange_g2           {}", layout.lagrange_g2());
    println!("end                   {}", layout.end());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("groth16_setup=info,setup=info")))
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let rest = args.get(2..).unwrap_or_default();
    match args.get(1).map(String::as_str) {
        Some("p2n") => p2n(rest),
        Some("pedersen-contribute") => pedersen_contribute(rest),
        Some("pedersen-verify") => pedersen_verify(rest),
        Some("offsets") => offsets(rest),
        _ => bail!("{USAGE}"),
    }
}
