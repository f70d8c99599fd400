// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use seisfd3d::{Config, FdError, ProgressInfo, Solver};

#[derive(Parser)]
#[command(name = "seisfd3d", version, about = "Parallel 3D (visco)elastic finite-difference solver")]
struct Cli {
    /// TOML run configuration
    config: PathBuf,

    /// Kernel threads per subdomain worker
    #[arg(long)]
    threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the output directory of the configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Print an estimated time to completion to stderr
    #[arg(long)]
    progress: bool,
}

fn parse_level(s: &str) -> Result<Level> {
    Ok(match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => bail!("unknown --log-level '{}'", other),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&cli.log_level)?)
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(dir) = &cli.output_dir {
        config.output.dir = std::env::current_dir()?.join(dir);
    }
    let ctx = config
        .validate()
        .with_context(|| format!("invalid configuration {}", cli.config.display()))?;
    if cli.check {
        info!(nt = ctx.nt, shots = ctx.shots.len(), receivers = ctx.receivers.len(), "configuration is valid");
        return Ok(());
    }

    let mut solver = Solver::new(ctx);
    if let Some(threads) = cli.threads {
        solver = solver.with_threads(threads);
    }

    let progress_cb: Option<Box<dyn Fn(ProgressInfo) + Sync>> = if cli.progress {
        Some(Box::new(|info: ProgressInfo| {
            let per_step = info.elapsed.as_secs_f64() / info.step.max(1) as f64;
            eprintln!(
                "[shot {}] step {}/{} eta {:.1}s",
                info.shot + 1,
                info.step,
                info.nt,
                per_step * (info.nt - info.step) as f64
            );
        }))
    } else {
        None
    };

    match solver.solve(progress_cb.as_deref()) {
        Ok(report) => {
            info!(
                shots = report.shots.len(),
                peak_velocity = report.peak_velocity,
                "run finished"
            );
            Ok(())
        }
        Err(e @ FdError::Unstable { .. }) => {
            error!("{}", e);
            bail!("simulation became unstable; reduce the time step");
        }
        Err(e) => Err(e).context("simulation failed"),
    }
}
