#[macro_use]
extern crate lazy_static;

mod bibliography;
mod browser;
mod citation_engine;
mod cli;
mod config;
mod dom;
mod toc;
mod units;

use anyhow::{Context, Result};
use browser::NodeBrowser;
use citation_engine::CiteJsEngine;
use clap::Parser;
use cli::Cli;
use config::Config;
use std::fs;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Outcome of one post-processing pass over the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Applied,
    /// The document does not ask for this section.
    NotRequested,
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "post-processing failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path(&cli.input));
    let config = if cli.config.is_some() || config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    let width = cli.width.clone().or_else(|| config.page.width.clone());
    let height = cli.height.clone().or_else(|| config.page.height.clone());
    let node = config.node_command();

    let t0 = Instant::now();
    let mut page = NodeBrowser::open(&node, &cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;
    let t_open = t0.elapsed();

    let t1 = Instant::now();
    if !cli.skip_bibliography {
        match CiteJsEngine::spawn(&node) {
            Ok(mut engine) => {
                let pass = bibliography::render(&mut page, &mut engine, &config.citations.locale)
                    .context("bibliography pass failed")?;
                info!(?pass, "bibliography");
            }
            Err(e) => warn!(error = %e, "citation engine unavailable, skipping bibliography"),
        }
    }
    let t_bib = t1.elapsed();

    let t2 = Instant::now();
    if !cli.skip_toc {
        let pass = toc::render(&mut page, width.as_ref(), height.as_ref())
            .context("table of contents pass failed")?;
        info!(?pass, "table of contents");
    }
    let t_toc = t2.elapsed();

    let out_path = cli.output_path();
    if cli.wants_pdf() {
        let width_px = width
            .as_ref()
            .and_then(|w| w.to_pixels())
            .unwrap_or(units::DEFAULT_WIDTH);
        let height_px = height
            .as_ref()
            .and_then(|h| h.to_pixels())
            .unwrap_or(units::DEFAULT_HEIGHT);
        page.print_pdf(&out_path, width_px, height_px)
            .with_context(|| format!("failed to print {}", out_path.display()))?;
    } else {
        let html = page.content().context("failed to serialize document")?;
        fs::write(&out_path, html)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
    }
    info!(path = %out_path.display(), "wrote output");

    if config.timings {
        info!(
            open = ?t_open,
            bibliography = ?t_bib,
            toc = ?t_toc,
            "timings"
        );
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
