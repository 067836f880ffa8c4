//! Flowsieve command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use flowsieve::config::SieveConfig;
use flowsieve::core::Engine;
use flowsieve::rules::RuleSet;
use flowsieve::utils::logger;

/// Offline DPI engine: classify flows by SNI/Host/DNS and filter a pcap
/// capture through a blocking rule set.
#[derive(Parser, Debug)]
#[clap(author = "Flowsieve Team", version, about)]
struct Args {
    /// Input capture file (legacy pcap, Ethernet link type)
    input: PathBuf,

    /// Output capture file for forwarded frames
    output: PathBuf,

    /// Block a source IP (dotted quad, repeatable)
    #[clap(long = "block-ip", value_name = "IP")]
    block_ips: Vec<String>,

    /// Block an application by tag name, e.g. YouTube (repeatable)
    #[clap(long = "block-app", value_name = "NAME")]
    block_apps: Vec<String>,

    /// Block a domain: a literal name or a *.suffix pattern (repeatable)
    #[clap(long = "block-domain", value_name = "PATTERN")]
    block_domains: Vec<String>,

    /// Block a destination port (repeatable)
    #[clap(long = "block-port", value_name = "PORT")]
    block_ports: Vec<u16>,

    /// Load additional rules from a section-oriented rule file
    #[clap(long, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Number of load-balancer threads
    #[clap(long, value_name = "N")]
    lbs: Option<usize>,

    /// Fast-path workers per load balancer
    #[clap(long, value_name = "N")]
    fps: Option<usize>,

    /// Configuration file (TOML)
    #[clap(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable per-block log lines and stage chatter
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SieveConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => SieveConfig::default(),
    };
    if let Some(lbs) = args.lbs {
        config.engine.lbs = lbs;
    }
    if let Some(fps) = args.fps {
        config.engine.fps_per_lb = fps;
    }
    config.validate().context("invalid engine configuration")?;

    let level = if args.verbose {
        Level::DEBUG
    } else {
        logger::parse_level(&config.logging.log_level, Level::INFO)
    };
    logger::init_logging(level);

    info!(
        "flowsieve starting: {} -> {}",
        args.input.display(),
        args.output.display()
    );

    let rules = Arc::new(RuleSet::new());
    for ip in &args.block_ips {
        rules
            .block_ip_str(ip)
            .with_context(|| format!("bad --block-ip value {ip:?}"))?;
    }
    for app in &args.block_apps {
        rules
            .block_app_str(app)
            .with_context(|| format!("bad --block-app value {app:?}"))?;
    }
    for domain in &args.block_domains {
        rules.block_domain(domain);
    }
    for port in &args.block_ports {
        rules.block_port(*port);
    }
    if let Some(path) = &args.rules {
        rules
            .load_file(path)
            .with_context(|| format!("cannot load rule file {}", path.display()))?;
    }

    let engine = Engine::new(config, rules);
    let report = engine.run(&args.input, &args.output)?;
    report.log_summary();

    info!("output written to {}", args.output.display());
    Ok(())
}
