//! Tor V3 Vanity Address Miner CLI
//!
//! Usage:
//!   t3v tor                  # Find an address starting with "tor"
//!   t3v abc -t 8 -d keys     # 8 workers, keys saved under ./keys
//!   t3v abc --keep-searching # Save every match until Ctrl+C

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};

use onion_vanity::config::{ControlConfig, DEFAULT_CONFIG_FILE};
use onion_vanity::search::DEFAULT_BATCH_SIZE;
use onion_vanity::{
    format_speed, logging, KeyPersister, MatchPolicy, SearchCoordinator, SearchError,
    SearchEvent, SearchOptions, SearchTarget, SessionHandle,
};

#[derive(Parser)]
#[command(name = "t3v")]
#[command(about = "Tor V3 vanity onion address miner")]
#[command(version)]
struct Cli {
    /// Desired address prefix (a-z, 2-7). Defaults to the config file's matchString
    prefix: Option<String>,

    /// Output directory for generated keys
    #[arg(short, long, default_value = "keys")]
    dst: PathBuf,

    /// Number of worker threads. Defaults to the config file's threadCount
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Config file remembering prefix and thread count
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write the effective prefix and thread count back to the config file
    #[arg(long)]
    save_config: bool,

    /// Keep mining after the first match and save every hit
    #[arg(long)]
    keep_searching: bool,

    /// Attempts per worker between stop checks and progress flushes
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,

    /// Give up after this many seconds without a match
    #[arg(long)]
    timeout: Option<u64>,

    /// Seconds between progress reports
    #[arg(short, long, default_value_t = 10)]
    report_interval: u64,

    /// Only write the raw key files, not the Tor hidden service layout
    #[arg(long)]
    no_tor_files: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Pretty duration formatter
struct PrettyDur(chrono::Duration);

impl PrettyDur {
    fn from_std(d: Duration) -> Self {
        Self(chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero()))
    }
}

impl std::fmt::Display for PrettyDur {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.num_weeks() >= 52 {
            write!(f, "{} years, ", self.0.num_weeks() / 52)?;
        }
        if self.0.num_weeks() % 52 > 0 {
            write!(f, "{} weeks, ", self.0.num_weeks() % 52)?;
        }
        if self.0.num_days() % 7 > 0 {
            write!(f, "{} days, ", self.0.num_days() % 7)?;
        }
        if self.0.num_hours() % 24 > 0 {
            write!(f, "{} hours, ", self.0.num_hours() % 24)?;
        }
        if self.0.num_minutes() % 60 > 0 {
            write!(f, "{} minutes, ", self.0.num_minutes() % 60)?;
        }
        write!(f, "{} seconds", self.0.num_seconds() % 60)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_with_level(Level::DEBUG);
    } else {
        logging::init();
    }

    let stored = ControlConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let prefix = cli.prefix.clone().unwrap_or(stored.match_string);
    let threads = cli.threads.unwrap_or(stored.thread_count);

    if cli.save_config {
        let config = ControlConfig {
            match_string: prefix.clone(),
            thread_count: threads,
        };
        config
            .save(&cli.config)
            .with_context(|| format!("saving {}", cli.config.display()))?;
        info!(path = %cli.config.display(), "saved config");
    }

    let target = SearchTarget::new(&prefix);
    let policy = if cli.keep_searching {
        MatchPolicy::KeepSearching
    } else {
        MatchPolicy::StopOnFirst
    };

    let persister = KeyPersister::new(&cli.dst).with_tor_files(!cli.no_tor_files);
    let coordinator = SearchCoordinator::new(persister).with_options(SearchOptions {
        batch_size: cli.batch_size,
        policy,
    });

    println!("=== Tor V3 Vanity Miner ===");
    println!("Prefix:  {:?}", target.prefix());
    println!("Output:  {}", cli.dst.display());
    println!("Threads: {}", threads);
    println!("Expect:  ~{:.2e} attempts", target.estimated_attempts() as f64);
    println!();

    let mut session = coordinator
        .start(threads, target)
        .context("starting search")?;

    let stop = session.stop_signal();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        stop.request();
    })
    .context("installing Ctrl-C handler")?;

    println!("Searching... (Press Ctrl+C to stop)");
    println!();

    let mut found = 0usize;
    let outcome = drive(&session, &cli, &mut found);
    let progress = session.snapshot();
    session.stop();

    // Matches handed off while stopping are still saved; show them too
    for event in session.drain_found() {
        found += 1;
        report_found(found, event);
    }

    println!();
    println!("--- Final Statistics ---");
    println!("Attempts: {}", progress.attempts);
    println!("Elapsed:  {}", PrettyDur::from_std(progress.elapsed));
    println!(
        "Speed:    {} keys/sec",
        format_speed(progress.attempts_per_sec as u64)
    );

    match outcome {
        Err(e) if found == 0 => return Err(e.into()),
        Err(e) => warn!(error = %e, found, "search ended early"),
        Ok(()) => {}
    }
    if found == 0 && !cli.keep_searching {
        bail!("stopped before a match was found");
    }
    Ok(())
}

/// Render events and progress until the session ends, counting matches into `found`.
fn drive(session: &SessionHandle, cli: &Cli, found: &mut usize) -> Result<(), SearchError> {
    let report_interval = Duration::from_secs(cli.report_interval.max(1));
    let deadline = cli
        .timeout
        .map(|secs| (Duration::from_secs(secs), Instant::now() + Duration::from_secs(secs)));
    let expected = session.target().estimated_attempts() as f64;
    let mut last_report = Instant::now();
    let stop = session.stop_signal();

    loop {
        match session.events().recv_timeout(Duration::from_millis(100)) {
            Ok(event @ SearchEvent::Found { .. }) => {
                *found += 1;
                report_found(*found, event);
            }
            Ok(SearchEvent::WorkerFailed { .. }) => {}
            Ok(SearchEvent::Finished) => return Ok(()),
            Ok(SearchEvent::Aborted) => return Err(SearchError::Aborted),
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
        }

        if stop.is_requested() {
            return Ok(());
        }

        if let Some((timeout, deadline)) = deadline {
            if *found == 0 && Instant::now() >= deadline {
                return Err(SearchError::Timeout(timeout));
            }
        }

        if last_report.elapsed() >= report_interval {
            let progress = session.snapshot();
            let fraction = progress.attempts as f64 / expected;
            let eta = if progress.attempts_per_sec > 0.0 {
                Duration::from_secs_f64((expected / progress.attempts_per_sec).min(1e12))
            } else {
                Duration::ZERO
            };

            println!(
                "Progress: {:.2e} / {:.2e} keys ({:.4}%)",
                progress.attempts as f64,
                expected,
                fraction * 100.0
            );
            println!(
                "Speed: {} keys/sec",
                format_speed(progress.attempts_per_sec as u64)
            );
            println!(
                "Elapsed: {} / Est. total: {}",
                PrettyDur::from_std(progress.elapsed),
                PrettyDur::from_std(eta)
            );
            println!();

            last_report = Instant::now();
        }
    }
}

fn report_found(index: usize, event: SearchEvent) {
    if let SearchEvent::Found { key, persisted, .. } = event {
        println!("FOUND [{}]: {}", index, key.address.hostname());
        match persisted {
            Ok(dir) => println!("  Saved to: {}", dir.display()),
            Err(e) => warn!(error = %e, "match could not be saved"),
        }
    }
}
