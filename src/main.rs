mod config;
mod errors;
mod lifecycle;
mod metrics;
mod report;
mod runner;
mod stages;
mod summary;
mod thresholds;
mod workload;

use config::Config;
use errors::Result;
use runner::Runner;

use std::process;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit status when the run completed but a threshold failed
const EXIT_THRESHOLDS_FAILED: i32 = 99;

fn main() {
    // clap exits on its own for --help and malformed flags
    let config = match Config::parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    init_logging(config.verbose);

    match run(config) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Load test failed: {}", e);
            process::exit(1);
        }
    }
}

/// setup, ramping VUs, teardown, summary. Returns the exit status.
fn run(config: Config) -> Result<i32> {
    info!("rampload v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", lifecycle::setup(&config));

    let runner = Runner::new(config.clone())?;

    // first Ctrl+C stops gracefully, a second one exits immediately
    let interrupted = runner.interrupt_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::Relaxed) {
            process::exit(130);
        }
    }) {
        warn!("Failed to set Ctrl+C handler: {}", e);
    }

    let report = runner.run()?;
    println!("{}", lifecycle::teardown());

    let output = summary::handle_summary(&report, &config)?;
    println!("{}", output.console);
    println!("{}", output.text_summary);
    output.write_files()?;

    if report.thresholds_passed() {
        Ok(0)
    } else {
        for (metric, expr, ok) in report.threshold_results() {
            if !ok {
                error!("Threshold crossed: {} {}", metric, expr);
            }
        }
        Ok(EXIT_THRESHOLDS_FAILED)
    }
}

/// Initialize logging based on verbosity. `RUST_LOG` still applies.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    let mut filter = EnvFilter::from_default_env();
    for directive in [format!("rampload={}", level), "isahc=warn".to_string()] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Invalid filter directive '{}': {}", directive, e),
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {}", e);
    }

    if verbose {
        info!("Verbose logging enabled");
    }
}
