use crate::config::Config;
use crate::errors::{LoadTestError, Result};
use crate::metrics::{Metrics, ITERATIONS, VUS, VUS_MAX};
use crate::report::{Group, Report, ReportOptions, RunState};
use crate::stages::Schedule;
use crate::workload::Workload;

use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

const TICK: Duration = Duration::from_millis(250); // how often the VU count is adjusted

/// A running virtual user
struct Vu {
    stop: Arc<AtomicBool>, // finish the current iteration, then exit
    handle: JoinHandle<()>,
}

/// Drives the ramping-VU schedule and collects the results.
#[derive(Debug)]
pub struct Runner {
    config: Config,
    metrics: Arc<Metrics>,
    workload: Arc<Workload>,
    interrupted: Arc<AtomicBool>, // set from the Ctrl+C handler
}

impl Runner {
    /*------------------==| Public Functions |==-------------------------*/
    pub fn new(config: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let workload = Workload::new(&config, Arc::clone(&metrics))?;
        Ok(Self {
            config,
            metrics,
            workload: Arc::new(workload),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that ends the run early when set. The run still finishes its
    /// graceful stop and produces a report.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Run the whole schedule and build the end-of-test report
    pub fn run(self) -> Result<Report> {
        if self.config.preflight {
            self.is_url_reachable(&self.config.base_url)?;
        }
        info!(
            "Ramping up to {} VUs over {} using {} thread(s)",
            self.config.schedule.max_target(),
            crate::stages::format_offset(self.config.schedule.total_duration()),
            self.config.threads
        );

        let runtime = Self::get_runtime(self.config.threads)?;
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        let peak = runtime.block_on(self.drive(start));

        // drop the runtime so tasks aborted after the graceful stop are gone
        drop(runtime);
        let elapsed = start.elapsed();
        self.metrics.add(VUS_MAX, peak as f64);
        info!(
            "{} iterations in {:.1}s, peak {} VUs",
            self.metrics.samples(ITERATIONS),
            elapsed.as_secs_f64(),
            peak
        );

        Ok(self.build_report(elapsed, started_at))
    }

    /*-------------------==| Private/Helpers |==----------------------- */

    /// Controller loop. Returns the highest number of VUs running at once.
    async fn drive(&self, start: Instant) -> usize {
        let schedule = &self.config.schedule;
        let total = schedule.total_duration();

        let mut active: Vec<Vu> = Vec::new();
        let mut retiring: Vec<Vu> = Vec::new(); // told to stop, may still be mid-iteration
        let mut next_id: u64 = 1;
        let mut peak = 0;
        let mut stage = None;

        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }
            if self.interrupted.load(Ordering::Relaxed) {
                warn!("Interrupted, stopping all VUs");
                break;
            }

            let current = stage_index(schedule, elapsed);
            if stage != Some(current) {
                stage = Some(current);
                let next = schedule.stages()[current];
                info!(
                    "Stage {}/{}: {} VUs over {}",
                    current + 1,
                    schedule.stages().len(),
                    next.target,
                    crate::stages::format_offset(next.duration)
                );
            }

            let target = schedule.target_at(elapsed);
            while active.len() < target {
                active.push(self.spawn_vu(next_id));
                next_id += 1;
            }
            while active.len() > target {
                // newest VUs leave first
                if let Some(vu) = active.pop() {
                    vu.stop.store(true, Ordering::Relaxed);
                    retiring.push(vu);
                }
            }
            retiring.retain(|vu| !vu.handle.is_finished());

            let running = active.len() + retiring.len();
            peak = peak.max(running);
            self.metrics.add(VUS, running as f64);
            debug!("{:.1}s: target {} VUs, {} running", elapsed.as_secs_f64(), target, running);
        }

        for vu in &active {
            vu.stop.store(true, Ordering::Relaxed);
        }
        retiring.extend(active);
        self.graceful_stop(retiring).await;
        peak
    }

    /// Wait for in-flight iterations, then abort whatever is left
    async fn graceful_stop(&self, mut vus: Vec<Vu>) {
        vus.retain(|vu| !vu.handle.is_finished());
        if vus.is_empty() {
            return;
        }
        info!(
            "Waiting up to {} for {} VU(s) to finish their iteration",
            crate::stages::format_offset(self.config.graceful_stop),
            vus.len()
        );

        let deadline = Instant::now() + self.config.graceful_stop;
        for vu in &mut vus {
            if timeout_at(deadline, &mut vu.handle).await.is_err() {
                break;
            }
        }

        let remaining: Vec<&Vu> = vus.iter().filter(|vu| !vu.handle.is_finished()).collect();
        if !remaining.is_empty() {
            warn!("Graceful stop expired, aborting {} VU(s)", remaining.len());
            for vu in remaining {
                vu.handle.abort();
            }
        }
    }

    fn spawn_vu(&self, id: u64) -> Vu {
        let stop = Arc::new(AtomicBool::new(false));
        let workload = Arc::clone(&self.workload);
        let flag = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            while !flag.load(Ordering::Relaxed) {
                let outcome = workload.iteration(id).await;
                debug!(
                    "[User {}] {}: GET {:?}, POST {:?} with {} bytes in {:.2}s, success={}",
                    id,
                    outcome.target,
                    outcome.homepage_status,
                    outcome.analysis_status,
                    outcome.analysis_body_len,
                    outcome.analysis_elapsed.as_secs_f64(),
                    outcome.success
                );
            }
        });
        Vu { stop, handle }
    }

    fn build_report(&self, elapsed: Duration, started_at: String) -> Report {
        let (metrics, checks) = self.metrics.snapshot(&self.config.thresholds, elapsed);

        let mut thresholds: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for threshold in &self.config.thresholds {
            thresholds
                .entry(threshold.metric.clone())
                .or_default()
                .push(threshold.expr.to_string());
        }

        Report {
            options: ReportOptions {
                stages: self.config.schedule.stages().to_vec(),
                thresholds,
            },
            state: RunState {
                test_run_duration_ms: elapsed.as_secs_f64() * 1000.0,
                started_at,
                interrupted: self.interrupted.load(Ordering::Relaxed),
            },
            root_group: Group {
                name: String::new(),
                checks,
            },
            metrics,
        }
    }

    /// Helper function to create the tokio runtime
    fn get_runtime(threads: usize) -> Result<Runtime> {
        Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_all()
            .build()
            .map_err(|e| LoadTestError::Runtime(format!("Failed to create tokio runtime: {}", e)))
    }

    /// Check if the host accepts TCP connections before ramping up
    fn is_url_reachable(&self, url: &str) -> Result<()> {
        let unreachable = |reason: String| LoadTestError::Unreachable {
            url: url.to_string(),
            reason,
        };
        let parsed_url = Url::parse(url)?;
        let hostname = parsed_url
            .host_str()
            .ok_or_else(|| unreachable("URL does not have a valid hostname".to_string()))?;
        let port = parsed_url.port_or_known_default().unwrap_or(80);

        let address = (hostname, port)
            .to_socket_addrs()
            .map_err(|e| unreachable(format!("Failed to resolve: {}", e)))?
            .next()
            .ok_or_else(|| unreachable("No address found".to_string()))?;

        TcpStream::connect_timeout(&address, self.config.connection_timeout)
            .map_err(|e| unreachable(format!("Failed to connect: {}", e)))?;
        info!("{}:{} is reachable", hostname, port);
        Ok(())
    }
}

/// Index of the stage running at `elapsed`, the last one once past the end
fn stage_index(schedule: &Schedule, elapsed: Duration) -> usize {
    let mut end = Duration::ZERO;
    for (i, stage) in schedule.stages().iter().enumerate() {
        end += stage.duration;
        if elapsed < end {
            return i;
        }
    }
    schedule.stages().len().saturating_sub(1)
}
