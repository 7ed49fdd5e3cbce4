//! The work every VU repeats: load the page, think, submit the analysis
//! form, cool down. Request failures are recorded, never raised.

use crate::config::Config;
use crate::errors::{LoadTestError, Result};
use crate::metrics::{
    HttpSample, Metrics, ANALYSIS_DURATION, ITERATIONS, ITERATION_DURATION, SUCCESS_RATE,
};

use isahc::{
    config::Configurable,
    http::{self, header::CONTENT_TYPE},
    AsyncReadResponseExt,
    HttpClient,
    HttpClientBuilder,
    Request,
};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info};

pub const CHECK_HOMEPAGE: &str = "homepage loads";
pub const CHECK_ANALYSIS_STATUS: &str = "analysis succeeds";
pub const CHECK_HAS_RESULTS: &str = "has results";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// What one iteration observed
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub target: String,
    pub homepage_status: Option<u16>,
    pub analysis_status: Option<u16>,
    pub analysis_body_len: usize,
    pub analysis_elapsed: Duration,
    pub success: bool,
}

/// Result of a single request/response cycle
#[derive(Debug)]
struct Exchange {
    status: Option<u16>, // None if no response came back
    body_len: usize,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Workload {
    client: HttpClient,
    metrics: Arc<Metrics>,
    endpoint: String,
    targets: Vec<String>,
    form_field: String,
    think_time: Duration,
    cooldown_time: Duration,
    analysis_timeout: Duration,
}

impl Workload {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        if config.targets.is_empty() {
            return Err(LoadTestError::config("At least one target URL is required"));
        }

        // no overall timeout: only the analysis POST gets a ceiling
        let client = HttpClientBuilder::new()
            .connect_timeout(config.connection_timeout)
            .build()?;

        Ok(Self {
            client,
            metrics,
            endpoint: config.endpoint(),
            targets: config.targets.clone(),
            form_field: config.form_field.clone(),
            think_time: config.think_time,
            cooldown_time: config.cooldown_time,
            analysis_timeout: config.analysis_timeout,
        })
    }

    /// Run one full iteration for VU `vu`
    pub async fn iteration(&self, vu: u64) -> IterationOutcome {
        let iteration_start = Instant::now();
        let target = self.pick_target().to_string();
        info!("[User {}] Testing: {}...", vu, excerpt(&target));

        let homepage = self.exchange(self.homepage_request()).await;
        self.metrics.check(CHECK_HOMEPAGE, homepage.status == Some(200));

        sleep(self.think_time).await;

        info!("[User {}] Submitting analysis...", vu);
        let start = Instant::now();
        let analysis = self.exchange(self.analysis_request(&target)).await;
        let elapsed = start.elapsed();

        let status_ok = self
            .metrics
            .check(CHECK_ANALYSIS_STATUS, analysis.status == Some(200));
        let has_results = self.metrics.check(CHECK_HAS_RESULTS, analysis.body_len > 0);
        let success = status_ok && has_results;

        if success {
            info!("[User {}] Completed in {:.2}s", vu, elapsed.as_secs_f64());
        } else {
            info!(
                "[User {}] Failed ({}) after {:.2}s",
                vu,
                analysis.status.unwrap_or(0),
                elapsed.as_secs_f64()
            );
            if let Some(error) = &analysis.error {
                debug!("[User {}] {}", vu, error);
            }
        }

        sleep(self.cooldown_time).await;

        // an iteration aborted before this point leaves none of these
        self.metrics.add_duration(ANALYSIS_DURATION, elapsed);
        self.metrics.add_bool(SUCCESS_RATE, success);
        self.metrics.add(ITERATIONS, 1.0);
        self.metrics
            .add_duration(ITERATION_DURATION, iteration_start.elapsed());

        IterationOutcome {
            target,
            homepage_status: homepage.status,
            analysis_status: analysis.status,
            analysis_body_len: analysis.body_len,
            analysis_elapsed: elapsed,
            success,
        }
    }

    /*-------------------==| Private/Helpers |==----------------------- */

    /// Uniformly random candidate. `targets` is never empty.
    fn pick_target(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.targets.len());
        &self.targets[index]
    }

    fn homepage_request(&self) -> http::Result<Request<String>> {
        Request::get(self.endpoint.as_str()).body(String::new())
    }

    fn analysis_request(&self, target: &str) -> http::Result<Request<String>> {
        Request::post(self.endpoint.as_str())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .timeout(self.analysis_timeout)
            .body(form_body(&self.form_field, target))
    }

    /// Send the request, read the whole body and record the HTTP metrics
    async fn exchange(&self, request: http::Result<Request<String>>) -> Exchange {
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                return Exchange {
                    status: None,
                    body_len: 0,
                    error: Some(format!("Invalid request: {}", err)),
                };
            }
        };
        let bytes_sent = request.body().len();

        let start = Instant::now();
        let exchange = match self.client.send_async(request).await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => Exchange {
                        status: Some(status),
                        body_len: body.len(),
                        error: None,
                    },
                    Err(err) => Exchange {
                        status: Some(status),
                        body_len: 0,
                        error: Some(format!("Failed to read body: {}", err)),
                    },
                }
            }
            Err(err) => Exchange {
                status: None,
                body_len: 0,
                error: Some(if err.is_timeout() {
                    "Request timed out".to_string()
                } else {
                    err.to_string()
                }),
            },
        };

        self.metrics.record_http(&HttpSample {
            duration: start.elapsed(),
            status: exchange.status,
            bytes_sent,
            bytes_received: exchange.body_len,
        });
        exchange
    }
}

/// `field=<url-encoded value>`
pub fn form_body(field: &str, value: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair(field, value)
        .finish()
}

/// The part of a long product URL worth printing
fn excerpt(target: &str) -> String {
    target.chars().skip(30).take(30).collect()
}
