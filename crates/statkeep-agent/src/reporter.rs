//! Reporter — posts readings to the collector.
//!
//! Each report is one JSON array of samples, gzipped, sent to `/updates/`
//! over a fresh HTTP/1 connection. `PollCount` goes out as the number of
//! polls since the last report the collector accepted, so a failed report
//! is folded into the next one instead of being lost.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::Method;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HOST, USER_AGENT};
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use statkeep_sign::Signer;
use statkeep_state::Sample;

use crate::error::{AgentError, AgentResult};
use crate::sampler::Readings;

/// Path batches are posted to.
pub const UPDATES_PATH: &str = "/updates/";

pub struct Reporter {
    /// Collector `host:port`.
    address: String,
    signer: Option<Signer>,
    timeout: Duration,
    /// `poll_count` of the last readings the collector accepted.
    reported_polls: u64,
}

impl Reporter {
    /// `address` is `host:port`, optionally prefixed with `http://`.
    pub fn new(address: &str, signer: Option<Signer>, timeout: Duration) -> Self {
        let address = address
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self {
            address,
            signer,
            timeout,
            reported_polls: 0,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Polls not yet accounted for by an accepted report.
    pub fn pending_polls(&self, readings: &Readings) -> i64 {
        let pending = readings.poll_count.saturating_sub(self.reported_polls);
        i64::try_from(pending).unwrap_or(i64::MAX)
    }

    /// Samples for `readings`, signed when a key is configured.
    pub fn build_batch(&self, readings: &Readings) -> AgentResult<Vec<Sample>> {
        let mut samples = readings.to_samples(self.pending_polls(readings));
        if let Some(signer) = &self.signer {
            for sample in &mut samples {
                signer.sign_in_place(sample)?;
            }
        }
        Ok(samples)
    }

    /// Send one report. Returns the number of samples delivered.
    pub async fn report(&mut self, readings: &Readings) -> AgentResult<usize> {
        let samples = self.build_batch(readings)?;
        let body = encode(&samples)?;

        tokio::time::timeout(self.timeout, self.post(UPDATES_PATH, body))
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))??;

        self.reported_polls = readings.poll_count;
        Ok(samples.len())
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> AgentResult<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| AgentError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| AgentError::Request(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "collector connection closed");
            }
        });

        let req = http::Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, &self.address)
            .header(USER_AGENT, "statkeep-agent/0.1")
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AgentError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| AgentError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AgentError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Serialize `samples` as a JSON array and gzip it.
pub fn encode(samples: &[Sample]) -> AgentResult<Vec<u8>> {
    let json = serde_json::to_vec(samples).map_err(|e| AgentError::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(&json)
        .map_err(|e| AgentError::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| AgentError::Encode(e.to_string()))
}

/// Report the latest readings every `interval` until shutdown.
pub async fn run_reporter(
    mut reporter: Reporter,
    interval: Duration,
    readings: watch::Receiver<Readings>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        collector = %reporter.address(),
        interval_ms = interval.as_millis() as u64,
        "reporter started"
    );
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let latest = readings.borrow().clone();
                if latest.poll_count == 0 {
                    debug!("no readings yet, skipping report");
                    continue;
                }
                match reporter.report(&latest).await {
                    Ok(count) => debug!(samples = count, "report delivered"),
                    Err(e) => warn!(error = %e, "report failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("reporter shutting down");
                break;
            }
        }
    }
}
