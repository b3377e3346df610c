//! Aggregates samples into a summary and records it.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::loadgen::LoadMode;
use crate::loadgen::client::Sample;

pub const CSV_HEADER: &str = "Average-Response-Latency,Average-First-Byte-Latency,min/max-latency,Mode,Requests,Failed,Requests-Per-Second,Bytes-Per-Second";

#[derive(Debug, Clone)]
pub struct Report {
    pub mode: LoadMode,
    pub requests: usize,
    /// Requests that received a full response, whatever its status.
    pub completed: usize,
    /// Requests that got no usable response.
    pub failed: usize,
    pub statuses: BTreeMap<u16, usize>,
    pub avg_latency: Duration,
    pub avg_ttfb: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub bytes: u64,
    /// Wall time of the whole run.
    pub elapsed: Duration,
    pub first_error: Option<String>,
}

impl Report {
    /// Latency figures cover completed requests only.
    pub fn new(
        mode: LoadMode,
        requests: usize,
        outcomes: Vec<anyhow::Result<Sample>>,
        elapsed: Duration,
    ) -> Self {
        let mut samples = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    first_error.get_or_insert_with(|| format!("{:#}", e));
                }
            }
        }

        let mut statuses = BTreeMap::new();
        for sample in &samples {
            *statuses.entry(sample.status).or_insert(0) += 1;
        }

        let completed = samples.len();
        let average = |total: Duration| match u32::try_from(completed) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => total / n,
        };

        Self {
            mode,
            requests,
            completed,
            failed: requests.saturating_sub(completed),
            statuses,
            avg_latency: average(samples.iter().map(|s| s.latency).sum()),
            avg_ttfb: average(samples.iter().map(|s| s.ttfb).sum()),
            min_latency: samples.iter().map(|s| s.latency).min().unwrap_or_default(),
            max_latency: samples.iter().map(|s| s.latency).max().unwrap_or_default(),
            bytes: samples.iter().map(|s| s.bytes).sum(),
            elapsed,
            first_error,
        }
    }

    /// Failed requests plus responses with a 4xx or 5xx status.
    pub fn errors(&self) -> usize {
        let error_statuses: usize = self.statuses.range(400..).map(|(_, n)| n).sum();
        self.failed + error_statuses
    }

    pub fn requests_per_sec(&self) -> f64 {
        per_sec(self.completed as f64, self.elapsed)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        per_sec(self.bytes as f64, self.elapsed)
    }

    pub fn csv_row(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6}/{:.6},{},{},{},{:.2},{:.2}",
            self.avg_latency.as_secs_f64(),
            self.avg_ttfb.as_secs_f64(),
            self.min_latency.as_secs_f64(),
            self.max_latency.as_secs_f64(),
            self.mode,
            self.requests,
            self.failed,
            self.requests_per_sec(),
            self.bytes_per_sec(),
        )
    }

    /// Appends this run as one CSV row, writing the header into a new file.
    pub async fn append_csv(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let mut out = String::new();
        if file.metadata().await?.len() == 0 {
            out.push_str(CSV_HEADER);
            out.push('\n');
        }
        out.push_str(&self.csv_row());
        out.push('\n');

        file.write_all(out.as_bytes()).await?;
        file.flush().await
    }
}

fn per_sec(amount: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { amount / secs } else { 0.0 }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Average-Response-Latency {:.6} Average-First-Byte-Latency {:.6} min/max-latency {:.6}/{:.6}",
            self.avg_latency.as_secs_f64(),
            self.avg_ttfb.as_secs_f64(),
            self.min_latency.as_secs_f64(),
            self.max_latency.as_secs_f64(),
        )?;
        write!(
            f,
            "Mode {} Requests {} Completed {} Failed {} Requests-Per-Second {:.2} Bytes-Per-Second {:.2}",
            self.mode,
            self.requests,
            self.completed,
            self.failed,
            self.requests_per_sec(),
            self.bytes_per_sec(),
        )?;
        if !self.statuses.is_empty() {
            write!(f, "\nStatus")?;
            for (status, count) in &self.statuses {
                write!(f, " {}:{}", status, count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: u16, ttfb_ms: u64, latency_ms: u64) -> anyhow::Result<Sample> {
        Ok(Sample {
            status,
            ttfb: Duration::from_millis(ttfb_ms),
            latency: Duration::from_millis(latency_ms),
            bytes: 100,
        })
    }

    #[test]
    fn aggregates_completed_samples() {
        let outcomes = vec![
            sample(200, 1, 10),
            sample(200, 3, 30),
            sample(404, 2, 20),
            Err(anyhow::anyhow!("Connection refused")),
        ];
        let report = Report::new(LoadMode::Pool(2), 4, outcomes, Duration::from_secs(2));

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors(), 2);
        assert_eq!(report.avg_latency, Duration::from_millis(20));
        assert_eq!(report.avg_ttfb, Duration::from_millis(2));
        assert_eq!(report.min_latency, Duration::from_millis(10));
        assert_eq!(report.max_latency, Duration::from_millis(30));
        assert_eq!(report.bytes, 300);
        assert_eq!(report.requests_per_sec(), 1.5);
        assert_eq!(report.first_error.as_deref(), Some("Connection refused"));
        assert_eq!(
            report.csv_row(),
            "0.020000,0.002000,0.010000/0.030000,pool-2,4,1,1.50,150.00"
        );
    }

    #[test]
    fn lost_outcomes_count_as_failed() {
        let report = Report::new(LoadMode::PerRequest, 3, Vec::new(), Duration::ZERO);

        assert_eq!(report.failed, 3);
        assert_eq!(report.avg_latency, Duration::ZERO);
        assert_eq!(report.requests_per_sec(), 0.0);
    }

    #[test]
    fn summary_lists_statuses() {
        let outcomes = vec![sample(200, 1, 2), sample(304, 1, 2), sample(200, 1, 2)];
        let text = Report::new(LoadMode::PerRequest, 3, outcomes, Duration::from_secs(1)).to_string();

        assert!(text.starts_with("Average-Response-Latency 0.002000 Average-First-Byte-Latency 0.001000"));
        assert!(text.contains("Mode per-request Requests 3 Completed 3 Failed 0"));
        assert!(text.ends_with("Status 200:2 304:1"));
    }
}
