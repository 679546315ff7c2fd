// Timing statistics collected when detailed logging is enabled.

use parking_lot::Mutex;
use std::time::Duration;

/// Summary of one series of samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distribution {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl Distribution {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };

        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sorted.iter().sum::<f64>() / count as f64,
            median,
        })
    }
}

/// Snapshot of the collected statistics. Times are in milliseconds,
/// compressed sizes in percent of the original size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSummary {
    pub send_ms: Option<Distribution>,
    pub recv_ms: Option<Distribution>,
    pub compress_ms: Option<Distribution>,
    pub decompress_ms: Option<Distribution>,
    pub compressed_percent: Option<Distribution>,
}

#[derive(Default)]
struct Samples {
    send_ms: Vec<f64>,
    recv_ms: Vec<f64>,
    compress_ms: Vec<f64>,
    decompress_ms: Vec<f64>,
    compressed_percent: Vec<f64>,
}

impl Samples {
    fn summary(&self) -> StatsSummary {
        StatsSummary {
            send_ms: Distribution::from_samples(&self.send_ms),
            recv_ms: Distribution::from_samples(&self.recv_ms),
            compress_ms: Distribution::from_samples(&self.compress_ms),
            decompress_ms: Distribution::from_samples(&self.decompress_ms),
            compressed_percent: Distribution::from_samples(&self.compressed_percent),
        }
    }
}

#[derive(Default)]
pub struct MessageStats {
    samples: Mutex<Samples>,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl MessageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_send(&self, elapsed: Duration) {
        self.samples.lock().send_ms.push(millis(elapsed));
    }

    pub fn record_recv(&self, elapsed: Duration) {
        self.samples.lock().recv_ms.push(millis(elapsed));
    }

    pub fn record_compress(&self, elapsed: Duration, compressed: usize, original: usize) {
        let mut samples = self.samples.lock();
        samples.compress_ms.push(millis(elapsed));
        samples
            .compressed_percent
            .push(100.0 * compressed as f64 / original as f64);
    }

    pub fn record_decompress(&self, elapsed: Duration, compressed: usize, original: usize) {
        let mut samples = self.samples.lock();
        samples.decompress_ms.push(millis(elapsed));
        samples
            .compressed_percent
            .push(100.0 * compressed as f64 / original as f64);
    }

    pub fn summary(&self) -> StatsSummary {
        self.samples.lock().summary()
    }

    /// Returns the current summary and starts a fresh collection window.
    pub fn take_summary(&self) -> StatsSummary {
        let samples = std::mem::take(&mut *self.samples.lock());
        samples.summary()
    }
}

impl StatsSummary {
    pub(crate) fn log(&self) {
        let series = [
            ("send_ms", &self.send_ms),
            ("recv_ms", &self.recv_ms),
            ("compress_ms", &self.compress_ms),
            ("decompress_ms", &self.decompress_ms),
            ("compressed_percent", &self.compressed_percent),
        ];
        for (name, dist) in series {
            if let Some(d) = dist {
                tracing::info!(
                    series = name,
                    count = d.count,
                    min = d.min,
                    max = d.max,
                    mean = d.mean,
                    median = d.median,
                    "message statistics"
                );
            }
        }
    }
}
