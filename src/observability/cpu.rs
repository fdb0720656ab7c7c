//! Host CPU load from `/proc/stat`.

use std::path::PathBuf;

/// Aggregate jiffies from the `cpu` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    idle: u64,
}

fn parse_cpu_line(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let mut next = || fields.next()?.parse::<u64>().ok();
    let (user, nice, system, idle) = (next()?, next()?, next()?, next()?);
    Some(CpuTimes {
        busy: user + nice + system,
        idle,
    })
}

/// Samples system-wide CPU load as the busy share since the previous sample.
///
/// Busy time is user + nice + system; the total adds idle. The first sample
/// covers the time since boot.
#[derive(Debug)]
pub struct CpuLoadSampler {
    path: PathBuf,
    last: CpuTimes,
}

impl Default for CpuLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuLoadSampler {
    /// Sampler reading `/proc/stat`.
    pub fn new() -> Self {
        Self::with_path("/proc/stat")
    }

    /// Sampler reading a different stat file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: CpuTimes::default(),
        }
    }

    /// Load in percent since the previous call. 0.0 if unavailable.
    pub fn sample(&mut self) -> f64 {
        let times = match std::fs::read_to_string(&self.path) {
            Ok(text) => parse_cpu_line(&text),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "cannot read cpu stats");
                None
            }
        };
        let Some(times) = times else {
            return 0.0;
        };

        let busy = times.busy.saturating_sub(self.last.busy);
        let idle = times.idle.saturating_sub(self.last.idle);
        self.last = times;

        let total = busy + idle;
        if total == 0 {
            0.0
        } else {
            100.0 * busy as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_line() {
        let stat = "cpu  100 20 30 850 5 0 0 0 0 0\ncpu0 50 10 15 425\n";
        assert_eq!(
            parse_cpu_line(stat),
            Some(CpuTimes {
                busy: 150,
                idle: 850
            })
        );
        assert_eq!(parse_cpu_line("intr 1 2 3"), None);
    }

    #[test]
    fn test_sample_uses_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stat");
        let mut sampler = CpuLoadSampler::with_path(&path);

        std::fs::write(&path, "cpu 100 0 0 300\n").unwrap();
        assert_eq!(sampler.sample(), 25.0);

        std::fs::write(&path, "cpu 150 10 40 400\n").unwrap();
        assert_eq!(sampler.sample(), 50.0);

        // unchanged counters
        assert_eq!(sampler.sample(), 0.0);
    }

    #[test]
    fn test_missing_file_reports_zero() {
        let mut sampler = CpuLoadSampler::with_path("/nonexistent/stat");
        assert_eq!(sampler.sample(), 0.0);
    }
}
