use serde::Serialize;
use std::time::{Duration, Instant};

pub struct ScopedTimer {
    name: &'static str,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::info!("{} took {:?}", self.name, self.start.elapsed());
    }
}

/// Elapsed time and resident memory change over one stage.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StageReading {
    pub elapsed: Duration,
    pub memory_delta_kb: i64,
}

pub struct StageMeter {
    start: Instant,
    rss_kb: Option<i64>,
}

impl StageMeter {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            rss_kb: resident_kb(),
        }
    }

    pub fn finish(self) -> StageReading {
        let memory_delta_kb = match (self.rss_kb, resident_kb()) {
            (Some(before), Some(after)) => after - before,
            _ => 0,
        };
        StageReading {
            elapsed: self.start.elapsed(),
            memory_delta_kb,
        }
    }
}

/// `VmRSS` from `/proc/self/status`, `None` on platforms without procfs.
pub fn resident_kb() -> Option<i64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<i64> {
    status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vm_rss_line() {
        let status = "Name:\trouter\nVmPeak:\t  9000 kB\nVmRSS:\t  4242 kB\nThreads:\t8\n";
        assert_eq!(parse_vm_rss(status), Some(4242));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[test]
    fn meter_measures_elapsed_time() {
        let meter = StageMeter::start();
        std::thread::sleep(Duration::from_millis(2));
        let reading = meter.finish();
        assert!(reading.elapsed >= Duration::from_millis(2));
    }
}
