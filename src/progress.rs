use std::time::Instant;

/// Elapsed-time-stamped stage and batch progress, reported through `tracing`.
pub struct RunProgress {
    enabled: bool,
    t0: Instant,
}

impl RunProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.elapsed_secs());
        tracing::info!("[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.elapsed_secs());
        tracing::info!("[{ts}] {}", progress_line(label, current, total));
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new(true)
    }
}

fn progress_line(label: &str, current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let pct = (current as f64 / total as f64) * 100.0;
    format!("{label} {current}/{total} ({pct:.1}%)")
}

pub fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_switches_to_hours() {
        assert_eq!(fmt_elapsed(65.4), "01:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-3.0), "00:00");
    }

    #[test]
    fn progress_line_is_clamped() {
        assert_eq!(progress_line("batch", 3, 7), "batch 3/7 (42.9%)");
        assert_eq!(progress_line("batch", 9, 0), "batch 1/1 (100.0%)");
    }
}
