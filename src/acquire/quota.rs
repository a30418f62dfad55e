/// Decision for one candidate sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Commit the sample
    Commit,
    /// Stop consuming the current split
    AbandonSplit,
}

/// Accumulated committed duration toward a per-language target, in seconds
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    target: f64,
    margin: f64,
    accumulated: f64,
}

impl QuotaTracker {
    pub fn new(target_secs: f64, margin_secs: f64) -> Self {
        Self {
            target: target_secs,
            margin: margin_secs,
            accumulated: 0.0,
        }
    }

    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn remaining(&self) -> f64 {
        (self.target - self.accumulated).max(0.0)
    }

    pub fn is_reached(&self) -> bool {
        self.accumulated >= self.target
    }

    pub fn would_exceed(&self, duration_secs: f64) -> bool {
        self.accumulated + duration_secs > self.target
    }

    /// Decide whether a sample of the given length may be committed.
    ///
    /// A sample that overshoots the target is still taken while a sizeable
    /// remainder is left. Once the remainder drops under the margin, an
    /// overshooting sample ends the split instead.
    pub fn admit(&self, duration_secs: f64) -> Admission {
        if self.is_reached() {
            Admission::AbandonSplit
        } else if !self.would_exceed(duration_secs) {
            Admission::Commit
        } else if self.remaining() < self.margin {
            Admission::AbandonSplit
        } else {
            Admission::Commit
        }
    }

    pub fn commit(&mut self, duration_secs: f64) {
        self.accumulated += duration_secs;
    }
}
