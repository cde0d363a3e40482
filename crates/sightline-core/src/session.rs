//! Multi-frame voting before a face match is accepted.
//!
//! A single confident frame is not enough to log someone in; the session
//! requires a consecutive run of confident predictions and finalizes on
//! the majority label of the window. Any frame failing the distance
//! threshold empties the window, so the run must restart from zero.

/// Per-scan accumulator of recent accepted predictions.
pub struct VoteSession {
    window: Vec<usize>,
    window_size: usize,
    threshold: f32,
}

impl VoteSession {
    /// `window_size` consecutive confident frames are required;
    /// predictions at or above `threshold` distance reset the window.
    pub fn new(window_size: usize, threshold: f32) -> Self {
        Self {
            window: Vec::with_capacity(window_size.max(1)),
            window_size: window_size.max(1),
            threshold,
        }
    }

    /// Feed one prediction. Returns the majority label once the window
    /// fills, resetting the session for the next scan.
    pub fn observe(&mut self, label: usize, distance: f32) -> Option<usize> {
        if distance >= self.threshold {
            self.window.clear();
            return None;
        }

        self.window.push(label);
        if self.window.len() < self.window_size {
            return None;
        }

        let winner = self.majority();
        self.window.clear();
        Some(winner)
    }

    /// Discard any accumulated state (scan stopped or cancelled).
    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn accumulated(&self) -> usize {
        self.window.len()
    }

    /// Most frequent label in the window; ties go to the earliest observed.
    fn majority(&self) -> usize {
        let mut best_label = self.window[0];
        let mut best_count = 0usize;
        for &candidate in &self.window {
            let count = self.window.iter().filter(|&&l| l == candidate).count();
            if count > best_count {
                best_count = count;
                best_label = candidate;
            }
        }
        best_label
    }
}
