/// Accumulation bookkeeping for the current render target. Mutated only by
/// the session; the viewer panel reads it to draw the progress bar.
#[derive(Debug, Clone, Copy)]
pub struct ProgressState {
    sample_count: u32,
    min_samples: u32,
    max_samples: u32,
    needs_more: bool,
}

impl ProgressState {
    pub fn new(min_samples: u32, max_samples: u32) -> Self {
        ProgressState {
            sample_count: 1,
            min_samples,
            max_samples,
            needs_more: true,
        }
    }

    /// Restart accumulation from scratch; used whenever a render-affecting
    /// option changes (resize, mark_dirty).
    pub fn reset(&mut self) {
        self.sample_count = 1;
        self.needs_more = true;
    }

    /// One sample batch landed in the display texture.
    pub(crate) fn record_batch(&mut self) {
        self.sample_count = u32::min(self.sample_count + 1, self.max_samples);
        if self.sample_count >= self.max_samples {
            self.needs_more = false;
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn min_samples(&self) -> u32 {
        self.min_samples
    }

    pub fn max_samples(&self) -> u32 {
        self.max_samples
    }

    pub fn needs_more(&self) -> bool {
        self.needs_more
    }

    /// Enough samples accumulated for the image to be worth showing.
    pub fn ready(&self) -> bool {
        self.sample_count >= self.min_samples
    }

    pub fn complete(&self) -> bool {
        !self.needs_more && self.sample_count >= self.max_samples
    }

    /// Percentage in `0.0..=100.0`.
    pub fn ratio(&self) -> f32 {
        self.sample_count as f32 / self.max_samples as f32 * 100.0
    }
}
