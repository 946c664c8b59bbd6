//! Smoothing buffer for hue samples
//!
//! Collects successive per-frame hues and emits their mean once the buffer
//! is full, so single-frame noise doesn't make the lights flicker.

use crate::HueSample;

/// Fixed-capacity accumulator of hue samples.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    capacity: usize,
    samples: Vec<HueSample>,
}

impl SampleBuffer {
    /// Create a buffer that flushes after `capacity` samples.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample. Returns the mean and clears the buffer once full.
    pub fn push(&mut self, sample: HueSample) -> Option<HueSample> {
        self.samples.push(sample);
        if self.samples.len() >= self.capacity {
            self.flush()
        } else {
            None
        }
    }

    /// Mean of whatever is buffered, then clear. `None` when empty.
    pub fn flush(&mut self) -> Option<HueSample> {
        let mean = mean(&self.samples);
        self.samples.clear();
        mean
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Truncated integer mean
fn mean(samples: &[HueSample]) -> Option<HueSample> {
    if samples.is_empty() {
        return None;
    }
    let sum: u64 = samples.iter().map(|&s| u64::from(s)).sum();
    // mean of u16 values always fits back into u16
    Some((sum / samples.len() as u64) as HueSample)
}
