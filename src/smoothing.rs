use std::{collections::VecDeque, num::NonZeroUsize};

/// Trailing window of the most recent rates. The oldest sample is evicted once full.
#[derive(Debug)]
pub struct SmoothingWindow {
    samples: VecDeque<f32>,
    capacity: NonZeroUsize,
}

impl SmoothingWindow {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity.get()), capacity }
    }

    /// Records a sample and returns the mean of the window contents.
    pub fn push(&mut self, sample: f32) -> f32 {
        if self.samples.len() == self.capacity.get() {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        let sum: f32 = self.samples.iter().sum();
        sum / self.samples.len() as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
