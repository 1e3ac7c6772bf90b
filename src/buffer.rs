use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 5;

/// Fixed-capacity FIFO of the most recent readings.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    readings: VecDeque<f64>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, reading: f64) {
        self.readings.push_back(reading);
        if self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
    }

    /// Arithmetic mean of the buffered readings, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.iter().sum::<f64>() / self.len() as f64
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.readings.iter()
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
