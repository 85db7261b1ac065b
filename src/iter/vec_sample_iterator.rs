use std::sync::Arc;
use crate::common::{Sample, Timestamp};
use crate::error::StorageError;
use crate::storage::SampleIterator;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Cursor {
    BeforeStart,
    At(usize),
    Exhausted,
}

/// Cursor over a shared, timestamp-ordered sample buffer.
#[derive(Debug, Clone)]
pub struct VecSampleIterator {
    samples: Arc<[Sample]>,
    cursor: Cursor,
}

impl VecSampleIterator {
    pub fn new(samples: Arc<[Sample]>) -> Self {
        Self {
            samples,
            cursor: Cursor::BeforeStart,
        }
    }

    fn move_to(&mut self, idx: usize) -> bool {
        if idx < self.samples.len() {
            self.cursor = Cursor::At(idx);
            true
        } else {
            self.cursor = Cursor::Exhausted;
            false
        }
    }
}

impl From<Vec<Sample>> for VecSampleIterator {
    fn from(value: Vec<Sample>) -> Self {
        Self::new(value.into())
    }
}

impl SampleIterator for VecSampleIterator {
    fn next(&mut self) -> bool {
        match self.cursor {
            Cursor::BeforeStart => self.move_to(0),
            Cursor::At(idx) => self.move_to(idx + 1),
            Cursor::Exhausted => false,
        }
    }

    fn seek(&mut self, t: Timestamp) -> bool {
        let from = match self.cursor {
            Cursor::BeforeStart => 0,
            Cursor::At(idx) => {
                if self.samples[idx].timestamp >= t {
                    return true;
                }
                idx + 1
            }
            Cursor::Exhausted => return false,
        };
        let offset = self.samples[from..].partition_point(|s| s.timestamp < t);
        self.move_to(from + offset)
    }

    fn at(&self) -> Option<Sample> {
        match self.cursor {
            Cursor::At(idx) => self.samples.get(idx).copied(),
            _ => None,
        }
    }

    fn err(&self) -> Option<&StorageError> {
        None
    }
}
