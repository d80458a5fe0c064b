use crate::prelude::SdrError;

/// Bounded pool of raw transfer blocks so acquisition never allocates without limit.
pub struct BufferPool {
    buffers: Vec<Vec<u8>>,
    outstanding: usize,
    max_capacity: usize,
}

impl BufferPool {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_capacity),
            outstanding: 0,
            max_capacity,
        }
    }

    /// Hands out a zeroed block of `length` bytes, reusing a released one when possible.
    pub fn checkout(&mut self, length: usize) -> Result<Vec<u8>, SdrError> {
        if let Some(mut buffer) = self.buffers.pop() {
            buffer.resize(length, 0);
            self.outstanding += 1;
            Ok(buffer)
        } else if self.outstanding < self.max_capacity {
            self.outstanding += 1;
            Ok(vec![0; length])
        } else {
            Err(SdrError::ResourceExhausted(format!(
                "all {} transfer blocks checked out",
                self.max_capacity
            )))
        }
    }

    /// Returns a block back to the pool for reuse.
    pub fn release(&mut self, mut buffer: Vec<u8>) {
        buffer.clear();
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_capacity {
            self.buffers.push(buffer);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}
