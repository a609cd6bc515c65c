// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Fixed-capacity circular byte buffer holding the most recent terminal output.
///
/// Writes past capacity trim the oldest bytes from the front, so `len()` never
/// exceeds `capacity()`. The total number of bytes ever written is tracked so
/// callers can address output by global offset.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    capacity: usize,
    write_pos: usize,
    total_written: u64,
}

impl RingBuffer {
    /// Create a new ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity], capacity, write_pos: 0, total_written: 0 }
    }

    /// Append data, discarding the oldest bytes once full.
    pub fn write(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        // Only the tail that can survive is worth copying.
        let skip = data.len().saturating_sub(self.capacity);
        if skip > 0 {
            self.total_written += skip as u64;
            self.write_pos = (self.write_pos + skip) % self.capacity;
        }
        let chunk = &data[skip..];

        let start = self.write_pos;
        let end = start + chunk.len();
        if end <= self.capacity {
            self.buf[start..end].copy_from_slice(chunk);
        } else {
            let first = self.capacity - start;
            self.buf[start..self.capacity].copy_from_slice(&chunk[..first]);
            self.buf[..chunk.len() - first].copy_from_slice(&chunk[first..]);
        }

        self.write_pos = end % self.capacity;
        self.total_written += chunk.len() as u64;
    }

    /// Read bytes starting from the given global byte offset.
    ///
    /// Returns `None` if the offset has already been trimmed or lies beyond
    /// the write position. Otherwise returns one or two slices covering the
    /// requested range in order.
    pub fn read_from(&self, offset: u64) -> Option<(&[u8], &[u8])> {
        if offset > self.total_written || offset < self.oldest_offset() {
            return None;
        }

        let available = (self.total_written - offset) as usize;
        if available == 0 {
            return Some((&[], &[]));
        }

        let start = if self.write_pos >= available {
            self.write_pos - available
        } else {
            self.capacity - (available - self.write_pos)
        };

        if start + available <= self.capacity {
            Some((&self.buf[start..start + available], &[]))
        } else {
            let first = self.capacity - start;
            Some((&self.buf[start..self.capacity], &self.buf[..available - first]))
        }
    }

    /// Everything currently retained, oldest first.
    pub fn contents(&self) -> Vec<u8> {
        let (a, b) = self.read_from(self.oldest_offset()).unwrap_or((&[], &[]));
        [a, b].concat()
    }

    /// Number of bytes currently retained.
    pub fn len(&self) -> usize {
        (self.total_written - self.oldest_offset()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all retained output and reset offsets.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.total_written = 0;
    }

    /// Total bytes ever written through this buffer since the last clear.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    fn oldest_offset(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity as u64)
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
