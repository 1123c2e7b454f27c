use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::models::audio_models::AudioChunk;
use crate::models::error::RecorderError;

#[derive(Debug, Default)]
struct Queue {
    chunks: VecDeque<AudioChunk>,
    samples: usize,
    peak_chunks: usize,
}

/// Thread-safe hand-off queue between the capture callback and the flush loop.
///
/// One producer pushes, one consumer drains. Both sides hold the lock only
/// long enough to move a chunk in or swap the queue out, so the capture
/// callback never waits on disk I/O.
///
/// Unlike a ring buffer this never drops old data: if the consumer falls
/// behind, memory grows. An optional sample cap turns that growth into a
/// `BufferOverflow` instead.
#[derive(Debug)]
pub struct FrameBuffer {
    queue: Mutex<Queue>,
    max_samples: Option<usize>,
    overflowed: AtomicBool,
}

impl FrameBuffer {
    /// An unbounded buffer.
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    /// A buffer that refuses pushes once `max_samples` would be exceeded.
    pub fn with_capacity_limit(max_samples: Option<usize>) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            max_samples,
            overflowed: AtomicBool::new(false),
        }
    }

    /// Append a chunk.
    ///
    /// Fails only when a cap is configured and the chunk would exceed it;
    /// the chunk is then discarded and the overflow flag is latched.
    pub fn push(&self, chunk: AudioChunk) -> Result<(), RecorderError> {
        let mut queue = self.queue.lock();
        if let Some(capacity) = self.max_samples {
            if queue.samples + chunk.len() > capacity {
                drop(queue);
                self.overflowed.store(true, Ordering::Release);
                return Err(RecorderError::BufferOverflow { capacity });
            }
        }
        queue.samples += chunk.len();
        queue.chunks.push_back(chunk);
        queue.peak_chunks = queue.peak_chunks.max(queue.chunks.len());
        Ok(())
    }

    /// Remove and return every buffered chunk, oldest first.
    pub fn drain_all(&self) -> Vec<AudioChunk> {
        let taken = {
            let mut queue = self.queue.lock();
            queue.samples = 0;
            std::mem::take(&mut queue.chunks)
        };
        taken.into()
    }

    /// Number of buffered chunks.
    pub fn len(&self) -> usize {
        self.queue.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().chunks.is_empty()
    }

    /// Number of buffered samples across all chunks.
    pub fn buffered_samples(&self) -> usize {
        self.queue.lock().samples
    }

    /// Highest chunk count seen at once since creation.
    pub fn peak_buffered_chunks(&self) -> usize {
        self.queue.lock().peak_chunks
    }

    /// Returns the overflow error once if a push has been refused.
    pub fn take_overflow(&self) -> Option<RecorderError> {
        if self.overflowed.swap(false, Ordering::AcqRel) {
            self.max_samples
                .map(|capacity| RecorderError::BufferOverflow { capacity })
        } else {
            None
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
