//! Latest-wins hand-off between the relay task and its consumer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::frame::{Delivery, Frame, FrameError};

/// Bounded buffer where a new frame discards everything not yet delivered.
///
/// Decode errors queue behind the current frame so the consumer still sees
/// them; when the buffer is full the oldest error is dropped. The undelivered
/// frame is never evicted by errors.
#[derive(Debug)]
pub struct FrameBuffer {
    entries: Mutex<VecDeque<Delivery>>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Delivery>> {
        // Entries are replaced whole, so a poisoned queue is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace whatever is buffered with `frame`.
    pub fn push_frame(&self, frame: Frame) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        entries.push_back(Delivery::Frame(frame));
        if dropped > 0 {
            log::trace!("Dropped {} undelivered entries", dropped);
        }
    }

    pub fn push_error(&self, error: FrameError) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            match entries.iter().position(|entry| entry.error().is_some()) {
                Some(oldest) => {
                    entries.remove(oldest);
                }
                None => {
                    log::trace!("Buffer holds only a frame, dropping error: {}", error);
                    return;
                }
            }
        }
        entries.push_back(Delivery::Error(error));
    }

    /// Take the next entry without waiting. `None` means no data yet.
    pub fn take(&self) -> Option<Delivery> {
        self.lock().pop_front()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
