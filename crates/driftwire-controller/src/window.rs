//! Sliding window over recent feed-state samples.

use driftwire_types::FeedState;

/// Fixed-size ring of the most recent feed-state samples, used to detect
/// sudden degradation from a long stable run.
///
/// The window is *stable* only once it holds a full `capacity` of samples
/// and every one of them is [`FeedState::Normal`]. A running count keeps
/// the stability check O(1).
#[derive(Debug)]
pub struct StateWindow {
    slots: Box<[FeedState]>,
    /// Index of the oldest sample once the ring is full.
    head: usize,
    len: usize,
    normal: usize,
}

impl StateWindow {
    /// An empty window holding up to `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "state window capacity must be non-zero");
        Self {
            slots: vec![FeedState::Normal; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            normal: 0,
        }
    }

    /// Append a sample, evicting the oldest once the ring is full.
    pub fn push(&mut self, state: FeedState) {
        if self.len == self.slots.len() {
            if self.slots[self.head] == FeedState::Normal {
                self.normal -= 1;
            }
            self.slots[self.head] = state;
            self.head = (self.head + 1) % self.slots.len();
        } else {
            let tail = (self.head + self.len) % self.slots.len();
            self.slots[tail] = state;
            self.len += 1;
        }
        if state == FeedState::Normal {
            self.normal += 1;
        }
    }

    /// True when the window is full and every sample is `Normal`.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.len == self.slots.len() && self.normal == self.len
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
