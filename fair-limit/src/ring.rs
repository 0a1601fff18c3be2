use std::fmt;

/// Capacity up to which the backing storage doubles when full.
pub const DEFAULT_DOUBLING_CEILING: usize = 1024;

/// Slots added per growth once the doubling ceiling has been reached.
pub const DEFAULT_GROWTH_STEP: usize = 256;

/// A growable circular FIFO.
///
/// Storage only ever grows: first by doubling up to a ceiling, then by a fixed
/// step. A limiter's queue settles at a steady-state depth, so the backing
/// slice stops reallocating once that depth has been seen.
pub struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
    ceiling: usize,
    step: usize,
}

impl<T> Ring<T> {
    /// Creates an empty ring with the default growth policy.
    pub fn new() -> Self {
        Self::with_growth(DEFAULT_DOUBLING_CEILING, DEFAULT_GROWTH_STEP)
    }

    /// Creates an empty ring which doubles up to `ceiling` slots and then
    /// grows by `step` slots at a time.
    pub fn with_growth(ceiling: usize, step: usize) -> Self {
        Self {
            slots: Box::default(),
            head: 0,
            len: 0,
            ceiling: ceiling.max(1),
            step: step.max(1),
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots allocated, queued or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pushes `item` at the tail, growing the storage if it is full.
    pub fn append(&mut self, item: T) {
        if self.len == self.capacity() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    /// The earliest entry still in the ring.
    pub fn peek_first(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Removes and returns the earliest entry still in the ring.
    pub fn pop_first(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.len -= 1;
        self.head = if self.len == 0 {
            0
        } else {
            (self.head + 1) % self.capacity()
        };
        item
    }

    fn next_capacity(&self) -> usize {
        let capacity = self.capacity();
        if capacity < self.ceiling {
            (capacity * 2).clamp(1, self.ceiling)
        } else {
            capacity + self.step
        }
    }

    // Moves the live window into fresh storage in logical order, so the head
    // always lands at slot 0 regardless of where the old window wrapped.
    fn grow(&mut self) {
        let capacity = self.capacity();
        let mut slots: Box<[Option<T>]> = std::iter::repeat_with(|| None)
            .take(self.next_capacity())
            .collect();
        for (offset, slot) in slots.iter_mut().take(self.len).enumerate() {
            *slot = self.slots[(self.head + offset) % capacity].take();
        }
        self.slots = slots;
        self.head = 0;
    }
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("head", &self.head)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
