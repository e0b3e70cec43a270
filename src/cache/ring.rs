/// Fixed-capacity circular buffer.
///
/// Storage is allocated once at construction. Until the buffer fills, `push`
/// appends into the reserved capacity; afterwards it overwrites the oldest
/// slot and hands the evicted value back. Neither path allocates.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    head: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// Append an item, returning the evicted oldest item when full
    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return None;
        }

        let evicted = std::mem::replace(&mut self.slots[self.head], item);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Item at logical position `index`, 0 being the oldest
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.slots.len() {
            return None;
        }
        let physical = (self.head + index) % self.slots.len();
        self.slots.get(physical)
    }

    pub fn oldest(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn newest(&self) -> Option<&T> {
        self.slots.len().checked_sub(1).and_then(|last| self.get(last))
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (wrapped, front) = self.slots.split_at(self.head);
        front.iter().chain(wrapped.iter())
    }

    /// Iterate from logical position `start` to the newest item
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &T> + '_ {
        self.iter().skip(start)
    }

    /// Drop every item, keeping the allocation
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}
