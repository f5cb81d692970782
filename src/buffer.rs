use std::collections::VecDeque;

/// An appendable, prunable sequence of items tagged with monotonically
/// increasing sequence numbers.
///
/// The buffer is a contiguous arena: the item at sequence number `s` lives
/// at index `s - start_seq`. Append and lookup are O(1); pruning pops from
/// the front and is O(k) in items removed. The buffer itself knows nothing
/// about consumers; the owning stream decides the prune watermark.
#[derive(Debug, Clone)]
pub struct OrderedBuffer<T> {
    items: VecDeque<T>,
    start_seq: u64,
}

impl<T> OrderedBuffer<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            start_seq: 0,
        }
    }

    /// Append a value and return its sequence number.
    pub fn append(&mut self, value: T) -> u64 {
        let seq = self.next_seq();
        self.items.push_back(value);
        seq
    }

    /// Look up the value at a sequence number. Returns `None` for pruned
    /// and not-yet-appended sequence numbers alike.
    pub fn get(&self, seq: u64) -> Option<&T> {
        if seq < self.start_seq {
            return None;
        }
        self.items.get((seq - self.start_seq) as usize)
    }

    /// Drop every item with a sequence number below `min_retained` and
    /// return how many were removed.
    pub fn prune(&mut self, min_retained: u64) -> usize {
        let mut removed = 0;
        while self.start_seq < min_retained && !self.items.is_empty() {
            self.items.pop_front();
            self.start_seq += 1;
            removed += 1;
        }
        removed
    }

    /// Sequence number the next appended value will receive.
    pub fn next_seq(&self) -> u64 {
        self.start_seq + self.items.len() as u64
    }

    /// Oldest retained sequence number (equal to `next_seq` when empty).
    pub fn start_seq(&self) -> u64 {
        self.start_seq
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for OrderedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
