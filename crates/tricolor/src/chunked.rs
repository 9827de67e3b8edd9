//! Append-only chunked storage.

/// Append-only buffer made of fixed-capacity chunks.
///
/// The first chunk is reserved on construction and every further chunk is
/// reserved whole when the previous one fills, so existing entries never move
/// and an append is O(1) amortized.
#[derive(Debug, Clone)]
pub struct ChunkedBuffer<T> {
    chunks: Vec<Vec<T>>,
    chunk_capacity: usize,
    len: usize,
}

impl<T> ChunkedBuffer<T> {
    /// Create a buffer whose chunks hold `chunk_capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_capacity` is zero.
    #[must_use]
    pub fn new(chunk_capacity: usize) -> Self {
        assert!(chunk_capacity > 0, "chunk capacity must be non-zero");
        Self {
            chunks: vec![Vec::with_capacity(chunk_capacity)],
            chunk_capacity,
            len: 0,
        }
    }

    /// Entries per chunk.
    #[must_use]
    pub const fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks currently reserved.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append an entry.
    pub fn push(&mut self, value: T) {
        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len() == self.chunk_capacity);
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(self.chunk_capacity));
        }
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.push(value);
            self.len += 1;
        }
    }

    /// Iterate over entries in append order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks.iter().flatten()
    }

    /// Remove every entry, keeping the first chunk reserved.
    pub fn clear(&mut self) {
        self.chunks.truncate(1);
        if let Some(first) = self.chunks.first_mut() {
            first.clear();
        }
        self.len = 0;
    }

    /// Move every entry out in append order, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &mut self.chunks {
            out.append(chunk);
        }
        // `append` leaves the emptied chunks with their capacity.
        self.chunks.truncate(1);
        self.len = 0;
        out
    }
}

impl<'a, T> IntoIterator for &'a ChunkedBuffer<T> {
    type Item = &'a T;
    type IntoIter = std::iter::Flatten<std::slice::Iter<'a, Vec<T>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_spills_into_new_chunks() {
        let mut buffer = ChunkedBuffer::new(4);
        for i in 0..10 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.chunk_count(), 3);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_existing_entries_never_move() {
        let mut buffer = ChunkedBuffer::new(2);
        buffer.push(String::from("a"));
        buffer.push(String::from("b"));
        let first = buffer.iter().next().map(|s| s.as_ptr());
        buffer.push(String::from("c"));
        assert_eq!(buffer.iter().next().map(|s| s.as_ptr()), first);
    }

    #[test]
    fn test_clear_keeps_first_chunk() {
        let mut buffer = ChunkedBuffer::new(2);
        for i in 0..5 {
            buffer.push(i);
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 1);
        buffer.push(7);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_take_drains_in_order() {
        let mut buffer = ChunkedBuffer::new(3);
        for i in 0..7 {
            buffer.push(i);
        }
        assert_eq!(buffer.take(), (0..7).collect::<Vec<_>>());
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 1);
    }
}
