//! Fixed-capacity sliding window for real-time analysis paths.

/// Fixed-capacity ring that keeps the most recent `capacity` values.
///
/// Once full, every push overwrites the oldest element. The buffer never
/// allocates after construction and never shifts memory; `copy_to` linearizes
/// the contents oldest-first with at most two slice copies.
#[derive(Debug, Clone)]
pub struct RingBuffer<T>
where
    T: Copy + Default,
{
    data: Vec<T>,
    /// Index the next push writes to; also the oldest element once full.
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T>
where
    T: Copy + Default,
{
    /// Creates a ring buffer with fixed capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: vec![T::default(); cap],
            head: 0,
            len: 0,
        }
    }

    /// Returns the number of elements currently stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns true when no elements are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true once `capacity` elements have been pushed.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Forgets all stored elements.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = T::default());
        self.head = 0;
        self.len = 0;
    }

    /// Pushes one element, overwriting the oldest when full.
    #[inline]
    pub fn push(&mut self, value: T) {
        let cap = self.capacity();
        if cap == 0 {
            return;
        }
        self.data[self.head] = value;
        self.head = (self.head + 1) % cap;
        if self.len < cap {
            self.len += 1;
        }
    }

    /// Copies the stored elements oldest-first into `out`.
    ///
    /// Returns the number of copied elements (`min(out.len(), len())`).
    pub fn copy_to(&self, out: &mut [T]) -> usize {
        let to_copy = out.len().min(self.len);
        if to_copy == 0 {
            return 0;
        }
        let cap = self.capacity();
        let start = (self.head + cap - self.len) % cap;
        let first = to_copy.min(cap - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        let second = to_copy - first;
        if second > 0 {
            out[first..to_copy].copy_from_slice(&self.data[..second]);
        }
        to_copy
    }

    /// Returns the most recently pushed element.
    pub fn newest(&self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let cap = self.capacity();
        Some(self.data[(self.head + cap - 1) % cap])
    }
}
