//! A fixed-capacity ring buffer with O(1) insert/update/tail and a
//! chronological snapshot accessor, guarded by a single reader-writer
//! lock so `read`/`sorted` never observe a torn write.

use std::sync::RwLock;

struct Inner<T> {
    data: Vec<Option<T>>,
    /// Next write position.
    head: usize,
    /// Position of the oldest live element.
    tail: usize,
    count: usize,
    capacity: usize,
}

pub struct CircularBuffer<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> CircularBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "circular buffer capacity must be positive");
        Self {
            inner: RwLock::new(Inner {
                data: vec![None; capacity],
                head: 0,
                tail: 0,
                count: 0,
                capacity,
            }),
        }
    }

    /// Stores at `head`, advances `head mod size`; rotates `tail`
    /// forward (overwriting the oldest slot) once full. Returns the
    /// physical index the item was written at.
    pub fn insert(&self, item: T) -> usize {
        let mut inner = self.inner.write().expect("circular buffer lock poisoned");
        let idx = inner.head;
        inner.data[idx] = Some(item);
        inner.head = (inner.head + 1) % inner.capacity;
        if inner.count == inner.capacity {
            inner.tail = (inner.tail + 1) % inner.capacity;
        } else {
            inner.count += 1;
        }
        idx
    }

    /// Replaces the slot at `index` in place; does not touch
    /// head/tail/count.
    pub fn update(&self, index: usize, item: T) -> bool {
        let mut inner = self.inner.write().expect("circular buffer lock poisoned");
        if index >= inner.capacity {
            return false;
        }
        inner.data[index] = Some(item);
        true
    }

    /// Copy of the first `count` slots in raw physical (array) order.
    pub fn read(&self) -> Vec<T> {
        let inner = self.inner.read().expect("circular buffer lock poisoned");
        inner.data[..inner.count].iter().filter_map(|s| s.clone()).collect()
    }

    /// Copy in chronological order (oldest -> newest), starting at
    /// `tail`, length `count`.
    pub fn sorted(&self) -> Vec<T> {
        let inner = self.inner.read().expect("circular buffer lock poisoned");
        let mut out = Vec::with_capacity(inner.count);
        for i in 0..inner.count {
            let idx = (inner.tail + i) % inner.capacity;
            if let Some(item) = &inner.data[idx] {
                out.push(item.clone());
            }
        }
        out
    }

    /// The most recently inserted slot (physical), or `(None, -1)` if
    /// empty.
    pub fn tail(&self) -> (Option<T>, isize) {
        let inner = self.inner.read().expect("circular buffer lock poisoned");
        if inner.count == 0 {
            return (None, -1);
        }
        let idx = (inner.head + inner.capacity - 1) % inner.capacity;
        (inner.data[idx].clone(), idx as isize)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("circular buffer lock poisoned").count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().expect("circular buffer lock poisoned").capacity
    }
}
