use parking_lot::RwLock;

/// Initial reservation for the trace buffer; matches the ingest read bound so
/// the first session never reallocates.
pub const INITIAL_CAPACITY: usize = 1024 * 1024;

/// Append-only store of every trace byte ingested during the process lifetime.
///
/// The bytes and the fill cursor live behind one lock so a reader sees either
/// the state before an append or the state after it, never a torn mix. The
/// fill cursor is kept separately from `Vec::len` to make the publish point
/// explicit: bytes are copied first, the cursor moves second, both under the
/// same write guard.
pub struct TraceBuffer {
    inner: RwLock<BufferInner>,
}

struct BufferInner {
    bytes: Vec<u8>,
    fill: usize,
}

/// A contiguous slice of the buffer copied out under a single read guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub start: usize,
    pub end: usize,
    pub bytes: Vec<u8>,
}

impl Delta {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(BufferInner {
                bytes: Vec::with_capacity(capacity),
                fill: 0,
            }),
        }
    }

    /// Appends `chunk` and publishes the new fill cursor, returning it.
    pub fn append(&self, chunk: &[u8]) -> usize {
        let mut guard = self.inner.write();
        guard.bytes.extend_from_slice(chunk);
        guard.fill = guard.bytes.len();
        guard.fill
    }

    pub fn fill_cursor(&self) -> usize {
        self.inner.read().fill
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().bytes.capacity()
    }

    /// Copies `[from, fill)` out of the buffer. Returns `None` when `from` is
    /// at or past the fill cursor.
    pub fn delta_from(&self, from: usize) -> Option<Delta> {
        let guard = self.inner.read();
        if from >= guard.fill {
            return None;
        }
        Some(Delta {
            start: from,
            end: guard.fill,
            bytes: guard.bytes[from..guard.fill].to_vec(),
        })
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new()
    }
}
