//! Output sink and scoped output capture
//!
//! Everything the engine prints goes through a [`Sink`]. While a [`Capture`] is
//! alive, writes land in its buffer instead of the underlying writer. Dropping a
//! capture without finishing it throws the buffer away, which is how a failed
//! render leaves no partial output behind.

use std::cell::RefCell;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where printed output goes
pub struct Sink {
    target: Box<dyn Write + Send>,
    buffers: Vec<String>,
}

impl Sink {
    pub fn new(target: impl Write + Send + 'static) -> Self {
        Self {
            target: Box::new(target),
            buffers: Vec::new(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write to the innermost capture, or to the target when none is active
    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        match self.buffers.last_mut() {
            Some(buffer) => {
                buffer.push_str(text);
                Ok(())
            }
            None => self.target.write_all(text.as_bytes()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.target.flush()
    }

    pub fn is_capturing(&self) -> bool {
        !self.buffers.is_empty()
    }

    /// Number of nested captures currently active
    pub fn depth(&self) -> usize {
        self.buffers.len()
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("depth", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

/// An active output capture
///
/// Call [`Capture::finish`] to take the buffered output. A capture that is
/// dropped unfinished discards its buffer and any captures nested inside it.
#[must_use = "dropping a capture discards its output"]
pub struct Capture<'a> {
    sink: &'a RefCell<Sink>,
    depth: usize,
    finished: bool,
}

impl<'a> Capture<'a> {
    pub fn begin(sink: &'a RefCell<Sink>) -> Self {
        let depth = {
            let mut sink = sink.borrow_mut();
            sink.buffers.push(String::new());
            sink.buffers.len()
        };
        Self {
            sink,
            depth,
            finished: false,
        }
    }

    /// Stop capturing and return everything written since `begin`
    pub fn finish(mut self) -> String {
        self.finished = true;
        let mut sink = self.sink.borrow_mut();
        if sink.buffers.len() < self.depth {
            return String::new();
        }
        sink.buffers.truncate(self.depth);
        sink.buffers.pop().unwrap_or_default()
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // try_borrow_mut: a panic may unwind through an active borrow
        if let Ok(mut sink) = self.sink.try_borrow_mut() {
            sink.buffers.truncate(self.depth.saturating_sub(1));
        }
    }
}

/// Cloneable in-memory writer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
