//! Upstream sample window and its multi-cursor consumer.
//!
//! One producer appends complex baseband buffers; any number of worker
//! tasks read the same stream through independent cursors. The window is
//! trimmed to the slowest attached cursor and bounded, so a stalled
//! producer or consumer cannot grow it without limit. While no cursor is
//! attached the window slides instead of blocking the producer.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use num_complex::Complex32;
use serde::Serialize;

/// Standard source buffer size, in samples. Producers are expected to
/// deliver buffers of roughly this size, and detector windows match it.
pub const SOURCE_BUFSIZ: usize = 512;

/// Retained window bound, in samples.
const WINDOW_MAX: usize = 8 * SOURCE_BUFSIZ;

/// A spectral region of the source: center frequency and bandwidth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Channel {
    /// Center frequency, Hz.
    pub fc: f32,
    /// Bandwidth, Hz.
    pub bw: f32,
}

/// Cursor identifier handed to a worker task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

struct WindowState {
    window: Vec<Complex32>,
    /// Absolute index of `window[0]` within the stream.
    base: u64,
    eos: bool,
    cursors: HashMap<usize, u64>,
    next_task: usize,
}

impl WindowState {
    fn end(&self) -> u64 {
        self.base + self.window.len() as u64
    }

    /// Drops samples no attached cursor can still reach.
    fn trim(&mut self) {
        let Some(&min) = self.cursors.values().min() else {
            return;
        };
        let drop = (min.saturating_sub(self.base)) as usize;
        if drop > 0 {
            self.window.drain(..drop);
            self.base += drop as u64;
        }
    }
}

/// Shared sample stream with per-task read cursors.
pub struct Consumer {
    samp_rate: f32,
    state: Mutex<WindowState>,
    /// Signaled when samples arrive or the stream ends.
    readable: Condvar,
    /// Signaled when window space frees up.
    writable: Condvar,
}

impl Consumer {
    pub fn new(samp_rate: f32) -> Self {
        Self {
            samp_rate,
            state: Mutex::new(WindowState {
                window: Vec::new(),
                base: 0,
                eos: false,
                cursors: HashMap::new(),
                next_task: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn samp_rate(&self) -> f32 {
        self.samp_rate
    }

    /// Appends samples, blocking while the window is full and a cursor is
    /// attached. Without cursors the window slides forward instead.
    pub fn write(&self, samples: &[Complex32]) {
        let mut remaining = samples;
        let mut st = self.state.lock().unwrap();
        while !remaining.is_empty() {
            if st.eos {
                return;
            }
            let room = WINDOW_MAX.saturating_sub(st.window.len());
            if room == 0 {
                if st.cursors.is_empty() {
                    // Live stream with nobody listening: slide.
                    let drop = remaining.len().min(st.window.len());
                    st.window.drain(..drop);
                    st.base += drop as u64;
                    continue;
                }
                st = self.writable.wait(st).unwrap();
                continue;
            }
            let n = room.min(remaining.len());
            st.window.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            self.readable.notify_all();
        }
    }

    /// Marks end of stream and wakes every waiting reader.
    pub fn finish(&self) {
        let mut st = self.state.lock().unwrap();
        st.eos = true;
        drop(st);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Attaches a new cursor at the oldest retained sample.
    pub fn add_task(&self) -> TaskId {
        let mut st = self.state.lock().unwrap();
        let id = st.next_task;
        st.next_task += 1;
        let base = st.base;
        st.cursors.insert(id, base);
        TaskId(id)
    }

    /// Detaches a cursor, letting the window advance past it.
    pub fn remove_task(&self, task: TaskId) {
        let mut st = self.state.lock().unwrap();
        if st.cursors.remove(&task.0).is_some() {
            st.trim();
            drop(st);
            self.writable.notify_all();
        }
    }

    /// Blocks until samples past the task's cursor exist, then returns a
    /// bounded copy of them. `None` means the stream ended (or the cursor
    /// was detached) and no samples remain for this task.
    pub fn assert_samples(&self, task: TaskId) -> Option<Vec<Complex32>> {
        let mut st = self.state.lock().unwrap();
        loop {
            let cursor = *st.cursors.get(&task.0)?;
            if cursor < st.end() {
                let off = (cursor - st.base) as usize;
                let n = (st.window.len() - off).min(SOURCE_BUFSIZ);
                return Some(st.window[off..off + n].to_vec());
            }
            if st.eos {
                return None;
            }
            st = self.readable.wait(st).unwrap();
        }
    }

    /// Advances the task's cursor by `n` consumed samples.
    pub fn advance(&self, task: TaskId, n: usize) {
        let mut st = self.state.lock().unwrap();
        if let Some(cursor) = st.cursors.get_mut(&task.0) {
            *cursor += n as u64;
            st.trim();
            drop(st);
            self.writable.notify_all();
        }
    }
}
