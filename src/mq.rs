//! Condition-variable-synchronized message queue.
//!
//! A singly-linked FIFO of message nodes guarded by one mutex and one
//! broadcast condition variable. Normal writes append, urgent writes
//! prepend, and readers may filter by message kind; a kind-filtered read
//! pops the first matching message and leaves the relative order of the
//! rest untouched. Every push broadcasts, because waiters carry disjoint
//! kind filters and all of them must re-evaluate.
//!
//! Node headers are recycled through a process-wide free list so steady
//! traffic does not churn the allocator. Payloads are never pooled. The
//! free list is capped; growth past each warning step is logged once.

use std::ptr;
use std::sync::{Condvar, Mutex};

use log::warn;

use crate::error::MqError;
use crate::msg::{Message, MsgKind};

/// Free nodes kept beyond this count go back to the allocator.
const POOL_MAX: usize = 4096;
/// A diagnostic is emitted each time the pool's peak crosses a multiple of
/// this step.
const POOL_WARN_STEP: usize = 1024;

struct Node {
    msg: Option<Message>,
    /// Queue link, reused as the free-list link while pooled.
    next: Option<Box<Node>>,
}

struct PoolState {
    free: Option<Box<Node>>,
    len: usize,
    peak: usize,
}

static POOL: Mutex<PoolState> = Mutex::new(PoolState {
    free: None,
    len: 0,
    peak: 0,
});

fn alloc_node(msg: Message) -> Box<Node> {
    let recycled = {
        let mut pool = POOL.lock().unwrap_or_else(|e| e.into_inner());
        pool.free.take().map(|mut node| {
            pool.free = node.next.take();
            pool.len -= 1;
            node
        })
    };
    match recycled {
        Some(mut node) => {
            node.msg = Some(msg);
            node
        }
        None => Box::new(Node {
            msg: Some(msg),
            next: None,
        }),
    }
}

fn release_node(mut node: Box<Node>) {
    node.msg = None;
    node.next = None;
    let mut warn_peak = None;
    let excess = {
        let mut pool = POOL.lock().unwrap_or_else(|e| e.into_inner());
        if pool.len >= POOL_MAX {
            Some(node)
        } else {
            node.next = pool.free.take();
            pool.free = Some(node);
            pool.len += 1;
            if pool.len > pool.peak {
                let old_step = pool.peak / POOL_WARN_STEP;
                pool.peak = pool.len;
                if pool.peak / POOL_WARN_STEP > old_step {
                    warn_peak = Some(pool.peak);
                }
            }
            None
        }
    };
    // Both the log call and the excess-node free happen outside the lock.
    drop(excess);
    if let Some(peak) = warn_peak {
        warn!("message node pool grew to {} free nodes", peak);
    }
}

#[cfg(test)]
pub(crate) fn pool_free_len() -> usize {
    POOL.lock().unwrap_or_else(|e| e.into_inner()).len
}

/// The linked FIFO proper. `tail` points into the chain owned by `head`;
/// it is null iff the queue is empty.
struct Fifo {
    head: Option<Box<Node>>,
    tail: *mut Node,
    len: usize,
}

impl Fifo {
    const fn new() -> Self {
        Self {
            head: None,
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    fn push_back(&mut self, mut node: Box<Node>) {
        node.next = None;
        let raw: *mut Node = &mut *node;
        if self.tail.is_null() {
            self.head = Some(node);
        } else {
            unsafe { (*self.tail).next = Some(node) };
        }
        self.tail = raw;
        self.len += 1;
    }

    fn push_front(&mut self, mut node: Box<Node>) {
        let raw: *mut Node = &mut *node;
        node.next = self.head.take();
        if self.tail.is_null() {
            self.tail = raw;
        }
        self.head = Some(node);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<Box<Node>> {
        let mut node = self.head.take()?;
        self.head = node.next.take();
        if self.head.is_none() {
            self.tail = ptr::null_mut();
        }
        self.len -= 1;
        Some(node)
    }

    /// Unlinks the first node whose message has the given kind; the order
    /// of the remaining nodes is preserved.
    fn remove_first(&mut self, kind: MsgKind) -> Option<Box<Node>> {
        let mut skipped = Fifo::new();
        let mut found = None;
        while let Some(node) = self.pop_front() {
            let matches = node
                .msg
                .as_ref()
                .is_some_and(|msg| msg.kind() == kind);
            if matches {
                found = Some(node);
                break;
            }
            skipped.push_back(node);
        }
        self.splice_front(skipped);
        found
    }

    /// Reattaches `front` before the current head.
    fn splice_front(&mut self, mut front: Fifo) {
        if front.head.is_none() {
            return;
        }
        if self.head.is_none() {
            self.head = front.head.take();
            self.tail = front.tail;
        } else {
            unsafe { (*front.tail).next = self.head.take() };
            self.head = front.head.take();
        }
        self.len += front.len;
        front.tail = ptr::null_mut();
        front.len = 0;
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        // Pop iteratively so a deep queue cannot overflow the stack via
        // recursive Box drops.
        while self.pop_front().is_some() {}
    }
}

/// A message queue endpoint shared between threads.
pub struct Mq {
    fifo: Mutex<Fifo>,
    avail: Condvar,
}

// The raw tail pointer always points into the node chain owned by `head`,
// and every access happens under the `fifo` mutex.
unsafe impl Send for Mq {}
unsafe impl Sync for Mq {}

impl Default for Mq {
    fn default() -> Self {
        Self::new()
    }
}

impl Mq {
    pub fn new() -> Self {
        Self {
            fifo: Mutex::new(Fifo::new()),
            avail: Condvar::new(),
        }
    }

    /// Appends a message and wakes every waiter.
    pub fn write(&self, msg: Message) -> Result<(), MqError> {
        let node = alloc_node(msg);
        let mut fifo = self.fifo.lock().map_err(|_| MqError::Poisoned)?;
        fifo.push_back(node);
        drop(fifo);
        self.avail.notify_all();
        Ok(())
    }

    /// Prepends a message so it is read before anything already queued.
    /// Urgent messages pushed back to back pop latest-first.
    pub fn write_urgent(&self, msg: Message) -> Result<(), MqError> {
        let node = alloc_node(msg);
        let mut fifo = self.fifo.lock().map_err(|_| MqError::Poisoned)?;
        fifo.push_front(node);
        drop(fifo);
        self.avail.notify_all();
        Ok(())
    }

    /// Blocks until a message is available and pops the head.
    pub fn read(&self) -> Message {
        let node = {
            let mut fifo = self.fifo.lock().unwrap();
            loop {
                if let Some(node) = fifo.pop_front() {
                    break node;
                }
                fifo = self.avail.wait(fifo).unwrap();
            }
        };
        Self::consume(node)
    }

    /// Blocks until a message of exactly `kind` is available and pops the
    /// first such message, overtaking earlier messages of other kinds.
    pub fn read_kind(&self, kind: MsgKind) -> Message {
        let node = {
            let mut fifo = self.fifo.lock().unwrap();
            loop {
                if let Some(node) = fifo.remove_first(kind) {
                    break node;
                }
                fifo = self.avail.wait(fifo).unwrap();
            }
        };
        Self::consume(node)
    }

    /// Non-blocking read.
    pub fn poll(&self) -> Option<Message> {
        let node = self.fifo.lock().unwrap().pop_front()?;
        Some(Self::consume(node))
    }

    /// Non-blocking kind-filtered read.
    pub fn poll_kind(&self, kind: MsgKind) -> Option<Message> {
        let node = self.fifo.lock().unwrap().remove_first(kind)?;
        Some(Self::consume(node))
    }

    /// Extracts the payload and recycles the node, outside the queue lock.
    fn consume(mut node: Box<Node>) -> Message {
        let msg = match node.msg.take() {
            Some(msg) => msg,
            // Queued nodes always carry a payload; a bare node can only be
            // observed through the free list, which never reaches here.
            None => unreachable!("queued node without a payload"),
        };
        release_node(node);
        msg
    }
}

impl Drop for Mq {
    fn drop(&mut self) {
        // Drain remaining messages, returning their nodes to the pool.
        let mut fifo = match self.fifo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Some(mut node) = fifo.pop_front() {
            node.msg = None;
            release_node(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{InspectorMsg, InspectorMsgKind, SampleBatch};
    use std::sync::Arc;
    use std::thread;

    fn control(req_id: u32) -> Message {
        Message::Inspector(Box::new(InspectorMsg::new(InspectorMsgKind::Open, req_id)))
    }

    fn samples(id: u32) -> Message {
        Message::Samples(SampleBatch::new(id))
    }

    fn req_id(msg: Message) -> u32 {
        match msg {
            Message::Inspector(m) => m.req_id,
            _ => panic!("expected a control message"),
        }
    }

    fn batch_id(msg: Message) -> u32 {
        match msg {
            Message::Samples(b) => b.inspector_id,
            _ => panic!("expected a sample batch"),
        }
    }

    #[test]
    fn read_order_matches_write_order() {
        let mq = Mq::new();
        for i in 0..8 {
            mq.write(control(i)).unwrap();
        }
        for i in 0..8 {
            assert_eq!(req_id(mq.read()), i);
        }
        assert!(mq.poll().is_none());
    }

    #[test]
    fn urgent_overtakes_pending_writes() {
        // Non-urgent A, non-urgent B, urgent C pops as C, A, B.
        let mq = Mq::new();
        mq.write(control(0)).unwrap(); // A
        mq.write(control(1)).unwrap(); // B
        mq.write_urgent(control(2)).unwrap(); // C
        assert_eq!(req_id(mq.read()), 2);
        assert_eq!(req_id(mq.read()), 0);
        assert_eq!(req_id(mq.read()), 1);
    }

    #[test]
    fn urgent_writes_pop_latest_first() {
        let mq = Mq::new();
        mq.write_urgent(control(0)).unwrap();
        mq.write_urgent(control(1)).unwrap();
        mq.write_urgent(control(2)).unwrap();
        assert_eq!(req_id(mq.read()), 2);
        assert_eq!(req_id(mq.read()), 1);
        assert_eq!(req_id(mq.read()), 0);
    }

    #[test]
    fn kind_filtered_read_preserves_remainder_order() {
        // Kinds control, samples, control: the samples read overtakes,
        // then the control messages pop in order.
        let mq = Mq::new();
        mq.write(control(10)).unwrap();
        mq.write(samples(20)).unwrap();
        mq.write(control(30)).unwrap();
        assert_eq!(batch_id(mq.read_kind(MsgKind::Samples)), 20);
        assert_eq!(req_id(mq.read()), 10);
        assert_eq!(req_id(mq.read()), 30);
    }

    #[test]
    fn poll_kind_skips_other_kinds() {
        let mq = Mq::new();
        mq.write(samples(1)).unwrap();
        assert!(mq.poll_kind(MsgKind::Inspector).is_none());
        assert_eq!(batch_id(mq.poll_kind(MsgKind::Samples).unwrap()), 1);
        assert!(mq.poll_kind(MsgKind::Samples).is_none());
    }

    #[test]
    fn blocking_read_wakes_on_write() {
        let mq = Arc::new(Mq::new());
        let reader = {
            let mq = Arc::clone(&mq);
            thread::spawn(move || req_id(mq.read_kind(MsgKind::Inspector)))
        };
        // The filtered reader must skip the batch and wake again on the
        // control message.
        mq.write(samples(7)).unwrap();
        mq.write(control(42)).unwrap();
        assert_eq!(reader.join().unwrap(), 42);
        assert_eq!(batch_id(mq.read()), 7);
    }

    #[test]
    fn nodes_recycle_through_the_pool() {
        let mq = Mq::new();
        for i in 0..64 {
            mq.write(control(i)).unwrap();
        }
        for _ in 0..64 {
            mq.read();
        }
        let free = pool_free_len();
        assert!(free <= POOL_MAX);
        // At least part of the traffic must have been returned to the pool
        // (other tests share the process-wide free list, so the exact count
        // is not stable).
        assert!(free > 0);
    }

    #[test]
    fn drop_drains_pending_messages() {
        let mq = Mq::new();
        for i in 0..16 {
            mq.write(control(i)).unwrap();
        }
        drop(mq);
        assert!(pool_free_len() > 0);
    }
}
