//! Analyzer thread: the control protocol handler, the inspector table and
//! the worker callback that feeds inspectors from the shared consumer.
//!
//! The analyzer is the only thread that touches the table. Workers borrow
//! inspectors for the duration of one callback; the table keeps its own
//! reference until the handle is disposed. Handles are append-indexed and
//! never reused; a closed handle leaves a tombstone.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::inspector::{Inspector, State};
use crate::mq::Mq;
use crate::msg::{InspectorMsg, InspectorMsgKind, Message, SampleBatch};
use crate::pool::WorkerPool;
use crate::source::Consumer;

pub struct Analyzer {
    consumer: Arc<Consumer>,
    pool: Arc<WorkerPool>,
    output: Arc<Mq>,
    table: Vec<Option<Arc<Inspector>>>,
}

impl Analyzer {
    pub fn new(consumer: Arc<Consumer>, pool: Arc<WorkerPool>, output: Arc<Mq>) -> Self {
        Self {
            consumer,
            pool,
            output,
            table: Vec::new(),
        }
    }

    /// Serves control messages from `input` until a `Halt` arrives. Every
    /// request is answered on the output queue; failures never escape this
    /// loop, they become response messages.
    pub fn run(&mut self, input: &Mq) {
        loop {
            match input.read() {
                Message::Halt => break,
                Message::Inspector(msg) => {
                    let resp = self.process(msg);
                    if let Err(e) = self.output.write(Message::Inspector(resp)) {
                        error!("failed to publish control response: {e}");
                        break;
                    }
                }
                other => {
                    warn!("unexpected {:?} message on the control queue", other.kind());
                }
            }
            self.sweep();
        }

        // Ask every surviving inspector to retire so the pool can drain.
        for slot in self.table.iter().flatten() {
            slot.advance_state(State::Halting);
        }
        self.table.clear();
        debug!("analyzer loop finished");
    }

    /// Rewrites one request into its response.
    fn process(&mut self, mut msg: Box<InspectorMsg>) -> Box<InspectorMsg> {
        let mut found: Option<Arc<Inspector>> = None;

        match msg.kind {
            InspectorMsgKind::Open => {
                match Inspector::new(self.consumer.samp_rate(), &msg.channel) {
                    Ok(insp) => {
                        let insp = Arc::new(insp);
                        match self.register(&insp) {
                            Ok(handle) => {
                                msg.handle = handle;
                                found = Some(insp);
                            }
                            Err(e) => {
                                warn!("inspector registration failed: {e}");
                                msg.kind = InspectorMsgKind::Error;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("inspector construction failed: {e}");
                        msg.kind = InspectorMsgKind::Error;
                    }
                }
            }
            InspectorMsgKind::GetInfo => match self.get_inspector(msg.handle) {
                Some(insp) => {
                    msg.baud = insp.baud_info();
                    msg.kind = InspectorMsgKind::Info;
                    found = Some(insp);
                }
                None => msg.kind = InspectorMsgKind::WrongHandle,
            },
            InspectorMsgKind::GetParams => match self.get_inspector(msg.handle) {
                Some(insp) => {
                    msg.params = insp.params();
                    msg.kind = InspectorMsgKind::Params;
                    found = Some(insp);
                }
                None => msg.kind = InspectorMsgKind::WrongHandle,
            },
            InspectorMsgKind::Params => match self.get_inspector(msg.handle) {
                Some(insp) => {
                    insp.apply_params(msg.params);
                    found = Some(insp);
                }
                None => msg.kind = InspectorMsgKind::WrongHandle,
            },
            InspectorMsgKind::Close => match self.take_inspector(msg.handle) {
                Some(insp) => {
                    // The handle is disposed either way; the worker (or the
                    // sweep) destroys an inspector it still holds.
                    insp.advance_state(State::Halting);
                    found = Some(insp);
                }
                None => msg.kind = InspectorMsgKind::WrongHandle,
            },
            kind => {
                msg.status = kind;
                msg.kind = InspectorMsgKind::WrongKind;
            }
        }

        if let Some(insp) = found {
            msg.inspector_id = insp.params().inspector_id;
        }
        msg
    }

    /// Appends the inspector to the table, flips it to Running and hands
    /// it to the worker pool. A failed task push disposes the fresh handle.
    fn register(&mut self, insp: &Arc<Inspector>) -> Result<i32, crate::error::PoolError> {
        let handle = self.table.len() as i32;
        self.table.push(Some(Arc::clone(insp)));
        insp.advance_state(State::Running);

        let task_insp = Arc::clone(insp);
        let consumer = Arc::clone(&self.consumer);
        let output = Arc::clone(&self.output);
        let pushed = self
            .pool
            .push(Box::new(move || {
                inspector_task(&task_insp, &consumer, &output)
            }));

        match pushed {
            Ok(()) => {
                debug!("inspector registered on handle {handle}");
                Ok(handle)
            }
            Err(e) => {
                self.table[handle as usize] = None;
                Err(e)
            }
        }
    }

    /// Handle validation for inspector operations: in range, not a
    /// tombstone, and still Running.
    fn get_inspector(&self, handle: i32) -> Option<Arc<Inspector>> {
        let slot = usize::try_from(handle).ok()?;
        let insp = self.table.get(slot)?.as_ref()?;
        (insp.state() == State::Running).then(|| Arc::clone(insp))
    }

    /// Tombstones a handle, returning whatever inspector it held. Used by
    /// CLOSE, which accepts any live entry regardless of lifecycle stage.
    fn take_inspector(&mut self, handle: i32) -> Option<Arc<Inspector>> {
        let slot = usize::try_from(handle).ok()?;
        self.table.get_mut(slot)?.take()
    }

    /// Destroys Halted inspectors whose worker already let go, so a handle
    /// that was never re-CLOSEd cannot leak its pipeline.
    fn sweep(&mut self) {
        for slot in self.table.iter_mut() {
            if slot
                .as_ref()
                .is_some_and(|insp| insp.state() == State::Halted)
            {
                debug!("sweeping halted inspector");
                *slot = None;
            }
        }
    }
}

/// One worker dispatch of an inspector. Returns true to stay scheduled.
///
/// The callback binds the inspector to the shared consumer on first entry,
/// honors a pending Halting request, then feeds one bounded batch through
/// the pipeline, collecting every fired symbol into a single `Samples`
/// message. Any exit that does not reschedule retires the inspector.
pub(crate) fn inspector_task(insp: &Inspector, consumer: &Consumer, output: &Mq) -> bool {
    let cursor = match insp.task_cursor() {
        Some(cursor) => cursor,
        None => {
            let cursor = consumer.add_task();
            insp.bind_cursor(cursor);
            cursor
        }
    };

    let retire = || {
        insp.advance_state(State::Halted);
        consumer.remove_task(cursor);
        false
    };

    if insp.state() == State::Halting {
        return retire();
    }

    let chunk = match consumer.assert_samples(cursor) {
        Some(chunk) if !chunk.is_empty() => chunk,
        _ => return retire(),
    };

    let mut batch: Option<SampleBatch> = None;
    let mut offset = 0usize;
    while offset < chunk.len() {
        let fed = match insp.feed_bulk(&chunk[offset..]) {
            Ok(fed) => fed,
            Err(e) => {
                warn!("inspector feed failed, halting: {e}");
                return retire();
            }
        };
        if let Some(symbol) = insp.sampler_output() {
            batch
                .get_or_insert_with(|| SampleBatch::new(insp.params().inspector_id))
                .samples
                .push(symbol);
        }
        consumer.advance(cursor, fed);
        offset += fed;
    }

    if let Some(batch) = batch {
        if let Err(e) = output.write(Message::Samples(batch)) {
            warn!("failed to publish symbol batch, halting inspector: {e}");
            return retire();
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::Params;
    use crate::source::Channel;

    fn test_analyzer() -> (Analyzer, Arc<Consumer>, Arc<Mq>) {
        let consumer = Arc::new(Consumer::new(48_000.0));
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let output = Arc::new(Mq::new());
        let analyzer = Analyzer::new(Arc::clone(&consumer), pool, Arc::clone(&output));
        (analyzer, consumer, output)
    }

    fn test_channel() -> Channel {
        Channel {
            fc: 100e3,
            bw: 10e3,
        }
    }

    fn open(analyzer: &mut Analyzer, req_id: u32) -> Box<InspectorMsg> {
        analyzer.process(Box::new(InspectorMsg::open(test_channel(), req_id)))
    }

    #[test]
    fn open_assigns_sequential_handles() {
        let (mut analyzer, consumer, _output) = test_analyzer();
        let first = open(&mut analyzer, 1);
        let second = open(&mut analyzer, 2);
        assert_eq!(first.kind, InspectorMsgKind::Open);
        assert_eq!(first.handle, 0);
        assert_eq!(second.handle, 1);
        consumer.finish();
    }

    #[test]
    fn open_close_round_trip() {
        // Open yields handle 0; close succeeds; a second close of the
        // same handle is a wrong-handle error.
        let (mut analyzer, consumer, _output) = test_analyzer();

        let resp = open(&mut analyzer, 42);
        assert_eq!(resp.kind, InspectorMsgKind::Open);
        assert_eq!(resp.req_id, 42);
        assert_eq!(resp.handle, 0);

        let resp = analyzer.process(Box::new(InspectorMsg::close(0, 43)));
        assert_eq!(resp.kind, InspectorMsgKind::Close);
        assert_eq!(resp.req_id, 43);

        let resp = analyzer.process(Box::new(InspectorMsg::close(0, 44)));
        assert_eq!(resp.kind, InspectorMsgKind::WrongHandle);
        assert_eq!(resp.req_id, 44);
        consumer.finish();
    }

    #[test]
    fn params_echo_back() {
        // Set-params then get-params returns the installed values.
        let (mut analyzer, consumer, _output) = test_analyzer();
        let handle = open(&mut analyzer, 1).handle;

        let params = Params {
            inspector_id: 7,
            baud: 1_200.0,
            sym_phase: 0.5,
            ..Params::default()
        };
        let resp = analyzer.process(Box::new(InspectorMsg::set_params(handle, params, 2)));
        assert_eq!(resp.kind, InspectorMsgKind::Params);
        assert_eq!(resp.inspector_id, 7);

        let resp = analyzer.process(Box::new(InspectorMsg::get_params(handle, 3)));
        assert_eq!(resp.kind, InspectorMsgKind::Params);
        assert_eq!(resp.params, params);
        consumer.finish();
    }

    #[test]
    fn invalid_handles_are_rejected() {
        let (mut analyzer, consumer, _output) = test_analyzer();
        let _ = open(&mut analyzer, 1);

        for handle in [-1, 1, 99] {
            let resp = analyzer.process(Box::new(InspectorMsg::get_info(handle, 5)));
            assert_eq!(resp.kind, InspectorMsgKind::WrongHandle, "handle {handle}");
        }
        consumer.finish();
    }

    #[test]
    fn close_of_a_never_opened_handle_is_rejected() {
        let (mut analyzer, consumer, _output) = test_analyzer();
        let resp = analyzer.process(Box::new(InspectorMsg::close(0, 9)));
        assert_eq!(resp.kind, InspectorMsgKind::WrongHandle);
        consumer.finish();
    }

    #[test]
    fn non_request_kind_is_answered_wrong_kind() {
        // A response-only kind used as a request echoes in `status`.
        let (mut analyzer, consumer, _output) = test_analyzer();
        let resp = analyzer.process(Box::new(InspectorMsg::new(InspectorMsgKind::Info, 6)));
        assert_eq!(resp.kind, InspectorMsgKind::WrongKind);
        assert_eq!(resp.status, InspectorMsgKind::Info);
        consumer.finish();
    }

    #[test]
    fn open_with_a_bad_channel_answers_error() {
        let (mut analyzer, consumer, _output) = test_analyzer();
        let resp = analyzer.process(Box::new(InspectorMsg::open(
            Channel { fc: 0.0, bw: 0.0 },
            11,
        )));
        assert_eq!(resp.kind, InspectorMsgKind::Error);
        assert_eq!(resp.req_id, 11);
        consumer.finish();
    }

    #[test]
    fn get_info_reports_detector_estimates() {
        let (mut analyzer, consumer, _output) = test_analyzer();
        let handle = open(&mut analyzer, 1).handle;
        let resp = analyzer.process(Box::new(InspectorMsg::get_info(handle, 2)));
        assert_eq!(resp.kind, InspectorMsgKind::Info);
        // Nothing has been fed yet: both estimators still read zero.
        assert_eq!(resp.baud.fac, 0.0);
        assert_eq!(resp.baud.nln, 0.0);
        consumer.finish();
    }

    #[test]
    fn sweep_reaps_a_halted_inspector() {
        let (mut analyzer, consumer, _output) = test_analyzer();
        let handle = open(&mut analyzer, 1).handle;

        let insp = analyzer.get_inspector(handle).unwrap();
        insp.advance_state(State::Halted);
        analyzer.sweep();

        let resp = analyzer.process(Box::new(InspectorMsg::get_params(handle, 2)));
        assert_eq!(resp.kind, InspectorMsgKind::WrongHandle);
        consumer.finish();
    }
}
