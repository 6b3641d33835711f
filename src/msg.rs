//! Messages exchanged over the engine's queues.
//!
//! Control requests and responses share one record type, [`InspectorMsg`];
//! the handler mutates a request in place into its response and sends it
//! back on the output queue. Symbol batches travel as [`SampleBatch`].

use num_complex::Complex32;

use crate::inspector::{BaudInfo, Params};
use crate::source::Channel;

/// Coarse message type used by the queue's kind-filtered reads.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgKind {
    /// Control request or response ([`InspectorMsg`]).
    Inspector = 0,
    /// A batch of recovered symbol samples.
    Samples = 1,
    /// Engine shutdown. Sent urgent so it overtakes pending work.
    Halt = 2,
}

/// A queue payload.
pub enum Message {
    Inspector(Box<InspectorMsg>),
    Samples(SampleBatch),
    Halt,
}

impl Message {
    pub fn kind(&self) -> MsgKind {
        match self {
            Message::Inspector(_) => MsgKind::Inspector,
            Message::Samples(_) => MsgKind::Samples,
            Message::Halt => MsgKind::Halt,
        }
    }
}

/// Control message kinds. `Open`, `GetInfo`, `GetParams`, `Params` (set) and
/// `Close` are valid requests; the rest only ever appear in responses.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InspectorMsgKind {
    Open = 0,
    GetInfo = 1,
    Info = 2,
    GetParams = 3,
    Params = 4,
    Close = 5,
    Error = 6,
    WrongHandle = 7,
    WrongKind = 8,
}

/// Control request/response record.
///
/// The handler owns the message on entry, rewrites `kind` and the relevant
/// payload fields, and transfers ownership to the output queue. `req_id` is
/// chosen by the client and copied back unchanged; `status` holds the
/// original request kind on a `WrongKind` response.
#[derive(Clone, Debug)]
pub struct InspectorMsg {
    pub kind: InspectorMsgKind,
    pub handle: i32,
    pub channel: Channel,
    pub params: Params,
    pub baud: BaudInfo,
    pub inspector_id: u32,
    pub req_id: u32,
    pub status: InspectorMsgKind,
}

impl InspectorMsg {
    pub fn new(kind: InspectorMsgKind, req_id: u32) -> Self {
        Self {
            kind,
            handle: -1,
            channel: Channel::default(),
            params: Params::default(),
            baud: BaudInfo::default(),
            inspector_id: 0,
            req_id,
            status: kind,
        }
    }

    pub fn open(channel: Channel, req_id: u32) -> Self {
        Self {
            channel,
            ..Self::new(InspectorMsgKind::Open, req_id)
        }
    }

    pub fn get_info(handle: i32, req_id: u32) -> Self {
        Self {
            handle,
            ..Self::new(InspectorMsgKind::GetInfo, req_id)
        }
    }

    pub fn get_params(handle: i32, req_id: u32) -> Self {
        Self {
            handle,
            ..Self::new(InspectorMsgKind::GetParams, req_id)
        }
    }

    pub fn set_params(handle: i32, params: Params, req_id: u32) -> Self {
        Self {
            handle,
            params,
            ..Self::new(InspectorMsgKind::Params, req_id)
        }
    }

    pub fn close(handle: i32, req_id: u32) -> Self {
        Self {
            handle,
            ..Self::new(InspectorMsgKind::Close, req_id)
        }
    }
}

/// A batch of symbol samples recovered by one inspector.
#[derive(Clone, Debug, Default)]
pub struct SampleBatch {
    /// Client-assigned label of the inspector that produced the batch.
    pub inspector_id: u32,
    pub samples: Vec<Complex32>,
}

impl SampleBatch {
    pub fn new(inspector_id: u32) -> Self {
        Self {
            inspector_id,
            samples: Vec::new(),
        }
    }
}
