//! Blocking client API over the engine's queue pair.
//!
//! Every call writes one request carrying a fresh `req_id` and blocks on a
//! kind-filtered read of the output queue, so control responses overtake
//! any symbol batches queued ahead of them. A response whose `req_id` does
//! not match the request aborts the call; the engine copies the id back
//! unchanged, so a mismatch means the conversation is broken.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::error;

use crate::error::ClientError;
use crate::inspector::{BaudInfo, Params};
use crate::mq::Mq;
use crate::msg::{InspectorMsg, InspectorMsgKind, Message, MsgKind};
use crate::source::Channel;

pub struct InspectorClient {
    input: Arc<Mq>,
    output: Arc<Mq>,
    next_req_id: AtomicU32,
}

impl InspectorClient {
    pub fn new(input: Arc<Mq>, output: Arc<Mq>) -> Self {
        Self {
            input,
            output,
            next_req_id: AtomicU32::new(1),
        }
    }

    /// Opens an inspector over `channel`, returning its handle.
    pub fn open(&self, channel: Channel) -> Result<i32, ClientError> {
        let req_id = self.next_req_id();
        let resp = self.roundtrip(InspectorMsg::open(channel, req_id))?;
        match resp.kind {
            InspectorMsgKind::Open => Ok(resp.handle),
            InspectorMsgKind::Error => Err(ClientError::Rejected),
            kind => Err(self.unexpected(kind)),
        }
    }

    /// Closes the inspector behind `handle`.
    pub fn close(&self, handle: i32) -> Result<(), ClientError> {
        let req_id = self.next_req_id();
        let resp = self.roundtrip(InspectorMsg::close(handle, req_id))?;
        match resp.kind {
            InspectorMsgKind::Close => Ok(()),
            InspectorMsgKind::WrongHandle => Err(ClientError::WrongHandle),
            kind => Err(self.unexpected(kind)),
        }
    }

    /// Polls both blind baud estimators.
    pub fn get_info(&self, handle: i32) -> Result<BaudInfo, ClientError> {
        let req_id = self.next_req_id();
        let resp = self.roundtrip(InspectorMsg::get_info(handle, req_id))?;
        match resp.kind {
            InspectorMsgKind::Info => Ok(resp.baud),
            InspectorMsgKind::WrongHandle => Err(ClientError::WrongHandle),
            kind => Err(self.unexpected(kind)),
        }
    }

    pub fn get_params(&self, handle: i32) -> Result<Params, ClientError> {
        let req_id = self.next_req_id();
        let resp = self.roundtrip(InspectorMsg::get_params(handle, req_id))?;
        match resp.kind {
            InspectorMsgKind::Params => Ok(resp.params),
            InspectorMsgKind::WrongHandle => Err(ClientError::WrongHandle),
            kind => Err(self.unexpected(kind)),
        }
    }

    pub fn set_params(&self, handle: i32, params: Params) -> Result<(), ClientError> {
        let req_id = self.next_req_id();
        let resp = self.roundtrip(InspectorMsg::set_params(handle, params, req_id))?;
        match resp.kind {
            InspectorMsgKind::Params => Ok(()),
            InspectorMsgKind::WrongHandle => Err(ClientError::WrongHandle),
            kind => Err(self.unexpected(kind)),
        }
    }

    /// Fire-and-forget form: sends a prebuilt request without waiting.
    /// The caller correlates the eventual response by its `req_id`.
    pub fn send_request(&self, msg: InspectorMsg) -> Result<(), ClientError> {
        self.input.write(Message::Inspector(Box::new(msg)))?;
        Ok(())
    }

    /// Blocks for the next control response, whatever request it answers.
    pub fn read_response(&self) -> Box<InspectorMsg> {
        match self.output.read_kind(MsgKind::Inspector) {
            Message::Inspector(msg) => msg,
            // read_kind only returns the requested kind.
            _ => unreachable!("kind-filtered read returned a foreign kind"),
        }
    }

    pub fn next_req_id(&self) -> u32 {
        self.next_req_id.fetch_add(1, Ordering::Relaxed)
    }

    fn roundtrip(&self, msg: InspectorMsg) -> Result<Box<InspectorMsg>, ClientError> {
        let req_id = msg.req_id;
        self.send_request(msg)?;
        let resp = self.read_response();
        if resp.req_id != req_id {
            error!(
                "control response req_id {} does not answer request {}",
                resp.req_id, req_id
            );
            return Err(ClientError::MismatchedReqId {
                expected: req_id,
                got: resp.req_id,
            });
        }
        Ok(resp)
    }

    fn unexpected(&self, kind: InspectorMsgKind) -> ClientError {
        error!("unexpected control response kind {kind:?}");
        ClientError::UnexpectedResponseKind(kind)
    }
}
