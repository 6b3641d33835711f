//! Error types for the engine's failure surfaces.

use thiserror::Error;

use crate::msg::InspectorMsgKind;

/// Errors raised by the message queue.
#[derive(Debug, Error)]
pub enum MqError {
    /// A writer or reader panicked while holding the queue lock.
    #[error("message queue mutex poisoned")]
    Poisoned,
}

/// Errors raised by the DSP primitives.
#[derive(Debug, Error)]
pub enum DspError {
    #[error("invalid channel: {0}")]
    InvalidChannel(&'static str),

    #[error("invalid AGC parameters: {0}")]
    InvalidAgcParams(&'static str),

    #[error("invalid Costas loop parameters: {0}")]
    InvalidLoopParams(&'static str),

    #[error("invalid detector parameters: {0}")]
    InvalidDetectorParams(&'static str),

    #[error("non-finite sample fed to detector")]
    NonFiniteSample,
}

/// Errors raised by the sample-feed inner loop.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Dsp(#[from] DspError),
}

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker pool mutex poisoned")]
    Poisoned,
}

/// Errors surfaced by the blocking client API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("response req_id {got} does not match request req_id {expected}")]
    MismatchedReqId { expected: u32, got: u32 },

    #[error("unexpected response kind {0:?}")]
    UnexpectedResponseKind(InspectorMsgKind),

    #[error("no such inspector handle")]
    WrongHandle,

    #[error("server rejected the request")]
    Rejected,

    #[error(transparent)]
    Mq(#[from] MqError),
}

/// Errors raised while assembling or tearing down the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to spawn analyzer thread: {0}")]
    Spawn(#[from] std::io::Error),
}
