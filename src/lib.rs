//! Software-defined-radio channel inspector engine.
//!
//! Given a complex baseband stream and a spectral channel of interest, the
//! engine opens a per-channel pipeline performing carrier recovery, AGC,
//! blind baud estimation and symbol-timing sampling, and emits recovered
//! symbol samples plus parameter estimates. Clients drive it through a
//! request/response control protocol over a pair of in-process message
//! queues; many inspectors share one worker pool fed from a single
//! upstream source.

pub mod analytics;
pub mod analyzer;
pub mod client;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod inspector;
pub mod mq;
pub mod msg;
pub mod pool;
pub mod source;

pub use client::InspectorClient;
pub use engine::Engine;
pub use error::{ClientError, EngineError};
pub use inspector::{BaudInfo, CarrierCtrl, Inspector, Params, State};
pub use mq::Mq;
pub use msg::{InspectorMsg, InspectorMsgKind, Message, MsgKind, SampleBatch};
pub use source::{Channel, Consumer, SOURCE_BUFSIZ};
