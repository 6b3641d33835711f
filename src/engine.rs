//! Engine assembly: the queue pair, the shared consumer, the worker pool
//! and the analyzer thread, wired together and torn down in order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::analyzer::Analyzer;
use crate::client::InspectorClient;
use crate::error::EngineError;
use crate::mq::Mq;
use crate::msg::Message;
use crate::pool::WorkerPool;
use crate::source::Consumer;

pub struct Engine {
    input: Arc<Mq>,
    output: Arc<Mq>,
    consumer: Arc<Consumer>,
    pool: Arc<WorkerPool>,
    analyzer: Option<JoinHandle<()>>,
}

impl Engine {
    /// Starts the analyzer thread and `workers` pool threads over a source
    /// running at `samp_rate`.
    pub fn start(samp_rate: f32, workers: usize) -> Result<Self, EngineError> {
        let input = Arc::new(Mq::new());
        let output = Arc::new(Mq::new());
        let consumer = Arc::new(Consumer::new(samp_rate));
        let pool = Arc::new(WorkerPool::new(workers)?);

        let mut analyzer = Analyzer::new(
            Arc::clone(&consumer),
            Arc::clone(&pool),
            Arc::clone(&output),
        );
        let analyzer_input = Arc::clone(&input);
        let handle = thread::Builder::new()
            .name("chanscope-analyzer".to_string())
            .spawn(move || analyzer.run(&analyzer_input))?;

        Ok(Self {
            input,
            output,
            consumer,
            pool,
            analyzer: Some(handle),
        })
    }

    /// Producer-side handle for feeding baseband samples.
    pub fn consumer(&self) -> &Arc<Consumer> {
        &self.consumer
    }

    /// Output queue carrying control responses and symbol batches.
    pub fn output(&self) -> &Arc<Mq> {
        &self.output
    }

    /// A blocking control client bound to this engine's queues.
    pub fn client(&self) -> InspectorClient {
        InspectorClient::new(Arc::clone(&self.input), Arc::clone(&self.output))
    }

    /// Orderly shutdown: end the sample stream so workers retire, halt the
    /// analyzer, then drain and join the pool.
    pub fn halt(mut self) {
        self.consumer.finish();
        if self.input.write_urgent(Message::Halt).is_err() {
            warn!("control queue unusable during halt");
        }
        if let Some(handle) = self.analyzer.take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
        debug!("engine halted");
    }
}
