//! Dynamic batching: collect next-token queries from concurrent particles and
//! answer them with one collective model call per batch.

use super::{SequenceModel, Vocabulary};
use crate::errors::{Result, SmcError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::debug;

/// A single next-token query.
pub struct BatchRequest {
    pub tokens: Vec<usize>,
    pub response_tx: oneshot::Sender<Result<Vec<f32>>>,
}

/// Dynamic batcher: collects requests up to max_batch_size or timeout_ms, then
/// runs `next_token_logprobs_batch`.
pub struct DynamicBatcher<M> {
    model: M,
    max_batch_size: usize,
    timeout_ms: u64,
    request_rx: mpsc::Receiver<BatchRequest>,
}

impl<M: SequenceModel> DynamicBatcher<M> {
    pub fn new(
        model: M,
        max_batch_size: usize,
        timeout_ms: u64,
        request_rx: mpsc::Receiver<BatchRequest>,
    ) -> Self {
        Self {
            model,
            max_batch_size: max_batch_size.max(1),
            timeout_ms: timeout_ms.max(1),
            request_rx,
        }
    }

    /// Run the batcher loop until every client is dropped.
    pub async fn run(&mut self) {
        let mut pending: Vec<BatchRequest> = Vec::new();
        let mut timer = interval(Duration::from_millis(self.timeout_ms));
        timer.tick().await;

        loop {
            tokio::select! {
                req = self.request_rx.recv() => match req {
                    Some(req) => {
                        pending.push(req);
                        if pending.len() >= self.max_batch_size {
                            self.process_batch(&mut pending);
                        }
                    }
                    None => {
                        self.process_batch(&mut pending);
                        break;
                    }
                },
                _ = timer.tick() => {
                    if !pending.is_empty() {
                        self.process_batch(&mut pending);
                    }
                }
            }
        }
    }

    fn process_batch(&self, requests: &mut Vec<BatchRequest>) {
        if requests.is_empty() {
            return;
        }
        debug!(batch_size = requests.len(), "dispatching model batch");

        let batch: Vec<Vec<usize>> = requests.iter().map(|r| r.tokens.clone()).collect();
        let results = match self.model.next_token_logprobs_batch(&batch) {
            Ok(logprobs) => logprobs,
            Err(e) => {
                for req in requests.drain(..) {
                    let _ = req
                        .response_tx
                        .send(Err(SmcError::ModelUnavailable(e.to_string())));
                }
                return;
            }
        };

        for (req, logprobs) in requests.drain(..).zip(results.into_iter()) {
            let _ = req.response_tx.send(Ok(logprobs));
        }
    }
}

/// Synchronous handle onto a running [`DynamicBatcher`]. Each call blocks the
/// calling thread until its batch is answered; never call it from async code.
#[derive(Clone)]
pub struct BatchClient {
    vocab: Vocabulary,
    request_tx: mpsc::Sender<BatchRequest>,
}

impl SequenceModel for BatchClient {
    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn next_token_logprobs(&self, tokens: &[usize]) -> Result<Vec<f32>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .blocking_send(BatchRequest {
                tokens: tokens.to_vec(),
                response_tx,
            })
            .map_err(|_| SmcError::ModelUnavailable("batcher stopped".into()))?;
        response_rx
            .blocking_recv()
            .map_err(|_| SmcError::ModelUnavailable("batcher dropped request".into()))?
    }
}

/// Start a batcher for `model` on its own runtime thread. The thread exits once
/// every clone of the returned client has been dropped.
pub fn spawn_batcher<M: SequenceModel + 'static>(
    model: M,
    max_batch_size: usize,
    timeout_ms: u64,
) -> Result<(BatchClient, JoinHandle<()>)> {
    let vocab = model.vocabulary().clone();
    let (request_tx, request_rx) = mpsc::channel(max_batch_size.max(1) * 4);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let handle = std::thread::Builder::new()
        .name("smc-batcher".into())
        .spawn(move || {
            let mut batcher = DynamicBatcher::new(model, max_batch_size, timeout_ms, request_rx);
            runtime.block_on(batcher.run());
        })?;
    Ok((BatchClient { vocab, request_tx }, handle))
}
