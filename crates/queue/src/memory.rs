use async_trait::async_trait;
use futures::future::BoxFuture;
use relayer_core::error::QueueError;
use relayer_core::traits::Queue;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// In-process fake used by tests in place of `AmqpQueue`: an unbounded
/// channel standing in for the durable broker.
pub struct InMemoryQueue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn register_event(&self, bytes: Vec<u8>) -> Result<(), QueueError> {
        self.sender
            .send(bytes)
            .map_err(|e| QueueError::RegisterFailed(e.to_string()))
    }

    async fn read_events(
        &self,
        callback: Box<dyn Fn(Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>,
        shutdown: CancellationToken,
    ) -> Result<(), QueueError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                message = receiver.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    // Redelivery isn't modeled for the fake; a callback
                    // failure is logged by the caller via the `Err` result.
                    let _ = callback(message).await;
                }
            }
        }
    }
}
