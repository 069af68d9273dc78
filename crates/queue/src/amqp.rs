//! Durable AMQP queue boundary: durable queue, default exchange, persistent
//! messages, explicit ack/nack, expressed with `lapin`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use relayer_core::error::QueueError;
use relayer_core::traits::Queue;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub queue_name: String,
}

impl AmqpConfig {
    pub fn connection_url(&self) -> String {
        format!("amqp://{}:{}@{}:{}/%2f", self.user, self.password, self.host, self.port)
    }
}

pub struct AmqpQueue {
    config: AmqpConfig,
}

impl AmqpQueue {
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Connection, lapin::Error> {
        Connection::connect(&self.config.connection_url(), ConnectionProperties::default()).await
    }
}

#[async_trait]
impl Queue for AmqpQueue {
    async fn register_event(&self, bytes: Vec<u8>) -> Result<(), QueueError> {
        let conn = self.connect().await.map_err(|e| QueueError::RegisterFailed(e.to_string()))?;
        let channel = conn.create_channel().await.map_err(|e| QueueError::RegisterFailed(e.to_string()))?;
        channel
            .queue_declare(&self.config.queue_name, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| QueueError::RegisterFailed(e.to_string()))?;

        channel
            .basic_publish(
                "",
                &self.config.queue_name,
                BasicPublishOptions::default(),
                &bytes,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| QueueError::RegisterFailed(e.to_string()))?
            .await
            .map_err(|e| QueueError::RegisterFailed(e.to_string()))?;

        Ok(())
    }

    async fn read_events(
        &self,
        callback: Box<dyn Fn(Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>,
        shutdown: CancellationToken,
    ) -> Result<(), QueueError> {
        let conn = self.connect().await.map_err(|e| QueueError::ReadEventFailed(e.to_string()))?;
        let channel = conn.create_channel().await.map_err(|e| QueueError::ReadEventFailed(e.to_string()))?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::ReadEventFailed(e.to_string()))?;
        channel
            .queue_declare(&self.config.queue_name, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| QueueError::ReadEventFailed(e.to_string()))?;

        let mut consumer = channel
            .basic_consume(
                &self.config.queue_name,
                "relayer-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::ReadEventFailed(e.to_string()))?;

        info!(queue = %self.config.queue_name, "waiting for events. To exit press CTRL+C");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping queue consumer");
                    return Ok(());
                }
                delivery = consumer.next() => {
                    let Some(delivery) = delivery else {
                        return Ok(());
                    };
                    let delivery = delivery.map_err(|e| QueueError::ReadEventFailed(e.to_string()))?;
                    let body = delivery.data.clone();

                    match callback(body).await {
                        Ok(()) => {
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                warn!("failed to ack message: {e}");
                            }
                        }
                        Err(e) => {
                            error!("callback failed, leaving message for redelivery: {e}");
                            if let Err(e) = delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await {
                                warn!("failed to nack message: {e}");
                            }
                        }
                    }
                }
            }
        }
    }
}
