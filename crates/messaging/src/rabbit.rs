//! Durable RabbitMQ topology over the `lapin` AMQP client.
//!
//! Every declared queue gets a per-queue dead-letter exchange and queue as
//! a broker-native safety net; the first-class fault path (fault envelopes
//! routed by the dispatch layer) runs in front of it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{RwLock, Semaphore, watch};
use tokio::task::JoinSet;

use courier_common::config::BrokerConfig;

use crate::dispatch::{Completion, complete, dispatch};
use crate::error::MessagingError;
use crate::topology::{EventBus, QueueDefinition, Topology};

/// RabbitMQ-backed topology. One connection per process; one channel for
/// publishing, one per queue for consuming.
pub struct RabbitTopology {
    connection: Connection,
    publish_channel: Channel,
    definitions: RwLock<Vec<Arc<QueueDefinition>>>,
}

/// Cheap publish-only handle handed into spawned consume tasks for fault
/// routing.
#[derive(Clone)]
struct RabbitPublisher {
    channel: Channel,
}

impl RabbitTopology {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, MessagingError> {
        let connection = Connection::connect(
            &config.amqp_url(),
            ConnectionProperties::default().with_connection_name("courier".into()),
        )
        .await
        .map_err(|e| MessagingError::Connection(format!("broker connect failed: {e}")))?;

        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(format!("channel creation failed: {e}")))?;

        // Publisher confirms: publish() resolves once the broker has taken
        // responsibility for the message.
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| MessagingError::Connection(format!("confirm select failed: {e}")))?;

        tracing::info!(broker = %config.redacted_url(), "Connected to RabbitMQ");

        Ok(Self {
            connection,
            publish_channel,
            definitions: RwLock::new(Vec::new()),
        })
    }

    /// Declare the per-queue dead-letter exchange and queue, bound by the
    /// original queue name as routing key.
    async fn setup_dead_letter(&self, queue: &str) -> Result<(), MessagingError> {
        let dlx = format!("{queue}_dlx");
        let dlq = format!("{queue}_dlq");

        self.publish_channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_setup(queue, format!("DLX declare failed: {e}")))?;

        self.publish_channel
            .queue_declare(
                &dlq,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_setup(queue, format!("DLQ declare failed: {e}")))?;

        self.publish_channel
            .queue_bind(
                &dlq,
                &dlx,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_setup(queue, format!("DLQ bind failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl EventBus for RabbitTopology {
    async fn publish_json(&self, queue: &str, payload: Vec<u8>) -> Result<(), MessagingError> {
        publish_persistent(&self.publish_channel, queue, &payload).await
    }

    async fn healthy(&self) -> bool {
        self.connection.status().connected()
    }
}

#[async_trait]
impl Topology for RabbitTopology {
    async fn declare(&self, definition: QueueDefinition) -> Result<(), MessagingError> {
        self.setup_dead_letter(&definition.name).await?;

        let dlx = format!("{}_dlx", definition.name);
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dlx.into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(definition.name.clone().into()),
        );

        self.publish_channel
            .queue_declare(
                &definition.name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| {
                MessagingError::queue_setup(&definition.name, format!("queue declare failed: {e}"))
            })?;

        tracing::info!(
            queue = %definition.name,
            prefetch = definition.prefetch,
            concurrency = definition.concurrency_limit,
            "Declared durable queue"
        );

        self.definitions.write().await.push(Arc::new(definition));
        Ok(())
    }

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), MessagingError> {
        let definitions = self.definitions.read().await.clone();

        let mut loops = Vec::new();
        for definition in definitions {
            let channel = self
                .connection
                .create_channel()
                .await
                .map_err(|e| MessagingError::Connection(format!("channel creation failed: {e}")))?;

            channel
                .basic_qos(definition.prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| {
                    MessagingError::queue_setup(&definition.name, format!("qos failed: {e}"))
                })?;

            let deliveries = channel
                .basic_consume(
                    &definition.name,
                    &format!("courier-{}", definition.name),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    MessagingError::queue_setup(&definition.name, format!("consume failed: {e}"))
                })?;

            let publisher = RabbitPublisher {
                channel: self.publish_channel.clone(),
            };
            loops.push(tokio::spawn(queue_loop(
                definition,
                deliveries,
                publisher,
                shutdown.clone(),
            )));
        }

        for task in loops {
            let _ = task.await;
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for RabbitPublisher {
    async fn publish_json(&self, queue: &str, payload: Vec<u8>) -> Result<(), MessagingError> {
        publish_persistent(&self.channel, queue, &payload).await
    }

    async fn healthy(&self) -> bool {
        self.channel.status().connected()
    }
}

/// Publish to the default exchange with the queue name as routing key,
/// persistent delivery mode, awaiting broker confirmation.
async fn publish_persistent(
    channel: &Channel,
    queue: &str,
    payload: &[u8],
) -> Result<(), MessagingError> {
    let confirm = channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type("application/json".into()),
        )
        .await
        .map_err(|e| MessagingError::publish(queue, format!("publish failed: {e}")))?;

    confirm
        .await
        .map_err(|e| MessagingError::publish(queue, format!("publish confirmation failed: {e}")))?;

    Ok(())
}

async fn queue_loop(
    definition: Arc<QueueDefinition>,
    mut deliveries: lapin::Consumer,
    publisher: RabbitPublisher,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(definition.concurrency_limit.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = deliveries.next() => {
                let Some(result) = next else { break };
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        tracing::error!(
                            queue = %definition.name,
                            error = %err,
                            "Delivery stream error"
                        );
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };

                let definition = Arc::clone(&definition);
                let publisher = publisher.clone();
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    let disposition = dispatch(&definition, &delivery.data, shutdown).await;
                    match complete(&publisher, &definition, disposition).await {
                        Completion::Ack => {
                            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                                tracing::warn!(
                                    queue = %definition.name,
                                    error = %err,
                                    "Ack failed; broker will redeliver"
                                );
                            }
                        }
                        Completion::Requeue => {
                            let options = BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            };
                            if let Err(err) = delivery.nack(options).await {
                                tracing::warn!(
                                    queue = %definition.name,
                                    error = %err,
                                    "Nack failed"
                                );
                            }
                        }
                    }
                    drop(permit);
                });
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_broker() -> BrokerConfig {
        BrokerConfig {
            enabled: true,
            host: "localhost".to_string(),
            port: 5672,
            virtual_host: "/".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            use_tls: false,
        }
    }

    #[tokio::test]
    #[ignore = "requires a local RabbitMQ broker on localhost:5672"]
    async fn connects_and_reports_healthy() {
        let topology = RabbitTopology::connect(&local_broker()).await.unwrap();
        assert!(topology.healthy().await);
    }
}
