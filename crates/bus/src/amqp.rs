//! AMQP-backed message bus.
//!
//! Publishes to the default exchange with the subject as routing key, so
//! each subject maps onto one durable queue declared at connect time.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};

use crate::{BusError, MessageBus};

#[derive(Clone)]
pub struct AmqpBus {
    channel: Channel,
}

impl AmqpBus {
    /// Connect and declare one durable queue per subject.
    pub async fn connect(uri: &str, subjects: &[&str]) -> Result<Self, BusError> {
        let conn = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connect(format!("amqp connect: {e}")))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connect(format!("amqp channel: {e}")))?;

        for subject in subjects {
            channel
                .queue_declare(
                    subject,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Connect(format!("amqp declare '{subject}': {e}")))?;
        }

        tracing::info!(subjects = subjects.len(), "message bus connected");
        Ok(Self { channel })
    }

    pub async fn close(&self) -> Result<(), BusError> {
        self.channel
            .close(200, "shutdown")
            .await
            .map_err(|e| BusError::Connect(format!("amqp close: {e}")))
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError> {
        self.channel
            .basic_publish(
                "",
                subject,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn receive(&self, subject: &str, max: usize) -> Result<Vec<(Vec<u8>, String)>, BusError> {
        let mut consumer = self
            .channel
            .basic_consume(
                subject,
                "lodestone-connector",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let mut out = Vec::new();
        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(|e| BusError::Consume {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
            out.push((delivery.data.clone(), delivery.delivery_tag.to_string()));
            if out.len() >= max {
                break;
            }
        }
        Ok(out)
    }

    async fn ack(&self, receipt: &str) -> Result<(), BusError> {
        let tag: u64 = receipt
            .parse()
            .map_err(|_| BusError::Ack(format!("bad receipt '{receipt}'")))?;
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nack(&self, receipt: &str, requeue: bool) -> Result<(), BusError> {
        let tag: u64 = receipt
            .parse()
            .map_err(|_| BusError::Ack(format!("bad receipt '{receipt}'")))?;
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}
