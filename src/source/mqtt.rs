//! MQTT push source.
//!
//! Subscribes to a topic filter on a broker via `rumqttc` and enqueues every
//! incoming PUBLISH into the bound buffer. Startup waits for the broker to
//! acknowledge both the connection and the subscription; anything short of
//! that is a startup failure. Once running, dropped connections are retried
//! with backoff and the subscription is renewed on every fresh session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS, SubscribeReasonCode,
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{Result, SourceClient, SourceError, SourceHandle, Subscription};
use crate::buffer::Buffer;
use crate::config::{ClientOptions, ConnectionConfig};
use crate::message::{Message, QualityOfService};
use crate::utils::retry::{reconnect_backoff, MAX_RECONNECT_DELAY};

/// MQTT source client.
#[derive(Debug, Default, Clone)]
pub struct MqttSourceClient;

impl MqttSourceClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceClient for MqttSourceClient {
    #[tracing::instrument(
        name = "source.start",
        skip_all,
        fields(buffer_id = %buffer.id(), topic = %subscription.topic)
    )]
    async fn start(
        &self,
        buffer: Arc<dyn Buffer>,
        subscription: &Subscription,
        connection: &ConnectionConfig,
        options: &ClientOptions,
    ) -> Result<SourceHandle> {
        let mqtt_options = mqtt_options(connection, options)?;
        let client_id = mqtt_options.client_id();
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, options.channel_capacity);

        let qos = to_mqtt_qos(subscription.qos);
        client
            .subscribe(subscription.topic.clone(), qos)
            .await
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;

        let timeout = Duration::from_millis(connection.connect_timeout_ms);
        tokio::time::timeout(timeout, await_subscribed(&mut event_loop, buffer.as_ref()))
            .await
            .map_err(|_| SourceError::Timeout(timeout))??;

        info!(
            client_id = %client_id,
            host = %connection.host,
            port = connection.port,
            qos = %subscription.qos,
            "MQTT source subscribed"
        );

        let task = tokio::spawn(run_event_loop(
            client.clone(),
            event_loop,
            buffer,
            subscription.clone(),
        ));
        Ok(SourceHandle::with_client(task, client))
    }
}

/// Build rumqttc options from connection parameters and client options.
///
/// Generates a `pullstage-<uuid>` client id when none is configured.
pub fn mqtt_options(connection: &ConnectionConfig, options: &ClientOptions) -> Result<MqttOptions> {
    let client_id = match &options.client_id {
        Some(id) if id.is_empty() || id.starts_with(' ') => {
            return Err(SourceError::InvalidOptions(format!(
                "invalid client id '{}'",
                id
            )));
        }
        Some(id) => id.clone(),
        None => format!("pullstage-{}", Uuid::new_v4()),
    };

    let mut mqtt_options = MqttOptions::new(client_id, connection.host.clone(), connection.port);
    mqtt_options.set_keep_alive(Duration::from_secs(connection.keep_alive_secs));
    mqtt_options.set_clean_session(connection.clean_session);

    match (&options.username, &options.password) {
        (Some(username), Some(password)) => {
            mqtt_options.set_credentials(username.clone(), password.clone());
        }
        (None, None) => {}
        _ => {
            return Err(SourceError::InvalidOptions(
                "username and password must be set together".to_string(),
            ));
        }
    }

    if let Some(max) = options.max_packet_size {
        mqtt_options.set_max_packet_size(max, max);
    }

    Ok(mqtt_options)
}

fn to_mqtt_qos(qos: QualityOfService) -> QoS {
    match qos {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: QoS) -> QualityOfService {
    match qos {
        QoS::AtMostOnce => QualityOfService::AtMostOnce,
        QoS::AtLeastOnce => QualityOfService::AtLeastOnce,
        QoS::ExactlyOnce => QualityOfService::ExactlyOnce,
    }
}

/// Convert an incoming PUBLISH into a buffered message.
pub fn to_message(publish: &Publish) -> Message {
    Message::new(publish.topic.clone(), publish.payload.clone())
        .with_qos(from_mqtt_qos(publish.qos))
        .with_retain(publish.retain)
}

/// Drive the event loop until the subscription is acknowledged.
///
/// Retained messages that arrive before the SUBACK are buffered, not lost.
async fn await_subscribed(event_loop: &mut EventLoop, buffer: &dyn Buffer) -> Result<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(session_present = ack.session_present, "Broker accepted connection");
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(SourceError::Subscribe(
                        "broker rejected subscription".to_string(),
                    ));
                }
                return Ok(());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                buffer.enqueue(to_message(&publish));
            }
            Ok(_) => {}
            Err(e) => return Err(SourceError::Connection(e.to_string())),
        }
    }
}

/// Event loop for a running source. Returns once DISCONNECT has been sent.
async fn run_event_loop(
    client: AsyncClient,
    mut event_loop: EventLoop,
    buffer: Arc<dyn Buffer>,
    subscription: Subscription,
) {
    let backoff_builder = reconnect_backoff();
    let mut backoff_iter = backoff_builder.build();
    let qos = to_mqtt_qos(subscription.qos);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(
                    buffer_id = %buffer.id(),
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "Enqueued MQTT message"
                );
                buffer.enqueue(to_message(&publish));
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(
                    topic = %subscription.topic,
                    session_present = ack.session_present,
                    "Reconnected to broker"
                );
                backoff_iter = backoff_builder.build();

                // A fresh session has forgotten the subscription.
                if !ack.session_present {
                    if let Err(e) = client.try_subscribe(subscription.topic.clone(), qos) {
                        error!(error = %e, topic = %subscription.topic, "Failed to resubscribe");
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    error!(topic = %subscription.topic, "Broker rejected resubscription");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!(
                    buffer_id = %buffer.id(),
                    topic = %subscription.topic,
                    "Disconnected from broker"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff_iter.next().unwrap_or(MAX_RECONNECT_DELAY);
                warn!(
                    error = %e,
                    backoff_ms = %delay.as_millis(),
                    topic = %subscription.topic,
                    "MQTT connection error, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
