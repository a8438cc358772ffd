//! pullstage: MQTT subscription drained on demand
//!
//! Subscribes to the configured topic, keeps a fixed window of demand
//! outstanding, and logs every delivered message.
//!
//! ## Architecture
//! ```text
//! [MQTT broker] --> [pullstage: source -> buffer -> producer] --> log
//! ```
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - PULLSTAGE_CONFIG: path to a YAML config file (optional)
//! - PULLSTAGE__PRODUCER__...: overrides for individual options
//! - PULLSTAGE_DEMAND: messages requested at a time (default: 10)
//! - PULLSTAGE_LOG: log filter (default: info)

use tracing::{error, info};

use pullstage::buffer::init_buffer_provider;
use pullstage::config::Config;
use pullstage::producer::Producer;
use pullstage::source::init_source_client;
use pullstage::utils::bootstrap::init_tracing;

const DEFAULT_DEMAND: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    let demand = std::env::var("PULLSTAGE_DEMAND")
        .ok()
        .and_then(|d| d.parse().ok())
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_DEMAND);

    let buffers = init_buffer_provider(&config.producer.buffer);
    let source = init_source_client(&config.producer.source);

    let (producer, mut deliveries) =
        match Producer::start(&config.producer, buffers.as_ref(), source.as_ref()).await {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "Failed to start producer");
                return Err(e.into());
            }
        };

    info!(
        buffer_id = %producer.buffer_id(),
        topic = %config.producer.source.topic,
        demand = demand,
        "pullstage started"
    );
    producer.demand(demand);

    loop {
        tokio::select! {
            batch = deliveries.recv() => {
                let Some(batch) = batch else {
                    info!("Producer stopped");
                    break;
                };
                for message in &batch {
                    info!(
                        topic = %message.topic,
                        qos = %message.qos,
                        retain = message.retain,
                        bytes = message.payload.len(),
                        payload = message.payload_utf8().unwrap_or("<binary>"),
                        "Message"
                    );
                }
                producer.demand(batch.len() as u64);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    producer.shutdown().await;
    Ok(())
}
