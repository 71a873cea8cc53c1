//! # hubmqd — the hubmq daemon
//!
//! Composition root for the messaging platform. Boots the request
//! broker and the event forwarder from a single configuration and runs
//! both until one of them fails or the process receives Ctrl-C.
//!
//! ## Dependency rule
//!
//! This binary wires `hubmq-broker` together with the configuration
//! layer. It contains no protocol logic of its own.

mod config;

use config::Config;
use hubmq_broker::{Broker, EventForwarder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.logging.filter))
        .init();

    // Request broker
    let broker = Broker::bind(&config.request_addr(), config.broker_options()).await?;

    // Event forwarder
    let forwarder =
        EventForwarder::bind(&config.events_in_addr(), &config.events_out_addr()).await?;

    tracing::info!(
        requests = %broker.endpoint(),
        events_in = %forwarder.in_endpoint(),
        events_out = %forwarder.out_endpoint(),
        "hubmqd up"
    );

    tokio::select! {
        outcome = broker.run() => outcome?,
        outcome = forwarder.run() => outcome?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
