use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use sml_mqtt_bridge::{
    health_server, liveness::effective_threshold, observability, BridgeConfig, LivenessTracker,
    MeterClient, MqttBus, PollLoop, SamplePublisher, SmlDecoder,
};
use tokio::task::JoinError;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    if let Err(e) = run().await {
        error!("bridge stopped: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = BridgeConfig::from_env().context("invalid configuration")?;
    info!(
        meter = %config.meter.url,
        broker = %config.mqtt.host,
        base_topic = %config.mqtt.base_topic,
        "starting SML to MQTT bridge"
    );

    // Without a publish path there is nothing useful to do, so this is fatal
    let bus = MqttBus::connect(&config.mqtt)
        .await
        .context("MQTT connection failed")?;

    let liveness = Arc::new(LivenessTracker::new());
    let threshold = effective_threshold(config.health.max_age, config.poll_interval);
    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.health.port));
    let health = health_server::spawn(health_addr, liveness.clone(), threshold)
        .await
        .context("failed to bind health endpoint")?;

    let meter = MeterClient::new(&config.meter).context("failed to build HTTP client")?;
    let poll_loop = PollLoop::new(
        meter,
        SmlDecoder::new(config.crc),
        SamplePublisher::new(bus, config.mqtt.base_topic.clone()),
        liveness,
        config.poll_interval,
    )
    .spawn();

    tokio::select! {
        result = poll_loop => Err(poll_loop_stopped(result)),
        result = health => Err(health_stopped(result)),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("shutting down");
            Ok(())
        }
    }
}

// Both tasks run forever, so either one finishing is a failure.
fn poll_loop_stopped(joined: Result<(), JoinError>) -> anyhow::Error {
    match joined {
        Ok(()) => anyhow!("poll loop stopped"),
        Err(e) => anyhow::Error::new(e).context("poll loop task failed"),
    }
}

fn health_stopped(joined: Result<std::io::Result<()>, JoinError>) -> anyhow::Error {
    match joined {
        Ok(Ok(())) => anyhow!("health endpoint stopped"),
        Ok(Err(e)) => anyhow::Error::new(e).context("health endpoint failed"),
        Err(e) => anyhow::Error::new(e).context("health endpoint task failed"),
    }
}
