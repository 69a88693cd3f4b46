use anyhow::Context;
use bay_node::ambient::{AmbientSource, LocalAmbient, RemoteAmbient};
use bay_node::clock::TimeSource;
use bay_node::config::{AmbientMode, Args, NodeConfig};
use bay_node::link;
use bay_node::metrics;
use bay_node::ranging::RangingDriver;
use bay_node::scheduler::Scheduler;
use bay_node::sim::{SimulatedBay, SimulatedHygrometer};
use bay_node::sntp::SntpClient;
use bay_node::uploader::Uploader;
use bay_node::weather::WeatherClient;
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const HYGROMETER_FAULT_RATE: f64 = 0.05;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NodeConfig::try_from(Args::parse()).context("invalid configuration")?;

    info!("Starting parking bay node");
    config.log_config();

    metrics::init_metrics();

    let link = match link::associate(
        &config.collector_url,
        config.associate_attempts,
        Duration::from_secs(1),
    )
    .await
    {
        Ok(link) => link,
        Err(e) => {
            error!("Failed to join the network: {}", e);
            std::process::exit(1);
        }
    };

    let bay = SimulatedBay::wandering(config.sim_seed);
    let ranger = RangingDriver::new(bay.trigger_pin(), bay.echo_pin(), bay.delay(), config.echo_timeout);

    let ambient = match config.ambient {
        AmbientMode::None => AmbientSource::Disabled,
        AmbientMode::Local => AmbientSource::Local(LocalAmbient::new(Box::new(
            SimulatedHygrometer::new(config.sim_seed, HYGROMETER_FAULT_RATE),
        ))),
        AmbientMode::Remote => {
            let weather = config
                .weather
                .as_ref()
                .context("remote ambient mode without weather settings")?;
            let client = WeatherClient::new(
                weather.url.clone(),
                &weather.city,
                &weather.country,
                weather.api_key.clone(),
                config.network_timeout,
            )?;
            AmbientSource::Remote(RemoteAmbient::new(client))
        }
    };

    let clock = TimeSource::new(
        SntpClient::new(config.ntp_server.clone(), config.network_timeout),
        config.utc_offset_secs,
    )?;
    let uploader = Uploader::new(config.collector_url.clone(), config.network_timeout)?;

    let mut scheduler = Scheduler::new(&config, ranger, link, ambient, clock, uploader);

    tokio::select! {
        _ = scheduler.run() => {
            error!("Scheduler terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down after {} cycles", scheduler.state().cycles);
    info!("Final metrics:\n{}", metrics::gather_metrics());
    Ok(())
}
