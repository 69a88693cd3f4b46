use crate::errors::{Error, Result};
use crate::occupancy::DEFAULT_OCCUPANCY_THRESHOLD_CM;
use crate::sntp::DEFAULT_NTP_SERVER;
use crate::weather::DEFAULT_WEATHER_URL;
use clap::{Parser, ValueEnum};
use std::time::Duration;
use tracing::info;

/// Where ambient data comes from. Local and remote never run together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AmbientMode {
    None,
    Local,
    Remote,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "bay-node", version, about = "Parking bay occupancy telemetry node")]
pub struct Args {
    /// Collector endpoint receiving one JSON record per upload
    #[arg(long, env = "COLLECTOR_URL", default_value = "http://localhost:8080/api/v1/parking")]
    pub collector_url: String,

    #[arg(long, env = "UPLOAD_INTERVAL_SECS", default_value_t = 30)]
    pub upload_interval_secs: u64,

    /// Pause at the end of every ranging cycle
    #[arg(long, env = "CYCLE_DELAY_MS", default_value_t = 1000)]
    pub cycle_delay_ms: u64,

    /// Upper bound for every network call
    #[arg(long, env = "HTTP_TIMEOUT_MS", default_value_t = 5000)]
    pub http_timeout_ms: u64,

    #[arg(long, env = "NTP_SERVER", default_value = DEFAULT_NTP_SERVER)]
    pub ntp_server: String,

    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 600)]
    pub sync_interval_secs: u64,

    #[arg(long, env = "UTC_OFFSET_SECS", default_value_t = 0, allow_negative_numbers = true)]
    pub utc_offset_secs: i32,

    #[arg(long, env = "AMBIENT", value_enum, default_value_t = AmbientMode::None)]
    pub ambient: AmbientMode,

    /// Defaults to the upload interval for a local sensor, ten minutes for the weather provider
    #[arg(long, env = "AMBIENT_INTERVAL_SECS")]
    pub ambient_interval_secs: Option<u64>,

    #[arg(long, env = "WEATHER_URL", default_value = DEFAULT_WEATHER_URL)]
    pub weather_url: String,

    #[arg(long, env = "WEATHER_CITY")]
    pub weather_city: Option<String>,

    #[arg(long, env = "WEATHER_COUNTRY")]
    pub weather_country: Option<String>,

    #[arg(long, env = "WEATHER_API_KEY", hide_env_values = true)]
    pub weather_api_key: Option<String>,

    /// Longest wait for the echo line, ~23 ms covers 4 m
    #[arg(long, env = "ECHO_TIMEOUT_US", default_value_t = 23_324)]
    pub echo_timeout_us: u64,

    #[arg(long, env = "OCCUPANCY_THRESHOLD_CM", default_value_t = DEFAULT_OCCUPANCY_THRESHOLD_CM)]
    pub occupancy_threshold_cm: f32,

    /// Boot-time association attempts before giving up
    #[arg(long, env = "ASSOCIATE_ATTEMPTS", default_value_t = 10)]
    pub associate_attempts: u32,

    /// Seed for the emulated sensors
    #[arg(long, env = "SIM_SEED", default_value_t = 1)]
    pub sim_seed: u64,
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub url: String,
    pub city: String,
    pub country: String,
    pub api_key: String,
}

/// Validated node configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub collector_url: String,
    pub upload_interval: Duration,
    pub cycle_delay: Duration,
    pub network_timeout: Duration,
    pub ntp_server: String,
    pub sync_interval: Duration,
    pub utc_offset_secs: i32,
    pub ambient: AmbientMode,
    pub ambient_interval: Duration,
    pub weather: Option<WeatherConfig>,
    pub echo_timeout: Duration,
    pub occupancy_threshold_cm: f32,
    pub associate_attempts: u32,
    pub sim_seed: u64,
}

impl TryFrom<Args> for NodeConfig {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self> {
        let positive = |name: &str, value: u64| {
            if value == 0 {
                Err(Error::Config(format!("{} must be greater than zero", name)))
            } else {
                Ok(value)
            }
        };

        let upload_interval = Duration::from_secs(positive("upload interval", args.upload_interval_secs)?);
        let sync_interval = Duration::from_secs(positive("sync interval", args.sync_interval_secs)?);
        let network_timeout = Duration::from_millis(positive("HTTP timeout", args.http_timeout_ms)?);
        let echo_timeout = Duration::from_micros(positive("echo timeout", args.echo_timeout_us)?);
        let cycle_delay = Duration::from_millis(positive("cycle delay", args.cycle_delay_ms)?);

        if !(args.occupancy_threshold_cm.is_finite() && args.occupancy_threshold_cm > 0.0) {
            return Err(Error::Config(format!(
                "occupancy threshold must be a positive distance, got {}",
                args.occupancy_threshold_cm
            )));
        }

        let ambient_interval = match (args.ambient_interval_secs, args.ambient) {
            (Some(secs), _) => Duration::from_secs(positive("ambient interval", secs)?),
            (None, AmbientMode::Remote) => Duration::from_secs(600),
            (None, _) => upload_interval,
        };

        let weather = if args.ambient == AmbientMode::Remote {
            let require = |name: &str, value: Option<String>| {
                value
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| Error::Config(format!("{} is required for remote ambient data", name)))
            };
            Some(WeatherConfig {
                url: args.weather_url,
                city: require("WEATHER_CITY", args.weather_city)?,
                country: require("WEATHER_COUNTRY", args.weather_country)?,
                api_key: require("WEATHER_API_KEY", args.weather_api_key)?,
            })
        } else {
            None
        };

        Ok(NodeConfig {
            collector_url: args.collector_url,
            upload_interval,
            cycle_delay,
            network_timeout,
            ntp_server: args.ntp_server,
            sync_interval,
            utc_offset_secs: args.utc_offset_secs,
            ambient: args.ambient,
            ambient_interval,
            weather,
            echo_timeout,
            occupancy_threshold_cm: args.occupancy_threshold_cm,
            associate_attempts: args.associate_attempts.max(1),
            sim_seed: args.sim_seed,
        })
    }
}

impl NodeConfig {
    pub fn log_config(&self) {
        info!("Configuration loaded:");
        info!("  COLLECTOR_URL  : {}", self.collector_url);
        info!("  UPLOAD_INTERVAL: {:?}", self.upload_interval);
        info!("  CYCLE_DELAY    : {:?}", self.cycle_delay);
        info!("  NET_TIMEOUT    : {:?}", self.network_timeout);
        info!("  NTP_SERVER     : {} every {:?}", self.ntp_server, self.sync_interval);
        info!("  UTC_OFFSET     : {}s", self.utc_offset_secs);
        info!("  AMBIENT        : {:?} every {:?}", self.ambient, self.ambient_interval);
        if let Some(weather) = &self.weather {
            info!("  WEATHER        : {},{} via {}", weather.city, weather.country, weather.url);
        }
        info!("  THRESHOLD      : {} cm", self.occupancy_threshold_cm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<NodeConfig> {
        let mut argv = vec!["bay-node"];
        argv.extend_from_slice(extra);
        NodeConfig::try_from(Args::parse_from(argv))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.upload_interval, Duration::from_secs(30));
        assert_eq!(config.cycle_delay, Duration::from_secs(1));
        assert_eq!(config.sync_interval, Duration::from_secs(600));
        assert_eq!(config.echo_timeout, Duration::from_micros(23_324));
        assert_eq!(config.occupancy_threshold_cm, 20.0);
        assert_eq!(config.ambient, AmbientMode::None);
        assert!(config.weather.is_none());
    }

    #[test]
    fn test_local_ambient_follows_upload_interval() {
        let config = parse(&["--ambient", "local", "--upload-interval-secs", "45"]).unwrap();
        assert_eq!(config.ambient_interval, Duration::from_secs(45));
    }

    #[test]
    fn test_remote_requires_weather_settings() {
        let err = parse(&["--ambient", "remote", "--weather-city", "Florence"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = parse(&[
            "--ambient",
            "remote",
            "--weather-city",
            "Florence",
            "--weather-country",
            "IT",
            "--weather-api-key",
            "secret",
        ])
        .unwrap();
        assert_eq!(config.ambient_interval, Duration::from_secs(600));
        assert_eq!(config.weather.unwrap().city, "Florence");
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(parse(&["--upload-interval-secs", "0"]).is_err());
        assert!(matches!(
            parse(&["--cycle-delay-ms", "0"]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_negative_offset() {
        let config = parse(&["--utc-offset-secs", "-18000"]).unwrap();
        assert_eq!(config.utc_offset_secs, -18000);
    }
}
