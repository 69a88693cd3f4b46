use crate::errors::{Error, Result};
use crate::weather::WeatherClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Secondary environmental data attached to a telemetry record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbientReading {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub description: Option<String>,
}

/// One raw read of a temperature/humidity peripheral. Either channel may be
/// NaN when the peripheral misbehaves without reporting a fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HygrometerFault {
    Checksum,
    Timeout,
    Bus,
}

/// A local temperature/humidity peripheral.
pub trait Hygrometer {
    fn read(&mut self) -> std::result::Result<ClimateSample, HygrometerFault>;
}

/// Reads the local peripheral and distrusts anything that looks wrong.
pub struct LocalAmbient {
    hygrometer: Box<dyn Hygrometer>,
}

impl LocalAmbient {
    pub fn new(hygrometer: Box<dyn Hygrometer>) -> Self {
        Self { hygrometer }
    }

    pub fn read(&mut self) -> Result<AmbientReading> {
        let sample = self.hygrometer.read().map_err(|fault| {
            warn!("Hygrometer fault: {:?}", fault);
            Error::SensorInvalidReading
        })?;

        if sample.temperature_c.is_nan() || sample.humidity_pct.is_nan() {
            warn!(
                "Hygrometer returned NaN (temperature={}, humidity={})",
                sample.temperature_c, sample.humidity_pct
            );
            return Err(Error::SensorInvalidReading);
        }

        Ok(AmbientReading {
            temperature_c: Some(sample.temperature_c),
            humidity_pct: Some(sample.humidity_pct),
            description: None,
        })
    }
}

/// Outcome of one ambient refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum AmbientUpdate {
    Fresh(AmbientReading),
    /// The source failed; carries the last good reading.
    Stale(AmbientReading),
}

impl AmbientUpdate {
    pub fn into_reading(self) -> AmbientReading {
        match self {
            AmbientUpdate::Fresh(reading) | AmbientUpdate::Stale(reading) => reading,
        }
    }
}

/// Polls the weather provider and falls back to the last good answer.
pub struct RemoteAmbient {
    client: WeatherClient,
    last_good: AmbientReading,
}

impl RemoteAmbient {
    pub fn new(client: WeatherClient) -> Self {
        Self {
            client,
            last_good: AmbientReading::default(),
        }
    }

    /// A provider or decode error yields the cached reading as `Stale`. The
    /// cache is all `None` until the first successful fetch.
    pub async fn read(&mut self) -> AmbientUpdate {
        match self.client.fetch().await {
            Ok(reading) => {
                debug!("Weather refreshed: {:?}", reading);
                self.last_good = reading.clone();
                AmbientUpdate::Fresh(reading)
            }
            Err(e) => {
                warn!("Weather query failed, keeping last values: {}", e);
                AmbientUpdate::Stale(self.last_good.clone())
            }
        }
    }
}

/// The active ambient strategy, chosen once at startup.
pub enum AmbientSource {
    Disabled,
    Local(LocalAmbient),
    Remote(RemoteAmbient),
}

impl AmbientSource {
    pub fn needs_link(&self) -> bool {
        matches!(self, AmbientSource::Remote(_))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, AmbientSource::Disabled)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AmbientSource::Local(_))
    }

    /// Only a local sensor can fail outright; the remote source degrades to
    /// `Stale`.
    pub async fn read(&mut self) -> Result<AmbientUpdate> {
        match self {
            AmbientSource::Disabled => Ok(AmbientUpdate::Fresh(AmbientReading::default())),
            AmbientSource::Local(local) => local.read().map(AmbientUpdate::Fresh),
            AmbientSource::Remote(remote) => Ok(remote.read().await),
        }
    }
}
