use crate::ambient::AmbientReading;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_WEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: MainData,
    weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct MainData {
    temp: f32,
    humidity: f32,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

impl From<WeatherResponse> for AmbientReading {
    fn from(response: WeatherResponse) -> Self {
        AmbientReading {
            temperature_c: Some(response.main.temp),
            humidity_pct: Some(response.main.humidity),
            description: response.weather.into_iter().next().map(|w| w.description),
        }
    }
}

/// Current-conditions query against an OpenWeather compatible endpoint.
pub struct WeatherClient {
    http: reqwest::Client,
    url: String,
    location: String,
    api_key: String,
}

impl WeatherClient {
    pub fn new(
        url: impl Into<String>,
        city: &str,
        country: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            location: format!("{},{}", city, country),
            api_key: api_key.into(),
        })
    }

    pub async fn fetch(&self) -> Result<AmbientReading> {
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("q", self.location.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!("Weather provider answered {}: {}", status, body);
            return Err(Error::TransportStatus(status.as_u16()));
        }

        decode(&body)
    }
}

fn decode(body: &str) -> Result<AmbientReading> {
    let response: WeatherResponse = serde_json::from_str(body)?;
    Ok(response.into())
}
