//! Current weather via Nominatim geocoding + Open-Meteo forecast.

use std::time::Duration;

use reqwest::Client;
use secondbrain_core::config::WeatherConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Invalid coordinates from geocoder: {0}")]
    InvalidCoordinates(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    fn as_str(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    pub temperature: f64,
    pub unit: TemperatureUnit,
    pub current_weather: Option<&'static str>,
}

/// WMO weather interpretation codes.
pub fn weather_label(code: i64) -> Option<&'static str> {
    let label = match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => return None,
    };
    Some(label)
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current: CurrentConditions,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: f64,
    weather_code: i64,
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self, WeatherError> {
        // Nominatim rejects requests without an identifying user agent.
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            geocoding_url: config.geocoding_url.trim_end_matches('/').to_string(),
            forecast_url: config.forecast_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn current_weather(
        &self,
        location: &str,
        unit: TemperatureUnit,
    ) -> Result<WeatherReport, WeatherError> {
        let places: Vec<Place> = self
            .client
            .get(format!("{}/search", self.geocoding_url))
            .query(&[("q", location), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::LocationNotFound(location.to_string()))?;

        let lat: f64 = place
            .lat
            .parse()
            .map_err(|_| WeatherError::InvalidCoordinates(place.lat.clone()))?;
        let lon: f64 = place
            .lon
            .parse()
            .map_err(|_| WeatherError::InvalidCoordinates(place.lon.clone()))?;

        let forecast: Forecast = self
            .client
            .get(format!("{}/v1/forecast", self.forecast_url))
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current", "temperature_2m,rain,weather_code".to_string()),
                ("temperature_unit", unit.as_str().to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(
            location = %location,
            lat,
            lon,
            code = forecast.current.weather_code,
            "Fetched current weather"
        );

        Ok(WeatherReport {
            temperature: forecast.current.temperature_2m,
            unit,
            current_weather: weather_label(forecast.current.weather_code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WeatherClient {
        WeatherClient::new(&WeatherConfig {
            enabled: true,
            geocoding_url: server.uri(),
            forecast_url: server.uri(),
            user_agent: "secondbrain-test".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_weather_labels() {
        assert_eq!(weather_label(0), Some("Clear sky"));
        assert_eq!(weather_label(63), Some("Moderate rain"));
        assert_eq!(weather_label(99), Some("Thunderstorm with heavy hail"));
        assert_eq!(weather_label(4), None);
    }

    #[test]
    fn test_unit_defaults_to_celsius() {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            unit: TemperatureUnit,
        }
        let args: Args = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.unit, TemperatureUnit::Celsius);
    }

    #[tokio::test]
    async fn test_current_weather_geocodes_then_forecasts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Lisbon"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "lat": "38.7077", "lon": "-9.1365", "display_name": "Lisboa" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", "38.7077"))
            .and(query_param("temperature_unit", "fahrenheit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": { "temperature_2m": 71.2, "rain": 0.0, "weather_code": 2 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let report = client(&server)
            .current_weather("Lisbon", TemperatureUnit::Fahrenheit)
            .await
            .unwrap();

        assert_eq!(
            report,
            WeatherReport {
                temperature: 71.2,
                unit: TemperatureUnit::Fahrenheit,
                current_weather: Some("Partly cloudy"),
            }
        );
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["currentWeather"], "Partly cloudy");
        assert_eq!(v["unit"], "fahrenheit");
    }

    #[tokio::test]
    async fn test_unknown_location_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let result = client(&server)
            .current_weather("Nowhere", TemperatureUnit::Celsius)
            .await;
        assert!(matches!(result, Err(WeatherError::LocationNotFound(l)) if l == "Nowhere"));
    }

    #[tokio::test]
    async fn test_forecast_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "lat": "1", "lon": "2" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server)
            .current_weather("Somewhere", TemperatureUnit::Celsius)
            .await;
        assert!(matches!(result, Err(WeatherError::Http(_))));
    }
}
