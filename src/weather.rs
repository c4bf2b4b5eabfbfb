//! Weather forecasts from Open-Meteo.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Open-Meteo forecasts at most this many days ahead.
pub const MAX_FORECAST_DAYS: i64 = 16;

/// WMO weather interpretation code to icon and description.
pub fn describe_code(code: u32) -> (&'static str, &'static str) {
    match code {
        0 => ("☀️", "Clear sky"),
        1 => ("🌤️", "Mainly clear"),
        2 => ("⛅", "Partly cloudy"),
        3 => ("☁️", "Overcast"),
        45 => ("🌫️", "Foggy"),
        48 => ("🌫️", "Icy fog"),
        51 => ("🌧️", "Light drizzle"),
        53 => ("🌧️", "Drizzle"),
        55 => ("🌧️", "Heavy drizzle"),
        61 => ("🌧️", "Light rain"),
        63 => ("🌧️", "Rain"),
        65 => ("🌧️", "Heavy rain"),
        66 => ("🌨️", "Freezing rain"),
        67 => ("🌨️", "Heavy freezing rain"),
        71 => ("🌨️", "Light snow"),
        73 => ("🌨️", "Snow"),
        75 => ("❄️", "Heavy snow"),
        77 => ("🌨️", "Snow grains"),
        80 => ("🌦️", "Light showers"),
        81 => ("🌦️", "Showers"),
        82 => ("⛈️", "Heavy showers"),
        85 => ("🌨️", "Snow showers"),
        86 => ("🌨️", "Heavy snow showers"),
        95 => ("⛈️", "Thunderstorm"),
        96 => ("⛈️", "Thunderstorm with hail"),
        99 => ("⛈️", "Thunderstorm with heavy hail"),
        _ => ("🌡️", "Unknown"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyWeather {
    pub icon: String,
    pub description: String,
    pub temp_max: Option<i64>,
    pub temp_min: Option<i64>,
    pub weather_code: u32,
}

impl DailyWeather {
    pub fn from_code(code: u32, temp_max: Option<f64>, temp_min: Option<f64>) -> Self {
        let (icon, description) = describe_code(code);
        Self {
            icon: icon.to_string(),
            description: description.to_string(),
            temp_max: temp_max.map(|t| t.round() as i64),
            temp_min: temp_min.map(|t| t.round() as i64),
            weather_code: code,
        }
    }

    /// Clear to overcast skies above 10°C.
    pub fn is_good_for_walking(&self) -> bool {
        self.weather_code <= 3 && self.temp_max.map_or(false, |t| t > 10)
    }
}

/// Body of `GET /weather`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WeatherResponse {
    Forecast(DailyWeather),
    Unavailable { unavailable: bool, reason: String },
}

impl WeatherResponse {
    fn unavailable(reason: &str) -> Self {
        Self::Unavailable {
            unavailable: true,
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn coordinates(&self, city: &str, country: Option<&str>) -> Option<Coordinates>;

    async fn daily(&self, coords: &Coordinates, date: NaiveDate) -> Option<DailyWeather>;
}

/// Forecast for `city` on `date`. Past dates have no forecast; dates more
/// than [`MAX_FORECAST_DAYS`] ahead are reported as not available yet.
pub async fn forecast(
    provider: &dyn WeatherProvider,
    city: &str,
    country: Option<&str>,
    date: NaiveDate,
    today: NaiveDate,
) -> WeatherResponse {
    let Some(coords) = provider.coordinates(city, country).await else {
        return WeatherResponse::unavailable("City not found");
    };

    let days_ahead = (date - today).num_days();
    if days_ahead < 0 {
        return WeatherResponse::unavailable("Weather data not available");
    }
    if days_ahead > MAX_FORECAST_DAYS {
        return WeatherResponse::unavailable("Forecast not available yet");
    }

    match provider.daily(&coords, date).await {
        Some(weather) => WeatherResponse::Forecast(weather),
        None => WeatherResponse::unavailable("Weather data not available"),
    }
}

/// Retention nudge text when tomorrow looks good in `city`.
pub async fn good_weather_message(
    provider: &dyn WeatherProvider,
    city: &str,
    tomorrow: NaiveDate,
) -> Option<String> {
    let coords = provider.coordinates(city, None).await?;
    let weather = provider.daily(&coords, tomorrow).await?;
    if !weather.is_good_for_walking() {
        return None;
    }
    Some(format!(
        "{} Beautiful {}°C weather for a walk tomorrow in {}!",
        weather.icon,
        weather.temp_max?,
        city
    ))
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    daily: Option<DailySeries>,
}

#[derive(Deserialize)]
struct DailySeries {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    weather_code: Vec<Option<u32>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
}

/// Open-Meteo client with an in-process geocoding cache.
pub struct OpenMeteoClient {
    client: Client,
    geocode_cache: RwLock<HashMap<String, Coordinates>>,
}

impl OpenMeteoClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            geocode_cache: RwLock::new(HashMap::new()),
        }
    }

    async fn lookup(&self, city: &str, country: Option<&str>) -> Result<Option<Coordinates>, reqwest::Error> {
        let query = match country {
            Some(country) => format!("{}, {}", city, country),
            None => city.to_string(),
        };
        let resp: GeocodingResponse = self
            .client
            .get(GEOCODING_URL)
            .query(&[
                ("name", query.as_str()),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.results.into_iter().next().map(|r| Coordinates {
            latitude: r.latitude,
            longitude: r.longitude,
            name: r.name.unwrap_or_else(|| city.to_string()),
        }))
    }

    async fn fetch_daily(&self, coords: &Coordinates, date: &str) -> Result<Option<DailyWeather>, reqwest::Error> {
        let resp: ForecastResponse = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", coords.latitude.to_string()),
                ("longitude", coords.longitude.to_string()),
                (
                    "daily",
                    "weather_code,temperature_2m_max,temperature_2m_min".to_string(),
                ),
                ("timezone", "auto".to_string()),
                ("start_date", date.to_string()),
                ("end_date", date.to_string()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.daily.and_then(|d| {
            if d.time.is_empty() {
                return None;
            }
            let code = d.weather_code.first().copied().flatten().unwrap_or(0);
            let max = d.temperature_2m_max.first().copied().flatten();
            let min = d.temperature_2m_min.first().copied().flatten();
            Some(DailyWeather::from_code(code, max, min))
        }))
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn coordinates(&self, city: &str, country: Option<&str>) -> Option<Coordinates> {
        let key = format!("{}_{}", city, country.unwrap_or_default());
        if let Some(hit) = self.geocode_cache.read().await.get(&key) {
            return Some(hit.clone());
        }

        match self.lookup(city, country).await {
            Ok(Some(coords)) => {
                self.geocode_cache
                    .write()
                    .await
                    .insert(key, coords.clone());
                Some(coords)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(city, "Geocoding failed: {}", e);
                None
            }
        }
    }

    async fn daily(&self, coords: &Coordinates, date: NaiveDate) -> Option<DailyWeather> {
        let date = date.format("%Y-%m-%d").to_string();
        match self.fetch_daily(coords, &date).await {
            Ok(weather) => weather,
            Err(e) => {
                tracing::error!(place = %coords.name, %date, "Forecast request failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// Knows a fixed set of cities and returns the same weather everywhere.
    pub struct FixedWeather {
        pub cities: Vec<String>,
        pub weather: Option<DailyWeather>,
    }

    #[async_trait]
    impl WeatherProvider for FixedWeather {
        async fn coordinates(&self, city: &str, _country: Option<&str>) -> Option<Coordinates> {
            self.cities.iter().any(|c| c == city).then(|| Coordinates {
                latitude: 45.76,
                longitude: 4.84,
                name: city.to_string(),
            })
        }

        async fn daily(&self, _coords: &Coordinates, _date: NaiveDate) -> Option<DailyWeather> {
            self.weather.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FixedWeather;
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn lyon(weather: Option<DailyWeather>) -> FixedWeather {
        FixedWeather {
            cities: vec!["Lyon".to_string()],
            weather,
        }
    }

    #[test]
    fn test_code_table() {
        assert_eq!(describe_code(0), ("☀️", "Clear sky"));
        assert_eq!(describe_code(75), ("❄️", "Heavy snow"));
        assert_eq!(describe_code(42), ("🌡️", "Unknown"));
    }

    #[test]
    fn test_temperatures_are_rounded() {
        let w = DailyWeather::from_code(2, Some(18.6), Some(7.4));
        assert_eq!(w.temp_max, Some(19));
        assert_eq!(w.temp_min, Some(7));
        assert_eq!(w.icon, "⛅");
    }

    #[tokio::test]
    async fn test_forecast_window() {
        let provider = lyon(Some(DailyWeather::from_code(0, Some(20.0), Some(10.0))));
        let today = day("2026-06-01");

        let ok = forecast(&provider, "Lyon", None, day("2026-06-03"), today).await;
        assert!(matches!(ok, WeatherResponse::Forecast(_)));

        let far = forecast(&provider, "Lyon", None, day("2026-06-18"), today).await;
        assert_eq!(far, WeatherResponse::unavailable("Forecast not available yet"));
        let edge = forecast(&provider, "Lyon", None, day("2026-06-17"), today).await;
        assert!(matches!(edge, WeatherResponse::Forecast(_)));

        let past = forecast(&provider, "Lyon", None, day("2026-05-31"), today).await;
        assert_eq!(past, WeatherResponse::unavailable("Weather data not available"));

        let unknown = forecast(&provider, "Atlantis", None, day("2026-06-02"), today).await;
        assert_eq!(unknown, WeatherResponse::unavailable("City not found"));
    }

    #[test]
    fn test_unavailable_serializes_flat() {
        let json = serde_json::to_value(WeatherResponse::unavailable("City not found")).unwrap();
        assert_eq!(json, serde_json::json!({"unavailable": true, "reason": "City not found"}));
    }

    #[tokio::test]
    async fn test_good_weather_message() {
        let tomorrow = day("2026-06-02");
        let sunny = lyon(Some(DailyWeather::from_code(1, Some(22.0), None)));
        assert_eq!(
            good_weather_message(&sunny, "Lyon", tomorrow).await.as_deref(),
            Some("🌤️ Beautiful 22°C weather for a walk tomorrow in Lyon!")
        );

        let cold = lyon(Some(DailyWeather::from_code(0, Some(10.0), None)));
        assert!(good_weather_message(&cold, "Lyon", tomorrow).await.is_none());

        let rainy = lyon(Some(DailyWeather::from_code(61, Some(25.0), None)));
        assert!(good_weather_message(&rainy, "Lyon", tomorrow).await.is_none());
    }
}
