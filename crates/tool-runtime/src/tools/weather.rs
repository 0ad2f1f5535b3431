//! Weather lookup via Open-Meteo (no API key required).
//!
//! Two requests: geocode the city, then fetch current conditions in
//! Fahrenheit. Every failure is reported to the model as `{"error": ...}`
//! content rather than a tool error, so it can explain the problem.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Current weather for a city.
pub struct GetWeatherTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl GetWeatherTool {
    pub fn new() -> Self {
        Self::with_endpoints(GEOCODING_URL, FORECAST_URL)
    }

    pub fn with_endpoints(geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
        }
    }

    async fn fetch(&self, location: &str) -> Result<Value, String> {
        let city = location.split(',').next().unwrap_or(location).trim();

        let geo = self
            .client
            .get(&self.geocoding_url)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await
            .map_err(|e| format!("Failed to fetch weather: {e}"))?;
        if !geo.status().is_success() {
            return Err(format!("Geocoding API error: {}", geo.status().as_u16()));
        }
        let geo: GeocodingResponse = geo
            .json()
            .await
            .map_err(|e| format!("Failed to fetch weather: {e}"))?;
        let Some(place) = geo.results.into_iter().next() else {
            return Err(format!("Location \"{location}\" not found"));
        };

        let forecast = self
            .client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                ("current", "temperature_2m,weather_code,wind_speed_10m".to_string()),
                ("temperature_unit", "fahrenheit".to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("Failed to fetch weather: {e}"))?;
        if !forecast.status().is_success() {
            return Err(format!("Weather API error: {}", forecast.status().as_u16()));
        }
        let forecast: ForecastResponse = forecast
            .json()
            .await
            .map_err(|e| format!("Failed to fetch weather: {e}"))?;
        let current = forecast
            .current
            .ok_or_else(|| "Weather data unavailable".to_string())?;

        Ok(json!({
            "location": format!("{}, {}", place.name, place.country.unwrap_or_default()),
            "temperature": format!("{}°F", current.temperature_2m),
            "wind_speed": format!("{} mph", current.wind_speed_10m),
            "conditions": describe_weather_code(current.weather_code),
        }))
    }
}

impl Default for GetWeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    #[serde(default)]
    country: Option<String>,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    wind_speed_10m: f64,
    weather_code: u32,
}

/// WMO weather interpretation codes.
pub fn describe_weather_code(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        51 => "Light drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        95 => "Thunderstorm",
        _ => "Unknown",
    }
}

#[async_trait]
impl Tool for GetWeatherTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Get current weather for a location".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "City name, e.g. San Francisco, CA"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let location = input
            .get("location")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'location' field".to_string()))?;

        debug!(location, request_id = %context.request_id, "get_weather");

        match self.fetch(location).await {
            Ok(report) => Ok(ToolResult::ok(report.to_string())),
            Err(message) => Ok(ToolResult {
                tool_call_id: String::new(),
                content: json!({ "error": message }).to_string(),
                is_error: true,
            }),
        }
    }
}
