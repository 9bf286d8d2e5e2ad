//! api.met.no Locationforecast 2.0 client.
//!
//! Fetches weather forecasts from the MET Norway API and caches the latest
//! response until the instant given by the `Expires` response header.
//! See: https://api.met.no/weatherapi/locationforecast/2.0/documentation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::errors::AppError;

const FORECAST_URL: &str = "https://api.met.no/weatherapi/locationforecast/2.0/compact";
/// HTTP request timeout for api.met.no calls (seconds).
const MET_HTTP_TIMEOUT_SECS: u64 = 30;

/// A single point in a forecast timeseries.
///
/// Absent fields mean the provider did not report the value for this instant;
/// consumers must treat them as non-informative, never as zero.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WeatherSnapshot {
    pub time: DateTime<Utc>,
    pub air_temperature: Option<f64>,
    /// Precipitation over the next hour (mm).
    pub precipitation_amount: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// A full forecast: the most recent reported instant plus the hours after it.
#[derive(Debug, Clone)]
pub struct WeatherForecast {
    pub current: WeatherSnapshot,
    /// Sorted ascending by `time`, as delivered by the provider.
    pub timeseries: Vec<WeatherSnapshot>,
}

#[derive(Debug, Default)]
struct ForecastCache {
    forecast: Option<WeatherForecast>,
    expires: Option<DateTime<Utc>>,
}

/// Client for the api.met.no Locationforecast API.
///
/// Cheap to clone; the forecast cache is shared between clones.
#[derive(Debug, Clone)]
pub struct MetClient {
    client: reqwest::Client,
    user_agent: String,
    base_url: String,
    cache: Arc<Mutex<ForecastCache>>,
}

// --- api.met.no JSON response types ---
//
// Every level below `timeseries` entries is optional: a missing sub-object
// maps to absent snapshot fields and must not fail the parse.

#[derive(Debug, Deserialize)]
struct MetResponse {
    properties: MetProperties,
}

#[derive(Debug, Deserialize)]
struct MetProperties {
    timeseries: Vec<MetTimeseries>,
}

#[derive(Debug, Deserialize)]
struct MetTimeseries {
    time: String,
    data: MetData,
}

#[derive(Debug, Deserialize)]
struct MetData {
    #[serde(default)]
    instant: Option<MetInstant>,
    #[serde(default)]
    next_1_hours: Option<MetPeriod>,
}

#[derive(Debug, Deserialize)]
struct MetInstant {
    #[serde(default)]
    details: Option<MetInstantDetails>,
}

#[derive(Debug, Deserialize)]
struct MetInstantDetails {
    air_temperature: Option<f64>,
    relative_humidity: Option<f64>,
    wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MetPeriod {
    #[serde(default)]
    details: Option<MetPeriodDetails>,
}

#[derive(Debug, Deserialize)]
struct MetPeriodDetails {
    precipitation_amount: Option<f64>,
}

impl MetClient {
    pub fn new(user_agent: &str) -> Self {
        Self::with_base_url(user_agent, FORECAST_URL)
    }

    fn with_base_url(user_agent: &str, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(MET_HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            user_agent: user_agent.to_string(),
            base_url: base_url.to_string(),
            cache: Arc::new(Mutex::new(ForecastCache::default())),
        }
    }

    /// Test constructor pointing at a mock server.
    #[cfg(test)]
    pub fn for_test(user_agent: &str, base_url: &str) -> Self {
        Self::with_base_url(user_agent, base_url)
    }

    /// Fetch the forecast for a location.
    ///
    /// Returns the cached forecast while the provider's `Expires` instant has
    /// not passed; otherwise issues a fresh GET. A response without an
    /// `Expires` header leaves the stored expiry unchanged.
    pub async fn fetch_forecast(&self, lat: f64, lon: f64) -> Result<WeatherForecast, AppError> {
        let now = Utc::now();
        {
            let cache = self.cache.lock().await;
            if let (Some(forecast), Some(expires)) = (&cache.forecast, cache.expires) {
                if now < expires {
                    return Ok(forecast.clone());
                }
            }
        }

        let url = format!("{}?lat={}&lon={}", self.base_url, lat, lon);

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| AppError::Internal(format!("Invalid User-Agent: {}", e)))?,
        );

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalService(format!("api.met.no request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "api.met.no returned HTTP {}",
                response.status()
            )));
        }

        // Extract the caching header before consuming the body
        let expires_header = response
            .headers()
            .get("expires")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body: MetResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("api.met.no JSON parse error: {}", e))
        })?;

        let mut snapshots: Vec<WeatherSnapshot> = Vec::with_capacity(body.properties.timeseries.len());
        for entry in &body.properties.timeseries {
            match parse_timeseries_entry(entry) {
                Some(snapshot) => snapshots.push(snapshot),
                None => {
                    tracing::warn!(
                        "Skipping api.met.no timeseries entry with unparseable time '{}'",
                        entry.time,
                    );
                }
            }
        }

        if snapshots.is_empty() {
            return Err(AppError::ExternalService(
                "api.met.no returned empty timeseries".to_string(),
            ));
        }

        let current = snapshots.remove(0);
        let forecast = WeatherForecast {
            current,
            timeseries: snapshots,
        };

        {
            let mut cache = self.cache.lock().await;
            if let Some(raw) = expires_header.as_deref() {
                match parse_expires_header(raw) {
                    Some(expires) => cache.expires = Some(expires),
                    None => {
                        tracing::warn!("Ignoring unparseable Expires header '{}'", raw);
                    }
                }
            }
            cache.forecast = Some(forecast.clone());
        }

        Ok(forecast)
    }
}

/// Parse one timeseries entry. Returns `None` only when the entry's `time`
/// is not valid RFC 3339; missing detail objects become absent fields.
fn parse_timeseries_entry(entry: &MetTimeseries) -> Option<WeatherSnapshot> {
    let time = DateTime::parse_from_rfc3339(&entry.time)
        .ok()?
        .with_timezone(&Utc);

    let instant = entry
        .data
        .instant
        .as_ref()
        .and_then(|i| i.details.as_ref());

    let precipitation_amount = entry
        .data
        .next_1_hours
        .as_ref()
        .and_then(|p| p.details.as_ref())
        .and_then(|d| d.precipitation_amount);

    Some(WeatherSnapshot {
        time,
        air_temperature: instant.and_then(|d| d.air_temperature),
        precipitation_amount,
        relative_humidity: instant.and_then(|d| d.relative_humidity),
        wind_speed: instant.and_then(|d| d.wind_speed),
    })
}

/// Parse an RFC 7231 HTTP date (e.g. "Sat, 14 Feb 2026 12:00:00 GMT") into a
/// `DateTime<Utc>`. Returns `None` when the string matches no known format.
pub fn parse_expires_header(expires: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(expires) {
        return Some(dt.with_timezone(&Utc));
    }

    // HTTP-date variants not covered by RFC 2822 parsing:
    // "Sun, 06 Nov 1994 08:49:37 GMT"   (preferred)
    // "Sunday, 06-Nov-94 08:49:37 GMT"  (obsolete RFC 850)
    // "Sun Nov  6 08:49:37 1994"        (ANSI C asctime)
    let formats = [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ];

    for fmt in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(expires, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "properties": {
                "timeseries": [
                    {
                        "time": "2026-01-15T12:00:00Z",
                        "data": {
                            "instant": {
                                "details": {
                                    "air_temperature": -2.5,
                                    "relative_humidity": 85.0,
                                    "wind_speed": 3.2
                                }
                            },
                            "next_1_hours": {
                                "details": { "precipitation_amount": 0.3 }
                            }
                        }
                    },
                    {
                        "time": "2026-01-15T13:00:00Z",
                        "data": {
                            "instant": {
                                "details": {
                                    "air_temperature": -1.0,
                                    "relative_humidity": 80.0,
                                    "wind_speed": 2.0
                                }
                            }
                        }
                    }
                ]
            }
        })
    }

    fn entry_from(value: serde_json::Value) -> MetTimeseries {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_entry_with_precipitation() {
        let entry = entry_from(serde_json::json!({
            "time": "2026-01-15T12:00:00Z",
            "data": {
                "instant": { "details": { "air_temperature": -2.5 } },
                "next_1_hours": { "details": { "precipitation_amount": 0.3 } }
            }
        }));
        let snap = parse_timeseries_entry(&entry).unwrap();
        assert_eq!(snap.air_temperature, Some(-2.5));
        assert_eq!(snap.precipitation_amount, Some(0.3));
    }

    #[test]
    fn test_parse_entry_without_next_1_hours() {
        let entry = entry_from(serde_json::json!({
            "time": "2026-01-15T13:00:00Z",
            "data": {
                "instant": { "details": { "air_temperature": -1.0 } }
            }
        }));
        let snap = parse_timeseries_entry(&entry).unwrap();
        assert_eq!(snap.precipitation_amount, None);
    }

    #[test]
    fn test_parse_entry_without_instant_details() {
        let entry = entry_from(serde_json::json!({
            "time": "2026-01-15T13:00:00Z",
            "data": {}
        }));
        let snap = parse_timeseries_entry(&entry).unwrap();
        assert_eq!(snap.air_temperature, None);
        assert_eq!(snap.relative_humidity, None);
        assert_eq!(snap.wind_speed, None);
    }

    #[test]
    fn test_parse_entry_with_invalid_time() {
        let entry = entry_from(serde_json::json!({
            "time": "not-a-time",
            "data": {}
        }));
        assert!(parse_timeseries_entry(&entry).is_none());
    }

    #[test]
    fn test_parse_expires_header_rfc2822() {
        let dt = parse_expires_header("Sat, 14 Feb 2026 12:00:00 +0000").unwrap();
        assert_eq!(dt.timestamp(), 1771070400);
    }

    #[test]
    fn test_parse_expires_header_http_date() {
        let dt = parse_expires_header("Sat, 14 Feb 2026 12:00:00 GMT").unwrap();
        assert_eq!(dt.timestamp(), 1771070400);
    }

    #[test]
    fn test_parse_expires_header_garbage() {
        assert!(parse_expires_header("not-a-date").is_none());
    }

    #[tokio::test]
    async fn test_fetch_forecast_splits_current_and_timeseries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("lat", "59.91"))
            .and(query_param("lon", "10.75"))
            .and(header("user-agent", "frostguard-test/0.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let client = MetClient::for_test("frostguard-test/0.1", &server.uri());
        let forecast = client.fetch_forecast(59.91, 10.75).await.unwrap();

        assert_eq!(forecast.current.air_temperature, Some(-2.5));
        assert_eq!(forecast.timeseries.len(), 1);
        assert_eq!(forecast.timeseries[0].air_temperature, Some(-1.0));
    }

    #[tokio::test]
    async fn test_fetch_forecast_uses_cache_until_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(sample_body())
                    .insert_header("Expires", "Wed, 31 Dec 2099 23:59:59 GMT"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = MetClient::for_test("frostguard-test/0.1", &server.uri());
        client.fetch_forecast(59.91, 10.75).await.unwrap();
        client.fetch_forecast(59.91, 10.75).await.unwrap();
        // The mock's expect(1) verifies the second call never hit the server.
    }

    #[tokio::test]
    async fn test_fetch_forecast_refetches_without_expires_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(2)
            .mount(&server)
            .await;

        let client = MetClient::for_test("frostguard-test/0.1", &server.uri());
        client.fetch_forecast(59.91, 10.75).await.unwrap();
        client.fetch_forecast(59.91, 10.75).await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_forecast_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = MetClient::for_test("frostguard-test/0.1", &server.uri());
        let result = client.fetch_forecast(59.91, 10.75).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
    }

    #[tokio::test]
    async fn test_fetch_forecast_fails_on_empty_timeseries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": { "timeseries": [] }
            })))
            .mount(&server)
            .await;

        let client = MetClient::for_test("frostguard-test/0.1", &server.uri());
        let result = client.fetch_forecast(59.91, 10.75).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
    }
}
