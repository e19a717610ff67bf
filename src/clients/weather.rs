//! WeatherAPI 历史天气客户端
//!
//! `GET {base}/history.json?key=..&q=lat,lon&dt=YYYY-MM-DD`

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

use crate::forensics::weather::{GeoPoint, WeatherError, WeatherObservation, WeatherProvider};

const USER_AGENT: &str = concat!("yuanjing-verify/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    forecast: Forecast,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    forecastday: Vec<ForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ForecastDay {
    day: Day,
}

#[derive(Debug, Deserialize)]
struct Day {
    avgtemp_c: f64,
    totalprecip_mm: f64,
    condition: Condition,
}

#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

pub struct WeatherApiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WeatherApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, WeatherError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| WeatherError::Api(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiClient {
    async fn historical(
        &self,
        location: GeoPoint,
        date: NaiveDate,
    ) -> Result<WeatherObservation, WeatherError> {
        let q = format!("{},{}", location.latitude, location.longitude);
        let dt = date.format("%Y-%m-%d").to_string();

        tracing::debug!(%q, %dt, "查询历史天气");

        let response = self
            .http_client
            .get(format!("{}/history.json", self.base_url))
            .query(&[("key", self.api_key.as_str()), ("q", q.as_str()), ("dt", dt.as_str())])
            .send()
            .await
            .map_err(|e| WeatherError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| WeatherError::Api(e.to_string()))?;
        parse_history(&body)
    }
}

/// HTTP 状态 → 错误类别
pub fn classify_status(status: u16, body: &str) -> WeatherError {
    let message = format!("HTTP {}: {}", status, body.trim());
    match status {
        400 => WeatherError::InvalidRequest(message),
        401 | 403 => WeatherError::Auth(message),
        _ => WeatherError::Api(message),
    }
}

pub fn parse_history(body: &[u8]) -> Result<WeatherObservation, WeatherError> {
    let parsed: HistoryResponse =
        serde_json::from_slice(body).map_err(|e| WeatherError::Api(format!("parse error: {}", e)))?;
    let day = parsed
        .forecast
        .forecastday
        .into_iter()
        .next()
        .ok_or_else(|| WeatherError::Api("no forecast day in response".to_string()))?
        .day;

    Ok(WeatherObservation {
        condition: day.condition.text,
        avgtemp_c: day.avgtemp_c,
        precipitation_mm: day.totalprecip_mm,
    })
}
