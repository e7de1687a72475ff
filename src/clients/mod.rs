/// External API clients module
use crate::domain::{SunResponse, SunTimes};
use crate::errors::{SyncError, SyncResult};
use crate::utils::format_time_only;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Cached sun data older than this is refetched
pub const DATA_STALE_PERIOD: Duration = Duration::from_secs(120);

pub const DEFAULT_SUN_SERVER_URL: &str = "https://api.sunrise-sunset.org/json";

/// Minimal HTTP capability the clients are built on.
/// Both calls fail on a non-2xx status.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> SyncResult<String>;
    async fn put(&self, url: &str, body: String) -> SyncResult<String>;
}

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("phoscon-sunmon/0.1")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn get(&self, url: &str) -> SyncResult<String> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }

    async fn put(&self, url: &str, body: String) -> SyncResult<String> {
        let resp = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }
}

/// Last successful fetch; both halves are replaced together
#[derive(Debug, Clone, Copy)]
struct TimeCache {
    times: SunTimes,
    fetched_at: Instant,
}

/// Sunrise/sunset client for sunrise-sunset.org
pub struct SunClient {
    transport: Arc<dyn HttpTransport>,
    request_url: String,
    cache: Option<TimeCache>,
    fetch_counter: u64,
}

impl SunClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        server_url: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        let request_url = format!(
            "{}?lat={:.7}&lng={:.7}&formatted=0",
            server_url, latitude, longitude
        );
        info!(
            "Sunrise/Sunset client initialised with location lat={:.6} long={:.6}",
            latitude, longitude
        );
        info!("Attribution of API to sunrise-sunset.org");

        Self {
            transport,
            request_url,
            cache: None,
            fetch_counter: 0,
        }
    }

    /// Number of successful remote fetches so far
    pub fn fetch_count(&self) -> u64 {
        self.fetch_counter
    }

    /// Current sun times, served from cache while it is fresh
    pub async fn lookup(&mut self) -> SyncResult<SunTimes> {
        if let Some(cache) = &self.cache {
            let age = cache.fetched_at.elapsed();
            let use_cached = age < DATA_STALE_PERIOD;
            debug!(
                "Sunrise/sunset data is {} seconds old, cache use: {}",
                age.as_secs(),
                if use_cached { "yes" } else { "no" }
            );
            if use_cached {
                return Ok(cache.times);
            }
        }

        let started = Instant::now();
        let times = self
            .fetch()
            .await
            .map_err(|e| e.context("lookup failed"))?;

        self.cache = Some(TimeCache {
            times,
            fetched_at: started,
        });
        self.fetch_counter += 1;
        info!(
            sunrise = %format_time_only(&times.sunrise),
            sunset = %format_time_only(&times.sunset),
            "Fetched sun times (UTC)"
        );

        Ok(times)
    }

    async fn fetch(&self) -> SyncResult<SunTimes> {
        debug!("req: {}", self.request_url);
        let body = self.transport.get(&self.request_url).await?;
        debug!("result buffer: {}", body);
        parse_sun_response(&body)
    }
}

impl Drop for SunClient {
    fn drop(&mut self) {
        info!(
            "Tearing down sun client, total lookups: {}",
            self.fetch_count()
        );
    }
}

/// Parse an oracle response; both instants or an error
pub fn parse_sun_response(body: &str) -> SyncResult<SunTimes> {
    let resp: SunResponse = serde_json::from_str(body)
        .map_err(|e| SyncError::MalformedResponse(format!("could not parse JSON: {}", e)))?;

    if resp.status != "OK" {
        return Err(SyncError::MalformedResponse(format!(
            "server returned invalid status '{}'",
            resp.status
        )));
    }

    let sunrise = parse_instant(&resp.results.sunrise, "sunrise")?;
    let sunset = parse_instant(&resp.results.sunset, "sunset")?;

    Ok(SunTimes { sunrise, sunset })
}

fn parse_instant(s: &str, what: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            SyncError::MalformedResponse(format!("could not parse {} time string '{}'", what, s))
        })
}
