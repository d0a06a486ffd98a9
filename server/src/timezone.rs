//! This module provides [TimezoneResolver], which annotates items with the timezone in effect where and when they
//! were captured.
//!
//! Consecutive items in a directory tend to come from the same place and day, so the most recent resolution is
//! remembered and reused for any item within a degree and a day of it.

use {
    anyhow::{anyhow, Result},
    archivist_shared::Media,
    futures::future::{BoxFuture, FutureExt},
    serde_derive::Deserialize,
    std::sync::Arc,
    tokio::sync::Mutex as AsyncMutex,
    tracing::warn,
};

const GOOGLE_TIMEZONE_URL: &str = "https://maps.googleapis.com/maps/api/timezone/json";

/// Maximum latitude or longitude difference, in degrees, for a cached zone to be reused
pub const CACHE_DEGREES: f64 = 1.0;

/// Maximum capture time difference, in seconds, for a cached zone to be reused
pub const CACHE_SECONDS: i64 = 86_400;

/// A resolved timezone
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    /// IANA zone name
    pub timezone: String,

    /// Total offset from UTC in seconds, including any daylight saving adjustment
    pub offset: i64,
}

/// External source of timezone information
pub trait TimezoneLookup: Send + Sync {
    fn lookup(&self, lat: f64, lng: f64, timestamp: i64) -> BoxFuture<'_, Result<Zone>>;
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GoogleTimezoneResponse {
    status: Option<String>,
    time_zone_id: Option<String>,
    raw_offset: Option<f64>,
    dst_offset: Option<f64>,
    error_message: Option<String>,
}

impl GoogleTimezoneResponse {
    fn zone(self) -> Result<Zone> {
        match (self.time_zone_id, self.raw_offset) {
            (Some(timezone), Some(raw_offset)) => Ok(Zone {
                timezone,
                offset: (raw_offset + self.dst_offset.unwrap_or(0.0)) as i64,
            }),

            _ => Err(anyhow!(
                "invalid timezone response: {} {}",
                self.status.as_deref().unwrap_or("(no status)"),
                self.error_message.as_deref().unwrap_or("")
            )),
        }
    }
}

/// [TimezoneLookup] backed by the Google Time Zone API
pub struct GoogleTimezone {
    client: reqwest::Client,
    key: Option<String>,
    url: String,
}

impl GoogleTimezone {
    /// Create a new instance which uses the specified client, which should be configured with a request timeout.
    pub fn new(client: reqwest::Client, key: Option<String>) -> Self {
        Self {
            client,
            key,
            url: GOOGLE_TIMEZONE_URL.to_owned(),
        }
    }
}

impl TimezoneLookup for GoogleTimezone {
    fn lookup(&self, lat: f64, lng: f64, timestamp: i64) -> BoxFuture<'_, Result<Zone>> {
        async move {
            let key = self
                .key
                .as_deref()
                .ok_or_else(|| anyhow!("no timezone API key configured"))?;

            self.client
                .get(&self.url)
                .query(&[
                    ("location", format!("{},{}", lat, lng)),
                    ("timestamp", timestamp.to_string()),
                    ("key", key.to_owned()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json::<GoogleTimezoneResponse>()
                .await?
                .zone()
        }
        .boxed()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    lat: f64,
    lng: f64,
    time: i64,
    zone: Zone,
}

impl CacheEntry {
    fn covers(&self, lat: f64, lng: f64, time: i64) -> bool {
        (self.lat - lat).abs() <= CACHE_DEGREES
            && (self.lng - lng).abs() <= CACHE_DEGREES
            && self.time.abs_diff(time) <= CACHE_SECONDS.unsigned_abs()
    }
}

/// Outcome of [TimezoneResolver::resolve]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The item lacks a location or timestamp and was left untouched
    Skipped,

    /// The item was annotated from the cache
    Cached,

    /// The item was annotated from a fresh lookup
    Resolved,

    /// The lookup failed and the item's timezone was cleared; the message is suitable for display
    Failed(String),
}

pub struct TimezoneResolver {
    lookup: Arc<dyn TimezoneLookup>,
    cache: AsyncMutex<Option<CacheEntry>>,
}

impl TimezoneResolver {
    pub fn new(lookup: Arc<dyn TimezoneLookup>) -> Self {
        Self {
            lookup,
            cache: AsyncMutex::new(None),
        }
    }

    /// Set `item`'s timezone and offset according to its location and capture time.
    ///
    /// Failures are never propagated; instead the item's timezone is cleared and [Resolution::Failed] is returned.
    pub async fn resolve(&self, item: &mut Media) -> Resolution {
        let (lat, lng, timestamp) = match (item.lat, item.lng, item.timestamp) {
            (Some(lat), Some(lng), Some(timestamp)) => (lat, lng, timestamp),
            _ => return Resolution::Skipped,
        };

        let mut cache = self.cache.lock().await;

        if let Some(entry) = cache.as_ref().filter(|entry| entry.covers(lat, lng, timestamp)) {
            item.timezone = Some(entry.zone.timezone.clone());
            item.tz_offset = entry.zone.offset;

            return Resolution::Cached;
        }

        match self.lookup.lookup(lat, lng, timestamp).await {
            Ok(zone) => {
                item.timezone = Some(zone.timezone.clone());
                item.tz_offset = zone.offset;

                *cache = Some(CacheEntry {
                    lat,
                    lng,
                    time: timestamp,
                    zone,
                });

                Resolution::Resolved
            }

            Err(e) => {
                warn!("unable to resolve timezone for {}: {:?}", item.file, e);

                item.timezone = None;
                item.tz_offset = 0;

                Resolution::Failed(format!("Unable to determine timezone: {}", e))
            }
        }
    }
}
