//! Bar providers: where a (symbol, timeframe) series comes from.
//!
//! - `SyntheticProvider`: deterministic seeded random walk, always available
//! - `CsvProvider`: a directory of `{SYMBOL}_{tf}.csv` files
//! - `BridgeProvider`: HTTP history endpoint of a trading-terminal bridge
//! - `InMemoryProvider`: pre-built series, for tests and embedding

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use stratlab_core::domain::{Bar, Timeframe};
use stratlab_core::synthetic::{default_start, generate_bars};
use stratlab_core::BarSeries;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no data for {symbol} {timeframe}: {reason}")]
    Unavailable {
        symbol: String,
        timeframe: Timeframe,
        reason: String,
    },

    #[error("rate limited by provider (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed data: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of bar series.
pub trait BarProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Bars for `symbol` at `timeframe` covering the trailing `range_days`
    /// calendar days (all available bars when 0).
    fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range_days: u32,
    ) -> Result<BarSeries, DataError>;
}

fn trailing(series: BarSeries, range_days: u32) -> BarSeries {
    if range_days == 0 {
        series
    } else {
        series.tail_days(range_days as i64)
    }
}

// ─── Synthetic ───────────────────────────────────────────────────────

/// Upper bound on synthetic bars per request.
const MAX_SYNTHETIC_BARS: usize = 200_000;

#[derive(Debug, Clone, Default)]
pub struct SyntheticProvider;

impl SyntheticProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BarProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range_days: u32,
    ) -> Result<BarSeries, DataError> {
        if symbol.trim().is_empty() {
            return Err(DataError::Unavailable {
                symbol: symbol.to_string(),
                timeframe,
                reason: "empty symbol".into(),
            });
        }
        let days = if range_days == 0 { 365 } else { range_days } as usize;
        let count = (days * 1440 / timeframe.minutes() as usize).clamp(1, MAX_SYNTHETIC_BARS);
        let bars = generate_bars(symbol, timeframe, default_start(), count);
        BarSeries::new(symbol, timeframe, bars).map_err(|e| DataError::Parse(e.to_string()))
    }
}

// ─── In-memory ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: HashMap<(String, Timeframe), BarSeries>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: BarSeries) {
        self.series
            .insert((series.symbol().to_string(), series.timeframe()), series);
    }

    pub fn with(mut self, series: BarSeries) -> Self {
        self.insert(series);
        self
    }
}

impl BarProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range_days: u32,
    ) -> Result<BarSeries, DataError> {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .map(|s| trailing(s, range_days))
            .ok_or_else(|| DataError::Unavailable {
                symbol: symbol.to_string(),
                timeframe,
                reason: "not loaded".into(),
            })
    }
}

// ─── CSV directory ───────────────────────────────────────────────────

/// One CSV row: `timestamp,open,high,low,close[,volume]`.
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", symbol.to_ascii_uppercase(), timeframe))
    }

    fn read(path: &Path) -> Result<Vec<Bar>, DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| match e.into_kind() {
                csv::ErrorKind::Io(io) => DataError::Io(io),
                other => DataError::Parse(format!("{other:?}")),
            })?;

        let mut bars = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| DataError::Parse(format!("row {}: {e}", line + 1)))?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                DataError::Parse(format!("row {}: bad timestamp {:?}", line + 1, row.timestamp))
            })?;
            bars.push(Bar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume.unwrap_or(0.0).max(0.0) as u64,
            });
        }
        Ok(bars)
    }
}

impl BarProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range_days: u32,
    ) -> Result<BarSeries, DataError> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            return Err(DataError::Unavailable {
                symbol: symbol.to_string(),
                timeframe,
                reason: format!("{} not found", path.display()),
            });
        }
        let bars = Self::read(&path)?;
        debug!(path = %path.display(), bars = bars.len(), "csv loaded");
        let series = BarSeries::new(symbol, timeframe, bars)
            .map_err(|e| DataError::Parse(format!("{}: {e}", path.display())))?;
        Ok(trailing(series, range_days))
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, RFC 3339, a bare
/// date, or epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

// ─── Bridge (HTTP) ───────────────────────────────────────────────────

pub const BRIDGE_DEFAULT_LIMIT: u32 = 2_000;
pub const BRIDGE_MIN_LIMIT: u32 = 50;
pub const BRIDGE_MAX_LIMIT: u32 = 10_000;

/// Body of `POST {base}/history/series`. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeRequest {
    pub symbol: String,
    pub resolution: String,
    pub from: i64,
    pub to: i64,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeBar {
    pub t: i64,
    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    #[serde(default)]
    pub v: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default)]
    pub bars: Vec<BridgeBar>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct BridgeProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    limit: u32,
}

impl BridgeProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limit: BRIDGE_DEFAULT_LIMIT,
        })
    }

    /// Bars per request, clamped to the bridge's accepted range.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(BRIDGE_MIN_LIMIT, BRIDGE_MAX_LIMIT);
        self
    }

    pub fn request(&self, symbol: &str, timeframe: Timeframe, range_days: u32, now: DateTime<Utc>) -> BridgeRequest {
        let days = if range_days == 0 { 7 } else { range_days };
        let from = now - chrono::Duration::days(days as i64);
        BridgeRequest {
            symbol: symbol.to_string(),
            resolution: timeframe.to_string(),
            from: from.timestamp_millis(),
            to: now.timestamp_millis(),
            limit: self.limit,
        }
    }
}

/// Convert a bridge response into a validated series. Bars with missing
/// prices are dropped.
pub fn parse_bridge_response(
    symbol: &str,
    timeframe: Timeframe,
    response: BridgeResponse,
) -> Result<BarSeries, DataError> {
    if !response.ok {
        return Err(DataError::Unavailable {
            symbol: symbol.to_string(),
            timeframe,
            reason: response.error.unwrap_or_else(|| "bridge reported failure".into()),
        });
    }
    let mut bars: Vec<Bar> = response
        .bars
        .into_iter()
        .filter_map(|b| {
            Some(Bar {
                timestamp: DateTime::from_timestamp_millis(b.t)?.naive_utc(),
                open: b.o?,
                high: b.h?,
                low: b.l?,
                close: b.c?,
                volume: b.v.unwrap_or(0),
            })
        })
        .collect();
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    if bars.is_empty() {
        return Err(DataError::Unavailable {
            symbol: symbol.to_string(),
            timeframe,
            reason: "bridge returned no bars".into(),
        });
    }
    BarSeries::new(symbol, timeframe, bars).map_err(|e| DataError::Parse(e.to_string()))
}

impl BarProvider for BridgeProvider {
    fn name(&self) -> &str {
        "bridge"
    }

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range_days: u32,
    ) -> Result<BarSeries, DataError> {
        let body = self.request(symbol, timeframe, range_days, Utc::now());
        let url = format!("{}/history/series", self.base_url);
        debug!(%url, symbol, %timeframe, limit = body.limit, "bridge request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| DataError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1_000)
                .unwrap_or(60_000);
            return Err(DataError::RateLimited { retry_after_ms });
        }

        // Error bodies carry `{ok: false, error}`, so parse before checking status.
        let status = resp.status();
        let parsed: BridgeResponse = resp
            .json()
            .map_err(|e| DataError::Parse(format!("HTTP {status}: {e}")))?;
        parse_bridge_response(symbol, timeframe, parsed)
    }
}
