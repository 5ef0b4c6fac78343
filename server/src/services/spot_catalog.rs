use std::fmt;
use std::path::PathBuf;

use spotwalk_shared::{Coordinate, Spot};
use tracing::{info, warn};

use crate::error::CatalogLoadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    File(PathBuf),
    Url(String),
}

impl CatalogSource {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Url(raw.to_string())
        } else {
            Self::File(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Zero-based column positions of the three fields a spot row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub label: usize,
    pub longitude: usize,
    pub latitude: usize,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            label: 0,
            longitude: 1,
            latitude: 2,
        }
    }
}

impl ColumnMapping {
    /// Parse an ordering such as `label,longitude,latitude` or `lat,lon,label`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut label = None;
        let mut longitude = None;
        let mut latitude = None;

        for (position, name) in raw.split(',').map(str::trim).enumerate() {
            let slot = match name.to_ascii_lowercase().as_str() {
                "label" | "address" | "name" => &mut label,
                "longitude" | "lon" | "lng" => &mut longitude,
                "latitude" | "lat" => &mut latitude,
                "" | "_" | "skip" => continue,
                other => return Err(format!("unknown column `{other}`")),
            };
            if slot.replace(position).is_some() {
                return Err(format!("column `{name}` listed twice"));
            }
        }

        match (label, longitude, latitude) {
            (Some(label), Some(longitude), Some(latitude)) => Ok(Self {
                label,
                longitude,
                latitude,
            }),
            _ => Err("mapping must name label, longitude and latitude".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    pub has_header: bool,
    pub columns: ColumnMapping,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            columns: ColumnMapping::default(),
        }
    }
}

/// Load the spot list once. Indices are assigned in output order and never
/// change for the lifetime of the process.
pub async fn load(
    source: &CatalogSource,
    options: &CatalogOptions,
    client: &reqwest::Client,
) -> Result<Vec<Spot>, CatalogLoadError> {
    let bytes = match source {
        CatalogSource::File(path) => {
            tokio::fs::read(path)
                .await
                .map_err(|e| CatalogLoadError::Unreachable {
                    location: source.to_string(),
                    reason: e.to_string(),
                })?
        }
        CatalogSource::Url(url) => fetch_catalog(client, url).await.map_err(|reason| {
            CatalogLoadError::Unreachable {
                location: source.to_string(),
                reason,
            }
        })?,
    };

    let spots = parse_catalog(&bytes, options).map_err(|reason| CatalogLoadError::Malformed {
        location: source.to_string(),
        reason,
    })?;
    info!(source = %source, spots = spots.len(), "loaded spot catalog");
    Ok(spots)
}

async fn fetch_catalog(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("upstream status {status}"));
    }
    resp.bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| format!("failed to read response body: {e}"))
}

/// Parse catalog bytes. Bad rows are skipped with a warning; the whole source
/// is rejected only when it is not text or every data row is unusable.
pub fn parse_catalog(bytes: &[u8], options: &CatalogOptions) -> Result<Vec<Spot>, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8 text: {e}"))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(options.has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut spots = Vec::new();
    let mut rows_seen = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                if e.is_io_error() {
                    return Err(format!("read failed: {e}"));
                }
                rows_seen += 1;
                warn!(error = %e, "skipping unreadable spot row");
                continue;
            }
        };
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows_seen += 1;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        match parse_row(&record, &options.columns) {
            Ok((label, coordinate)) => spots.push(Spot {
                index: spots.len(),
                label,
                coordinate,
            }),
            Err(reason) => warn!(line, reason, "skipping spot row"),
        }
    }

    if rows_seen > 0 && spots.is_empty() {
        return Err(format!("none of {rows_seen} rows could be parsed"));
    }
    if rows_seen == 0 {
        warn!("spot source contains no rows");
    }
    Ok(spots)
}

fn parse_row(
    record: &csv::StringRecord,
    columns: &ColumnMapping,
) -> Result<(String, Coordinate), &'static str> {
    let label = record
        .get(columns.label)
        .filter(|label| !label.is_empty())
        .ok_or("missing label")?;
    let longitude = parse_degrees(record.get(columns.longitude), 180.0)
        .ok_or("longitude is not a valid number")?;
    let latitude = parse_degrees(record.get(columns.latitude), 90.0)
        .ok_or("latitude is not a valid number")?;
    Ok((label.to_string(), Coordinate::new(longitude, latitude)))
}

fn parse_degrees(field: Option<&str>, limit: f64) -> Option<f64> {
    field?
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && value.abs() <= limit)
}
