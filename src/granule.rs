//! Typed records built from CMR JSON feed entries.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::file_name_from_url;

/// Timestamp format of `time_start` / `time_end`, e.g. `2022-12-01T04:40:06.140Z`.
const CMR_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// How an asset link is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Direct object-storage access (`s3://`), needs provider credentials.
    S3,
    /// Generic web transfer (`https://`).
    Https,
}

/// Keeps links whose file name ends with one of the given extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFilter {
    extensions: Vec<String>,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self::new([".tif", ".tiff"])
    }
}

impl LinkFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| {
                    let e = e.as_ref().trim().to_ascii_lowercase();
                    if e.starts_with('.') { e } else { format!(".{e}") }
                })
                .collect(),
        }
    }

    pub fn classify(&self, href: &str) -> Option<LinkKind> {
        let kind = scheme_kind(href)?;
        let name = file_name_from_url(href)?.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
            .then_some(kind)
    }
}

fn scheme_kind(href: &str) -> Option<LinkKind> {
    let (scheme, _) = href.trim().split_once("://")?;
    match scheme.to_ascii_lowercase().as_str() {
        "s3" => Some(LinkKind::S3),
        "https" | "http" => Some(LinkKind::Https),
        _ => None,
    }
}

/// One granule from a search.
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleRecord {
    pub id: String,
    pub dataset_id: String,
    pub data_center: String,
    pub title: Option<String>,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub updated: Option<String>,
    pub collection_concept_id: String,
    pub producer_id: Option<String>,
    pub online_access_flag: bool,
    pub browse_flag: bool,
    pub day_night_flag: Option<String>,
    /// Granule size as reported by CMR (MB).
    pub size: Option<f64>,
    pub start_orbit: Option<i64>,
    pub stop_orbit: Option<i64>,
    /// `[min_lon, min_lat, max_lon, max_lat]`.
    pub bounds: Option<[f64; 4]>,
    /// Every link href of the entry, in feed order.
    pub links: Vec<String>,
    pub s3_links: Vec<String>,
    pub https_links: Vec<String>,
}

impl GranuleRecord {
    /// Links for the requested access path.
    pub fn links_for(&self, kind: LinkKind) -> &[String] {
        match kind {
            LinkKind::S3 => &self.s3_links,
            LinkKind::Https => &self.https_links,
        }
    }

    /// Builds a record from one feed entry.
    pub fn from_entry(entry: &Value, filter: &LinkFilter) -> Result<Self> {
        let label = entry
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<no id>")
            .to_string();
        let parse_err = |reason: String| Error::CatalogParse {
            entry: label.clone(),
            reason,
        };

        let raw: RawGranule =
            serde_json::from_value(entry.clone()).map_err(|e| parse_err(e.to_string()))?;

        let time_start = parse_time(&raw.time_start).map_err(&parse_err)?;
        let time_end = parse_time(&raw.time_end).map_err(&parse_err)?;

        let (start_orbit, stop_orbit) = match raw.orbit_calculated_spatial_domains.first() {
            Some(d) => (
                opt_int("start_orbit_number", d.start_orbit_number.as_ref()).map_err(&parse_err)?,
                opt_int("stop_orbit_number", d.stop_orbit_number.as_ref()).map_err(&parse_err)?,
            ),
            None => (None, None),
        };

        let bounds = raw
            .boxes
            .first()
            .map(|b| normalize_box(b))
            .transpose()
            .map_err(&parse_err)?;

        let links: Vec<String> = raw.links.into_iter().map(|l| l.href).collect();
        let (s3_links, https_links) = partition_links(&links, filter);

        Ok(GranuleRecord {
            id: raw.id,
            dataset_id: raw.dataset_id,
            data_center: raw.data_center,
            title: raw.title,
            time_start,
            time_end,
            updated: raw.updated,
            collection_concept_id: raw.collection_concept_id,
            producer_id: raw.producer_granule_id,
            online_access_flag: flag("online_access_flag", raw.online_access_flag.as_ref()).map_err(&parse_err)?,
            browse_flag: flag("browse_flag", raw.browse_flag.as_ref()).map_err(&parse_err)?,
            day_night_flag: raw.day_night_flag,
            size: opt_float("granule_size", raw.granule_size.as_ref()).map_err(&parse_err)?,
            start_orbit,
            stop_orbit,
            bounds,
            links,
            s3_links,
            https_links,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawGranule {
    id: String,
    dataset_id: String,
    data_center: String,
    time_start: String,
    time_end: String,
    collection_concept_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    producer_granule_id: Option<String>,
    #[serde(default)]
    day_night_flag: Option<String>,
    #[serde(default)]
    online_access_flag: Option<Value>,
    #[serde(default)]
    browse_flag: Option<Value>,
    #[serde(default)]
    granule_size: Option<Value>,
    #[serde(default)]
    orbit_calculated_spatial_domains: Vec<OrbitDomain>,
    #[serde(default)]
    boxes: Vec<String>,
    #[serde(default)]
    links: Vec<RawLink>,
}

#[derive(Debug, Deserialize)]
struct OrbitDomain {
    #[serde(default)]
    start_orbit_number: Option<Value>,
    #[serde(default)]
    stop_orbit_number: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    href: String,
}

pub(crate) fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(s, CMR_TIME_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| format!("timestamp {s:?} does not match {CMR_TIME_FORMAT}: {e}"))
}

/// `"south west north east"` to `[west, south, east, north]`.
pub(crate) fn normalize_box(s: &str) -> std::result::Result<[f64; 4], String> {
    let values: Vec<f64> = s
        .split_whitespace()
        .map(|v| v.parse::<f64>().map_err(|_| format!("box value {v:?} is not a number")))
        .collect::<std::result::Result<_, _>>()?;
    let [south, west, north, east] = values[..] else {
        return Err(format!("box {s:?} must have 4 values"));
    };
    Ok([west, south, east, north])
}

/// Splits links into `(s3, https)`, dropping anything the filter rejects and
/// repeated hrefs.
pub(crate) fn partition_links(links: &[String], filter: &LinkFilter) -> (Vec<String>, Vec<String>) {
    let mut s3 = Vec::new();
    let mut https = Vec::new();
    for href in links {
        let bucket = match filter.classify(href) {
            Some(LinkKind::S3) => &mut s3,
            Some(LinkKind::Https) => &mut https,
            None => continue,
        };
        if !bucket.contains(href) {
            bucket.push(href.clone());
        }
    }
    (s3, https)
}

fn flag(name: &str, v: Option<&Value>) -> std::result::Result<bool, String> {
    match v {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(format!("{name} is not a boolean: {other}")),
    }
}

fn opt_int(name: &str, v: Option<&Value>) -> std::result::Result<Option<i64>, String> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("{name} is not an integer: {n}")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| format!("{name} is not an integer: {s:?}")),
        Some(other) => Err(format!("{name} is not an integer: {other}")),
    }
}

fn opt_float(name: &str, v: Option<&Value>) -> std::result::Result<Option<f64>, String> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("{name} is not a number: {s:?}")),
        Some(other) => Err(format!("{name} is not a number: {other}")),
    }
}

/// A collection from `collections.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionSummary {
    #[serde(rename = "id")]
    pub concept_id: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default, rename = "version_id")]
    pub version: Option<String>,
    #[serde(default)]
    pub archive_center: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
}
