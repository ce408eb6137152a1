use chrono::{DateTime, Utc};
use serde_json::Value;

/// Thresholds for the admissibility heuristics. Deliberately cheap and
/// approximate; the gate exists to deter drive-by spawning of unknown or
/// abandoned packages, not to rank them.
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// npm: minimum downloads over the trailing month.
    pub min_npm_monthly_downloads: u64,
    /// PyPI: newest release must be at most this old.
    pub max_release_age_days: i64,
    /// PyPI: minimum summary/description length.
    pub min_description_len: usize,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_npm_monthly_downloads: 100,
            max_release_age_days: 365,
            min_description_len: 10,
        }
    }
}

pub(crate) fn check_npm(cfg: &QualityGateConfig, downloads: Option<u64>) -> Result<(), String> {
    match downloads {
        Some(n) if n >= cfg.min_npm_monthly_downloads => Ok(()),
        Some(n) => Err(format!(
            "only {n} downloads last month (minimum {})",
            cfg.min_npm_monthly_downloads
        )),
        None => Err("download statistics unavailable".to_string()),
    }
}

pub(crate) fn check_pypi(cfg: &QualityGateConfig, metadata: &Value) -> Result<(), String> {
    let description_len = metadata
        .get("info")
        .and_then(|info| {
            info.get("summary")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| info.get("description").and_then(Value::as_str))
        })
        .map(|s| s.chars().count())
        .unwrap_or(0);
    if description_len <= cfg.min_description_len {
        return Err("description too short".to_string());
    }

    let newest = newest_release(metadata);
    match newest {
        Some(ts) if (Utc::now() - ts).num_days() <= cfg.max_release_age_days => Ok(()),
        Some(_) => Err(format!(
            "no release in the last {} days",
            cfg.max_release_age_days
        )),
        None => Err("no release records".to_string()),
    }
}

fn newest_release(metadata: &Value) -> Option<DateTime<Utc>> {
    let releases = metadata.get("releases")?.as_object()?;
    releases
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|file| file.get("upload_time_iso_8601"))
        .filter_map(Value::as_str)
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .max()
}
