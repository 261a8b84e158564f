// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{ConfigFile, PoolSettings, RawConfigFile};
use crate::errors::{FleetError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FleetError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let pool = PoolSettings {
            workers: raw.pool.workers.filter(|n| *n > 0),
            job_timeout: raw
                .pool
                .job_timeout
                .as_deref()
                .map(parse_timeout)
                .transpose()
                .map_err(FleetError::ConfigError)?,
            reap_strays: raw.pool.reap_strays,
            worker_exe: raw.pool.worker_exe,
        };
        Ok(ConfigFile::new_unchecked(pool, raw.provider))
    }
}

/// Run every check against a raw config. Fails with the first problem.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_providers(cfg)?;
    validate_pool(cfg)?;
    validate_providers(cfg)?;
    Ok(())
}

fn ensure_has_providers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.provider.is_empty() {
        return Err(FleetError::ConfigError(
            "config must contain at least one [[provider]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pool(cfg: &RawConfigFile) -> Result<()> {
    if let Some(ref s) = cfg.pool.job_timeout {
        parse_timeout(s).map_err(|e| FleetError::ConfigError(format!("[pool].job_timeout: {e}")))?;
    }
    Ok(())
}

fn validate_providers(cfg: &RawConfigFile) -> Result<()> {
    let mut provider_names = HashSet::new();

    for provider in cfg.provider.iter() {
        if provider.name.trim().is_empty() {
            return Err(FleetError::ConfigError(
                "every [[provider]] needs a non-empty name".to_string(),
            ));
        }
        if !provider_names.insert(provider.name.as_str()) {
            return Err(FleetError::ConfigError(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if provider.job.is_empty() && provider.tree.is_none() {
            return Err(FleetError::ConfigError(format!(
                "provider '{}' has neither a `tree` nor any [[provider.job]]",
                provider.name
            )));
        }

        let mut job_names = HashSet::new();
        for job in provider.job.iter() {
            if job.name.trim().is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "provider '{}' has a job without a name",
                    provider.name
                )));
            }
            if !job_names.insert(job.name.as_str()) {
                return Err(FleetError::ConfigError(format!(
                    "provider '{}' has duplicate job name '{}'",
                    provider.name, job.name
                )));
            }
            if job.steps == 0 {
                return Err(FleetError::ConfigError(format!(
                    "job '{}' in provider '{}': steps must be >= 1 (got 0)",
                    job.name, provider.name
                )));
            }
        }
    }
    Ok(())
}

/// Parse durations like `"500ms"`, `"30s"`, `"10m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scaled_secs(value, 60),
        "h" => scaled_secs(value, 60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn scaled_secs(value: u64, factor: u64) -> std::result::Result<Duration, String> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{value}' is too large"))
}

/// [`parse_duration`] for per-job timeouts, which must be non-zero.
pub fn parse_timeout(s: &str) -> std::result::Result<Duration, String> {
    let dur = parse_duration(s)?;
    if dur.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(dur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{JobConfig, ProviderConfig};

    fn provider(name: &str, jobs: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            tree: None,
            job: jobs
                .iter()
                .map(|j| JobConfig {
                    name: j.to_string(),
                    ..JobConfig::default()
                })
                .collect(),
        }
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn huge_durations_are_errors_not_overflows() {
        let minutes = format!("{}m", u64::MAX / 10);
        assert!(parse_duration(&minutes).unwrap_err().contains("too large"));
        let hours = format!("{}h", u64::MAX);
        assert!(parse_duration(&hours).is_err());
        assert_eq!(parse_duration(&format!("{}s", u64::MAX)).unwrap(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn timeout_must_be_non_zero() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("0ms").is_err());
        assert_eq!(parse_timeout("1ms").unwrap(), Duration::from_millis(1));
    }

    #[test]
    fn zero_workers_means_auto() {
        let mut raw = RawConfigFile::default();
        raw.pool.workers = Some(0);
        raw.provider.push(provider("p", &["a"]));
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(cfg.pool.workers, None);
        assert!(cfg.pool.reap_strays);
    }

    #[test]
    fn rejects_duplicates_and_empty_providers() {
        let mut raw = RawConfigFile::default();
        raw.provider.push(provider("p", &["a", "a"]));
        assert!(matches!(validate_config(&raw), Err(FleetError::ConfigError(_))));

        let mut raw = RawConfigFile::default();
        raw.provider.push(provider("p", &["a"]));
        raw.provider.push(provider("p", &["b"]));
        assert!(validate_config(&raw).is_err());

        let mut raw = RawConfigFile::default();
        raw.provider.push(provider("empty", &[]));
        assert!(validate_config(&raw).is_err());

        assert!(validate_config(&RawConfigFile::default()).is_err());
    }

    #[test]
    fn rejects_zero_steps_and_bad_timeout() {
        let mut raw = RawConfigFile::default();
        let mut p = provider("p", &["a"]);
        p.job[0].steps = 0;
        raw.provider.push(p);
        assert!(validate_config(&raw).is_err());

        let mut raw = RawConfigFile::default();
        raw.provider.push(provider("p", &["a"]));
        raw.pool.job_timeout = Some("soon".into());
        assert!(validate_config(&raw).is_err());
        raw.pool.job_timeout = Some("0s".into());
        assert!(validate_config(&raw).is_err());
        raw.pool.job_timeout = Some("5s".into());
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(cfg.pool.job_timeout, Some(Duration::from_secs(5)));
    }
}
