// Daemon configuration, populated from CLI flags and environment
// variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

/// Keeps dashboard files on disk synchronized with declarative resource
/// manifests.
#[derive(Debug, Clone, Parser)]
#[command(name = "dashsyncd", version, about)]
pub struct Config {
    /// Directory containing the resource manifests to watch.
    #[arg(long, env = "MANIFEST_DIR")]
    pub manifest_dir: PathBuf,

    /// Root directory the dashboard files are materialized under.
    #[arg(long, env = "WORKING_DIR", default_value = "/app/grafana-dashboards")]
    pub working_dir: PathBuf,

    /// Maximum number of events handled concurrently.
    #[arg(long, env = "MAX_WORKERS", default_value_t = 20)]
    pub max_workers: usize,

    /// Seconds between periodic divergence checks per resource.
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value_t = 86_400)]
    pub reconcile_interval_secs: u64,

    /// Seconds to wait before a resource's first divergence check.
    #[arg(long, env = "RECONCILE_DELAY_SECS", default_value_t = 5)]
    pub reconcile_delay_secs: u64,

    /// Address the metrics and health endpoints listen on.
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8000")]
    pub metrics_addr: SocketAddr,

    /// Log filter, e.g. `info` or `dashsync_daemon=debug`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Fail fast on a configuration the daemon cannot run with. Both
    /// directories must exist up front; the daemon never creates its own
    /// roots.
    pub fn validate(&self) -> Result<()> {
        if !self.manifest_dir.is_dir() {
            bail!("manifest directory does not exist: {}", self.manifest_dir.display());
        }
        if !self.working_dir.is_dir() {
            bail!("working directory does not exist: {}", self.working_dir.display());
        }
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_secs(self.reconcile_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn config(manifest_dir: PathBuf, working_dir: PathBuf) -> Config {
        Config::parse_from([
            "dashsyncd",
            "--manifest-dir",
            manifest_dir.to_str().unwrap(),
            "--working-dir",
            working_dir.to_str().unwrap(),
        ])
    }

    #[test]
    fn defaults_are_applied() {
        let tmp = TempDir::new().unwrap();
        let parsed = config(tmp.path().to_path_buf(), tmp.path().to_path_buf());
        assert_eq!(parsed.max_workers, 20);
        assert_eq!(parsed.reconcile_interval(), Duration::from_secs(86_400));
        assert_eq!(parsed.reconcile_delay(), Duration::from_secs(5));
        assert_eq!(parsed.metrics_addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(parsed.log_level, "info");
    }

    #[test]
    fn validate_accepts_existing_directories() {
        let tmp = TempDir::new().unwrap();
        let parsed = config(tmp.path().to_path_buf(), tmp.path().to_path_buf());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_manifest_dir() {
        let tmp = TempDir::new().unwrap();
        let parsed = config(tmp.path().join("nope"), tmp.path().to_path_buf());
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_working_dir() {
        let tmp = TempDir::new().unwrap();
        let parsed = config(tmp.path().to_path_buf(), tmp.path().join("nope"));
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let tmp = TempDir::new().unwrap();
        let mut parsed = config(tmp.path().to_path_buf(), tmp.path().to_path_buf());
        parsed.max_workers = 0;
        assert!(parsed.validate().is_err());
    }
}
