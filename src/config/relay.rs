// src/config/relay.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_RELAY_CONFIG_PATH: &str = "config/relay.toml";
pub const ENV_RELAY_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";

/// Score thresholds, all on the 0–100 final-score scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thresholds {
    /// Minimum final score for an item to be offered to the gate at all.
    pub publish: u8,
    pub high: u8,
    pub critical: u8,
    /// Published items at/above this also page the admin.
    pub admin_notify: u8,
    /// At/above this the gate is bypassed entirely.
    pub emergency: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            publish: 60,
            high: 75,
            critical: 85,
            admin_notify: 90,
            emergency: 95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Limits {
    /// Informational target surfaced on /status.
    pub daily_min: u32,
    pub daily_max: u32,
    pub min_interval_minutes: u32,
    pub max_posts_per_hour: u32,
    /// Local hours (0–23) during which only emergency items go out.
    #[serde(default)]
    pub quiet_hours: BTreeSet<u32>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            daily_min: 8,
            daily_max: 25,
            min_interval_minutes: 20,
            max_posts_per_hour: 3,
            quiet_hours: (1..=6).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    pub translate_secs: u64,
    pub deliver_secs: u64,
    pub escalate_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            translate_secs: 10,
            deliver_secs: 15,
            escalate_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub database_path: PathBuf,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("state/relay.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind_addr: String,
    /// Capacity of the ingest queue between the API and the consumer.
    pub queue_capacity: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub server: Server,
}

impl RelayConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading relay config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: RelayConfig = toml::from_str(s).context("parsing relay config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $RELAY_CONFIG_PATH (must exist)
    /// 2) config/relay.toml
    /// 3) built-in defaults
    /// `BIND_ADDR` and `RELAY_DB_PATH` override the file.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_RELAY_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("RELAY_CONFIG_PATH points to non-existent path");
            }
            Self::load_from_file(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_RELAY_CONFIG_PATH);
            if p.exists() {
                Self::load_from_file(&p)?
            } else {
                Self::default()
            }
        };

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            if !addr.trim().is_empty() {
                cfg.server.bind_addr = addr.trim().to_string();
            }
        }
        if let Ok(db) = std::env::var("RELAY_DB_PATH") {
            if !db.trim().is_empty() {
                cfg.storage.database_path = PathBuf::from(db.trim());
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, v) in [
            ("publish", t.publish),
            ("high", t.high),
            ("critical", t.critical),
            ("admin_notify", t.admin_notify),
            ("emergency", t.emergency),
        ] {
            if v > 100 {
                bail!("threshold `{name}` must be within 0..=100, got {v}");
            }
        }
        if !(t.high <= t.critical && t.critical <= t.emergency) {
            bail!(
                "thresholds must satisfy high <= critical <= emergency (got {}/{}/{})",
                t.high,
                t.critical,
                t.emergency
            );
        }
        if t.admin_notify < t.publish {
            bail!("admin_notify threshold must not be below the publish threshold");
        }

        let l = &self.limits;
        if let Some(h) = l.quiet_hours.iter().find(|h| **h > 23) {
            bail!("quiet hour {h} is out of range 0..=23");
        }
        if l.daily_min > l.daily_max {
            bail!(
                "daily_min ({}) must not exceed daily_max ({})",
                l.daily_min,
                l.daily_max
            );
        }
        if self.server.queue_capacity == 0 {
            bail!("server.queue_capacity must be > 0");
        }
        Ok(())
    }
}
