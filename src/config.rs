use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ItemKind, PriceTier};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Tracked item kinds and the stock level to hold each one at.
    pub targets: HashMap<ItemKind, u32>,
    pub thresholds: ThresholdConfig,
    pub limits: LimitConfig,
    pub timing: TimingConfig,
    pub backpressure: BackpressureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            targets: HashMap::new(),
            thresholds: ThresholdConfig::default(),
            limits: LimitConfig::default(),
            timing: TimingConfig::default(),
            backpressure: BackpressureConfig::default(),
        }
    }
}

/// Admission thresholds per price tier, as a percentage of the target
/// stock level. An item is only bought while current+inflight stock is
/// strictly below the threshold for its tier. Tighter (lower) for more
/// expensive tiers; 100 on the cheapest tier means "always buy while
/// under target".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub discounted: u32,
    pub normal: u32,
    pub markup: u32,
    pub premium: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            discounted: 100,
            normal: 70,
            markup: 40,
            premium: 20,
        }
    }
}

impl ThresholdConfig {
    /// Admission threshold for one tier.
    pub fn for_tier(&self, tier: PriceTier) -> u32 {
        match tier {
            PriceTier::Discounted => self.discounted,
            PriceTier::Normal => self.normal,
            PriceTier::Markup => self.markup,
            PriceTier::Premium => self.premium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Hard cap on units in a single transaction.
    pub max_units_per_tx: u32,
    /// Absolute spend cap per transaction in credits. 0 = unlimited.
    pub max_spend_per_tx: u64,
    /// Budget floor: no transactions while available credits are at or
    /// below this reserve.
    pub min_budget_reserve: u64,
    /// Maximum concurrently open transactions per counterparty.
    pub max_open_per_counterparty: usize,
    /// Maximum transactions committed against one counterparty per visit.
    pub max_committed_per_visit: u32,
    /// Retries granted to a new counterparty before "nothing to purchase"
    /// becomes sticky.
    pub max_new_retries: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_units_per_tx: 10,
            max_spend_per_tx: 2000,
            min_budget_reserve: 10_000,
            max_open_per_counterparty: 4,
            max_committed_per_visit: 8,
            max_new_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Grace period after a counterparty first appears before it is
    /// evaluated, giving its offers time to materialize.
    pub warmup_ms: u64,
    /// Cooldown after a failed attempt before the counterparty is
    /// evaluated again. 0 = disabled.
    pub cooldown_ms: u64,
    /// Staleness window for cached offers. 0 = cache only invalidated
    /// explicitly.
    pub offer_staleness_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 10_000,
            cooldown_ms: 0,
            offer_staleness_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn cooldown(&self) -> Option<Duration> {
        (self.cooldown_ms > 0).then(|| Duration::from_millis(self.cooldown_ms))
    }

    pub fn offer_staleness(&self) -> Option<Duration> {
        (self.offer_staleness_ms > 0).then(|| Duration::from_millis(self.offer_staleness_ms))
    }
}

/// Queue-depth thresholds for the backpressure governor. Each state has a
/// rising `enter` bound and a strictly lower falling `exit` bound so the
/// state cannot oscillate on a sample sitting at a boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub slowdown_enter: usize,
    pub slowdown_exit: usize,
    pub pause_enter: usize,
    pub pause_exit: usize,
    pub critical_enter: usize,
    pub critical_exit: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            slowdown_enter: 20,
            slowdown_exit: 14,
            pause_enter: 40,
            pause_exit: 30,
            critical_enter: 60,
            critical_exit: 50,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, falling back to defaults when
    /// no path is given and no default file exists.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p.clone(),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let config = Self::load_from(&path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific YAML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stockr")
            .join("config.yml")
    }

    /// Check value ranges. Out-of-range values are rejected rather than
    /// clamped so a typo in the file is visible.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("discounted", self.thresholds.discounted),
            ("normal", self.thresholds.normal),
            ("markup", self.thresholds.markup),
            ("premium", self.thresholds.premium),
        ] {
            if value > 100 {
                eyre::bail!("{name} threshold must be 0-100, got {value}");
            }
        }
        if self.limits.max_units_per_tx == 0 {
            eyre::bail!("max_units_per_tx must be at least 1");
        }
        if self.limits.max_open_per_counterparty == 0 {
            eyre::bail!("max_open_per_counterparty must be at least 1");
        }
        let bp = &self.backpressure;
        for (name, enter, exit) in [
            ("slowdown", bp.slowdown_enter, bp.slowdown_exit),
            ("pause", bp.pause_enter, bp.pause_exit),
            ("critical", bp.critical_enter, bp.critical_exit),
        ] {
            if exit >= enter {
                eyre::bail!("backpressure {name} exit ({exit}) must be below enter ({enter})");
            }
        }
        if !(bp.slowdown_enter <= bp.pause_enter && bp.pause_enter <= bp.critical_enter) {
            eyre::bail!("backpressure enter thresholds must be ordered slowdown <= pause <= critical");
        }
        Ok(())
    }

    /// Target stock level for one item kind, if tracked.
    pub fn target(&self, kind: ItemKind) -> Option<u32> {
        self.targets.get(&kind).copied()
    }

    /// The tracked item kinds, sorted for deterministic iteration.
    pub fn tracked_kinds(&self) -> Vec<ItemKind> {
        let mut kinds: Vec<ItemKind> = self.targets.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
