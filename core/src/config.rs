//! Static campaign tunables. Loaded once at campaign start and treated as
//! immutable for the campaign's lifetime.

use crate::{
    error::{SimError, SimResult},
    types::{Faction, Tick, ZoneId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneConfig {
    pub zone_id: ZoneId,
    pub name: String,
    /// Income granted to the owner each economy tick.
    pub value: u64,
    #[serde(default = "default_owner")]
    pub initial_owner: Faction,
}

fn default_owner() -> Faction {
    Faction::Neutral
}

/// Shape of the capture-rate curve as a function of net presence advantage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureCurveConfig {
    /// Any majority captures at `capture_rate`, regardless of headcount.
    Flat,
    /// `capture_rate` per unit of net advantage.
    Linear,
    /// Saturating: `capture_rate * max_multiplier * n / (n + half_saturation)`.
    DiminishingReturns {
        half_saturation: f64,
        max_multiplier: f64,
    },
}

/// How undercover agents in a zone affect the contest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UndercoverPolicy {
    /// Agents are invisible to the contest.
    Ignore,
    /// Agents hold their faction's contest progress: no decay while present.
    SuppressDecay,
    /// Agents count toward their faction's presence.
    Contribute,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    pub curve: CaptureCurveConfig,
    /// Progress per simulated second at unit strength.
    pub capture_rate: f64,
    /// Progress lost per simulated second once the grace interval lapses.
    pub decay_rate: f64,
    /// Seconds an attacker may be absent or outnumbered before decay starts.
    pub grace_secs: f64,
    pub undercover: UndercoverPolicy,
    /// Zone count at or above which zones are evaluated on the rayon pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

fn default_parallel_threshold() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EconomyConfig {
    /// Economy runs every `tick_interval` campaign ticks.
    pub tick_interval: Tick,
    pub starting_balance: u64,
    #[serde(default = "default_income_multiplier")]
    pub income_multiplier: u64,
    /// Cost per garrisoned unit per economy tick.
    pub upkeep_per_unit: u64,
}

fn default_income_multiplier() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VictoryConfig {
    /// Fraction of all zones a faction must own to win, in (0, 1].
    pub zone_fraction: f64,
    /// Consecutive ticks at zero balance after which a faction collapses.
    /// Zero disables economic victory.
    pub bankruptcy_ticks: u32,
}

impl VictoryConfig {
    /// Also applied to the rules carried inside a save.
    pub fn validate(&self) -> SimResult<()> {
        let fraction = self.zone_fraction;
        if !(fraction.is_finite() && fraction > 0.0 && fraction <= 1.0) {
            return Err(invalid(format!(
                "victory.zone_fraction must be in (0, 1], got {fraction}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    pub save_dir: String,
    /// Zero disables timed autosaves.
    pub autosave_interval_ticks: Tick,
    pub autosave_retention: usize,
    /// Autosave on ownership changes and victory.
    pub autosave_on_events: bool,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShopItem {
    pub item_id: String,
    pub label: String,
    pub price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignConfig {
    pub zones: Vec<ZoneConfig>,
    pub capture: CaptureConfig,
    pub economy: EconomyConfig,
    pub victory: VictoryConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub shop: Vec<ShopItem>,
    /// Extra presence a player's capture request adds for one tick.
    #[serde(default = "default_rally_bonus")]
    pub rally_bonus: u32,
}

fn default_rally_bonus() -> u32 {
    1
}

impl CampaignConfig {
    /// Load from `<data_dir>/campaign.json`.
    /// In tests, use CampaignConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/campaign.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: CampaignConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid {path}: {e}"))?;
        Ok(config)
    }

    /// Small deterministic campaign: five neutral zones, flat capture at
    /// 0.1 progress per second, economy every 10 ticks, 4/5 zones to win.
    pub fn default_test() -> Self {
        let zones = (1..=5)
            .map(|i| ZoneConfig {
                zone_id: format!("zone-{i}"),
                name: format!("Sector {i}"),
                value: 10,
                initial_owner: Faction::Neutral,
            })
            .collect();
        Self {
            zones,
            capture: CaptureConfig {
                curve: CaptureCurveConfig::Flat,
                capture_rate: 0.1,
                decay_rate: 0.05,
                grace_secs: 3.0,
                undercover: UndercoverPolicy::SuppressDecay,
                parallel_threshold: default_parallel_threshold(),
            },
            economy: EconomyConfig {
                tick_interval: 10,
                starting_balance: 100,
                income_multiplier: 1,
                upkeep_per_unit: 2,
            },
            victory: VictoryConfig {
                zone_fraction: 0.8,
                bankruptcy_ticks: 0,
            },
            persistence: PersistenceConfig {
                save_dir: "./saves".to_string(),
                autosave_interval_ticks: 0,
                autosave_retention: 3,
                autosave_on_events: false,
                max_retries: 2,
                backoff_ms: 10,
                timeout_ms: 5_000,
            },
            shop: vec![
                ShopItem { item_id: "rifle".into(),  label: "Rifle".into(),        price: 40 },
                ShopItem { item_id: "medkit".into(), label: "Field medkit".into(), price: 15 },
                ShopItem { item_id: "disguise".into(), label: "Disguise kit".into(), price: 60 },
            ],
            rally_bonus: 1,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.zones.is_empty() {
            return Err(invalid("campaign has no zones"));
        }
        let mut seen = HashSet::new();
        for zone in &self.zones {
            if zone.zone_id.is_empty() {
                return Err(invalid("zone with empty id"));
            }
            if !seen.insert(zone.zone_id.as_str()) {
                return Err(invalid(format!("duplicate zone id '{}'", zone.zone_id)));
            }
        }

        let c = &self.capture;
        if !(c.capture_rate.is_finite() && c.capture_rate > 0.0) {
            return Err(invalid("capture.capture_rate must be a positive number"));
        }
        if !(c.decay_rate.is_finite() && c.decay_rate >= 0.0) {
            return Err(invalid("capture.decay_rate must be non-negative"));
        }
        if !(c.grace_secs.is_finite() && c.grace_secs >= 0.0) {
            return Err(invalid("capture.grace_secs must be non-negative"));
        }
        if let CaptureCurveConfig::DiminishingReturns { half_saturation, max_multiplier } = c.curve {
            if !(half_saturation > 0.0 && max_multiplier > 0.0) {
                return Err(invalid("diminishing_returns parameters must be positive"));
            }
        }

        if self.economy.tick_interval == 0 {
            return Err(invalid("economy.tick_interval must be at least 1"));
        }
        self.victory.validate()?;
        if self.persistence.autosave_retention == 0 {
            return Err(invalid("persistence.autosave_retention must be at least 1"));
        }

        let mut items = HashSet::new();
        for item in &self.shop {
            if item.price == 0 {
                return Err(invalid(format!("shop item '{}' has no price", item.item_id)));
            }
            if !items.insert(item.item_id.as_str()) {
                return Err(invalid(format!("duplicate shop item '{}'", item.item_id)));
            }
        }
        Ok(())
    }

    pub fn shop_item(&self, item_id: &str) -> Option<&ShopItem> {
        self.shop.iter().find(|i| i.item_id == item_id)
    }
}

fn invalid(msg: impl Into<String>) -> SimError {
    SimError::Validation(msg.into())
}
