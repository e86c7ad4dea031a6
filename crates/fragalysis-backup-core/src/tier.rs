//! Backup tiers and their rotation policy.
//!
//! Tiers form a fixed promotion chain:
//!
//! ```text
//! hourly → daily → weekly → monthly
//! ```
//!
//! Only the hourly tier produces new artifacts. Every other tier copies the
//! oldest artifact of its predecessor once the predecessor holds enough of
//! them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One rotation level in the backup hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    /// All tiers in promotion-chain order.
    pub const ALL: [Tier; 4] = [Tier::Hourly, Tier::Daily, Tier::Weekly, Tier::Monthly];

    /// Directory name (and configuration value) for this tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// The tier this one promotes from, `None` for hourly.
    #[must_use]
    pub const fn prior(self) -> Option<Tier> {
        match self {
            Self::Hourly => None,
            Self::Daily => Some(Self::Hourly),
            Self::Weekly => Some(Self::Daily),
            Self::Monthly => Some(Self::Weekly),
        }
    }

    /// Whether runs of this tier produce new artifacts.
    #[must_use]
    pub const fn is_producer(self) -> bool {
        matches!(self, Self::Hourly)
    }

    /// Position in the promotion chain (hourly = 0).
    #[must_use]
    pub const fn rank(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ConfigError::UnknownTier(s.to_string())),
        }
    }
}

/// When a tier copies from its predecessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionTrigger {
    /// Promote only when the prior tier holds exactly the required count.
    ///
    /// Fires once per accumulation cycle and relies on the prior tier's own
    /// retention to keep its population at the threshold. A prior tier that
    /// is over-full never promotes until it is pruned back.
    #[default]
    Exact,
    /// Promote whenever the prior tier holds at least the required count.
    AtLeast,
}

impl PromotionTrigger {
    /// Whether a prior tier with `count` artifacts triggers a promotion.
    #[must_use]
    pub const fn fires(self, count: usize, required: usize) -> bool {
        match self {
            Self::Exact => count == required,
            Self::AtLeast => count >= required,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::AtLeast => "at_least",
        }
    }
}

impl fmt::Display for PromotionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionTrigger {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(Self::Exact),
            "at_least" | "atleast" => Ok(Self::AtLeast),
            _ => Err(ConfigError::ValidationError(format!(
                "unknown promotion trigger '{s}' (expected exact or at_least)"
            ))),
        }
    }
}

/// Validated rotation parameters for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierPolicy {
    pub tier: Tier,
    /// Maximum artifacts kept in this tier's directory.
    pub retention_count: usize,
    /// Tier promoted from; always `tier.prior()`.
    pub prior_tier: Option<Tier>,
    /// Prior-tier population that triggers a promotion (unused for hourly).
    pub prior_required_count: usize,
    pub trigger: PromotionTrigger,
}

impl TierPolicy {
    /// Build a policy, rejecting anything that breaks the chain invariants.
    pub fn new(
        tier: Tier,
        retention_count: usize,
        prior_tier: Option<Tier>,
        prior_required_count: usize,
        trigger: PromotionTrigger,
    ) -> Result<Self, ConfigError> {
        let policy = Self {
            tier,
            retention_count,
            prior_tier,
            prior_required_count,
            trigger,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Default policy for a tier: 24 hourly, 7 daily, 4 weekly, 12 monthly.
    #[must_use]
    pub fn default_for(tier: Tier) -> Self {
        let (retention_count, prior_required_count) = match tier {
            Tier::Hourly => (24, 0),
            Tier::Daily => (7, 24),
            Tier::Weekly => (4, 7),
            Tier::Monthly => (12, 4),
        };
        Self {
            tier,
            retention_count,
            prior_tier: tier.prior(),
            prior_required_count,
            trigger: PromotionTrigger::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_count == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} retention count must be at least 1",
                self.tier
            )));
        }
        if self.prior_tier != self.tier.prior() {
            let got = self.prior_tier.map_or("none", Tier::as_str);
            let expected = self.tier.prior().map_or("none", Tier::as_str);
            return Err(ConfigError::ValidationError(format!(
                "{} backups must promote from {expected}, not {got}",
                self.tier
            )));
        }
        if !self.tier.is_producer() && self.prior_required_count == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} prior count must be at least 1",
                self.tier
            )));
        }
        Ok(())
    }
}
