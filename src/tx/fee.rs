//! Fee tier computation over raw fee-market data.

use serde::{Deserialize, Serialize};

use crate::network::FeeData;

const GWEI: u128 = 1_000_000_000;

/// Fallback legacy gas prices in gwei, used when the market query fails.
pub const FALLBACK_GWEI: [u128; 3] = [40, 50, 60];

/// Tier scaling in percent of the market base.
const TIER_PCT: [u128; 3] = [80, 100, 120];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSpeed {
    Slow,
    Normal,
    Fast,
}

/// Fee parameters for one tier. Either a legacy gas price or a
/// max-fee/priority-fee pair, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeeParams {
    Legacy {
        gas_price: u128,
    },
    Priority {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub slow: FeeParams,
    pub normal: FeeParams,
    pub fast: FeeParams,
    /// True when the fallback table was substituted for live data.
    pub fallback: bool,
}

impl FeeEstimate {
    pub fn tier(&self, speed: FeeSpeed) -> &FeeParams {
        match speed {
            FeeSpeed::Slow => &self.slow,
            FeeSpeed::Normal => &self.normal,
            FeeSpeed::Fast => &self.fast,
        }
    }
}

/// Scale the fee market into slow/normal/fast at 80/100/120% of base.
/// Priority markets scale both halves of the pair; legacy markets scale
/// the single gas price.
pub fn tiers_from_market(data: &FeeData) -> Option<FeeEstimate> {
    if data.has_priority_market() {
        let max_fee = data.max_fee_per_gas?;
        let priority = data.max_priority_fee_per_gas?;
        let tier = |pct: u128| FeeParams::Priority {
            max_fee_per_gas: max_fee * pct / 100,
            max_priority_fee_per_gas: priority * pct / 100,
        };
        Some(FeeEstimate {
            slow: tier(TIER_PCT[0]),
            normal: tier(TIER_PCT[1]),
            fast: tier(TIER_PCT[2]),
            fallback: false,
        })
    } else {
        let base = data.gas_price?;
        let tier = |pct: u128| FeeParams::Legacy {
            gas_price: base * pct / 100,
        };
        Some(FeeEstimate {
            slow: tier(TIER_PCT[0]),
            normal: tier(TIER_PCT[1]),
            fast: tier(TIER_PCT[2]),
            fallback: false,
        })
    }
}

/// The fixed 40/50/60 gwei legacy table.
pub fn fallback_tiers() -> FeeEstimate {
    let tier = |gwei: u128| FeeParams::Legacy {
        gas_price: gwei * GWEI,
    };
    FeeEstimate {
        slow: tier(FALLBACK_GWEI[0]),
        normal: tier(FALLBACK_GWEI[1]),
        fast: tier(FALLBACK_GWEI[2]),
        fallback: true,
    }
}
