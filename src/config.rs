use crate::param_utils::{get_flag_param, get_param, get_usize_param_min};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_RISK_KEYWORDS: [&str; 2] = ["疑義", "重要事象"];

pub const RULE_PARAMETER_KEYS: [&str; 11] = [
    "minPrice",
    "max1mBreakoutRatio",
    "maxLongTermDropPct",
    "maxLongTermRiseRatio",
    "windowBreakoutMin",
    "windowBreakoutMax",
    "maxDaysSinceHigh",
    "pushPct",
    "excludeIpo",
    "excludeRiskNotes",
    "nearTargetTolerancePct",
];

pub const BACKTEST_PARAMETER_KEYS: [&str; 10] = [
    "windowBreakoutMin",
    "windowBreakoutMax",
    "pushPct",
    "buyLimitDays",
    "stopIntradayPct",
    "takeProfitPct",
    "stopClosePct",
    "sellLimitDays",
    "lotSize",
    "forceCloseAtEnd",
];

/// Admission thresholds for the screener ("iron rules").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub min_price: f64,
    pub max_1m_breakout_ratio: f64,
    /// Lower bound on a (usually negative) percentage.
    pub max_long_term_drop_pct: f64,
    pub max_long_term_rise_ratio: f64,
    pub window_breakout_min: f64,
    pub window_breakout_max: f64,
    pub max_days_since_high: usize,
    /// Retracement of the 14-bar range, in percent.
    pub push_pct: f64,
    pub exclude_ipo: bool,
    pub exclude_risk_notes: bool,
    pub risk_keywords: Vec<String>,
    /// Allowed sectors; empty admits every sector.
    pub sector_filter: Vec<String>,
    pub near_target_tolerance_pct: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            min_price: 200.0,
            max_1m_breakout_ratio: 2.0,
            max_long_term_drop_pct: -30.0,
            max_long_term_rise_ratio: 3.0,
            window_breakout_min: 1.3,
            window_breakout_max: 2.0,
            max_days_since_high: 4,
            push_pct: 45.0,
            exclude_ipo: true,
            exclude_risk_notes: true,
            risk_keywords: DEFAULT_RISK_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            sector_filter: Vec::new(),
            near_target_tolerance_pct: 5.0,
        }
    }
}

impl RuleConfig {
    /// Builds a validated config from defaults overridden by a flat parameter map.
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            min_price: get_param(parameters, "minPrice", defaults.min_price),
            max_1m_breakout_ratio: get_param(
                parameters,
                "max1mBreakoutRatio",
                defaults.max_1m_breakout_ratio,
            ),
            max_long_term_drop_pct: get_param(
                parameters,
                "maxLongTermDropPct",
                defaults.max_long_term_drop_pct,
            ),
            max_long_term_rise_ratio: get_param(
                parameters,
                "maxLongTermRiseRatio",
                defaults.max_long_term_rise_ratio,
            ),
            window_breakout_min: get_param(
                parameters,
                "windowBreakoutMin",
                defaults.window_breakout_min,
            ),
            window_breakout_max: get_param(
                parameters,
                "windowBreakoutMax",
                defaults.window_breakout_max,
            ),
            max_days_since_high: get_usize_param_min(
                parameters,
                "maxDaysSinceHigh",
                defaults.max_days_since_high,
                0,
            ),
            push_pct: get_param(parameters, "pushPct", defaults.push_pct),
            exclude_ipo: get_flag_param(parameters, "excludeIpo", defaults.exclude_ipo),
            exclude_risk_notes: get_flag_param(
                parameters,
                "excludeRiskNotes",
                defaults.exclude_risk_notes,
            ),
            risk_keywords: defaults.risk_keywords,
            sector_filter: defaults.sector_filter,
            near_target_tolerance_pct: get_param(
                parameters,
                "nearTargetTolerancePct",
                defaults.near_target_tolerance_pct,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_sector_filter(mut self, sectors: Vec<String>) -> Self {
        self.sector_filter = sectors
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn with_risk_keywords(mut self, keywords: Vec<String>) -> Self {
        self.risk_keywords = keywords
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_finite("minPrice", self.min_price)?;
        require_finite("max1mBreakoutRatio", self.max_1m_breakout_ratio)?;
        require_finite("maxLongTermDropPct", self.max_long_term_drop_pct)?;
        require_finite("maxLongTermRiseRatio", self.max_long_term_rise_ratio)?;
        require_finite("nearTargetTolerancePct", self.near_target_tolerance_pct)?;
        if self.min_price < 0.0 {
            return Err(anyhow!(
                "minPrice must be >= 0 (value: {})",
                self.min_price
            ));
        }
        if self.max_long_term_drop_pct > 0.0 {
            return Err(anyhow!(
                "maxLongTermDropPct is a lower bound on a drawdown and must be <= 0 (value: {})",
                self.max_long_term_drop_pct
            ));
        }
        if self.near_target_tolerance_pct < 0.0 {
            return Err(anyhow!(
                "nearTargetTolerancePct must be >= 0 (value: {})",
                self.near_target_tolerance_pct
            ));
        }
        validate_breakout_band(self.window_breakout_min, self.window_breakout_max)?;
        validate_push_pct(self.push_pct)?;
        Ok(())
    }
}

/// What happens to a position still open when the series ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPositionPolicy {
    #[default]
    Discard,
    ForceClose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub window_breakout_min: f64,
    pub window_breakout_max: f64,
    pub push_pct: f64,
    pub buy_limit_days: usize,
    pub stop_intraday_pct: f64,
    pub take_profit_pct: f64,
    pub stop_close_pct: f64,
    pub sell_limit_days: usize,
    pub lot_size: f64,
    pub open_position_policy: OpenPositionPolicy,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            window_breakout_min: 1.3,
            window_breakout_max: 2.0,
            push_pct: 45.0,
            buy_limit_days: 4,
            stop_intraday_pct: 10.0,
            take_profit_pct: 8.0,
            stop_close_pct: 8.0,
            sell_limit_days: 5,
            lot_size: 100.0,
            open_position_policy: OpenPositionPolicy::Discard,
        }
    }
}

impl BacktestConfig {
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Result<Self> {
        let defaults = Self::default();
        let force_close = get_flag_param(parameters, "forceCloseAtEnd", false);
        let config = Self {
            window_breakout_min: get_param(
                parameters,
                "windowBreakoutMin",
                defaults.window_breakout_min,
            ),
            window_breakout_max: get_param(
                parameters,
                "windowBreakoutMax",
                defaults.window_breakout_max,
            ),
            push_pct: get_param(parameters, "pushPct", defaults.push_pct),
            buy_limit_days: get_usize_param_min(
                parameters,
                "buyLimitDays",
                defaults.buy_limit_days,
                0,
            ),
            stop_intraday_pct: get_param(
                parameters,
                "stopIntradayPct",
                defaults.stop_intraday_pct,
            ),
            take_profit_pct: get_param(parameters, "takeProfitPct", defaults.take_profit_pct),
            stop_close_pct: get_param(parameters, "stopClosePct", defaults.stop_close_pct),
            sell_limit_days: get_usize_param_min(
                parameters,
                "sellLimitDays",
                defaults.sell_limit_days,
                1,
            ),
            lot_size: get_param(parameters, "lotSize", defaults.lot_size),
            open_position_policy: if force_close {
                OpenPositionPolicy::ForceClose
            } else {
                OpenPositionPolicy::Discard
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_breakout_band(self.window_breakout_min, self.window_breakout_max)?;
        validate_push_pct(self.push_pct)?;
        require_percent_below_100("stopIntradayPct", self.stop_intraday_pct)?;
        require_percent_below_100("stopClosePct", self.stop_close_pct)?;
        require_finite("takeProfitPct", self.take_profit_pct)?;
        if self.take_profit_pct <= 0.0 {
            return Err(anyhow!(
                "takeProfitPct must be > 0 (value: {})",
                self.take_profit_pct
            ));
        }
        if self.sell_limit_days == 0 {
            return Err(anyhow!("sellLimitDays must be >= 1"));
        }
        require_finite("lotSize", self.lot_size)?;
        if self.lot_size <= 0.0 {
            return Err(anyhow!("lotSize must be > 0 (value: {})", self.lot_size));
        }
        Ok(())
    }
}

fn require_finite(key: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(anyhow!("{} must be finite (value: {})", key, value))
    }
}

fn require_percent_below_100(key: &str, value: f64) -> Result<()> {
    require_finite(key, value)?;
    if value <= 0.0 || value >= 100.0 {
        return Err(anyhow!(
            "{} must be within (0, 100) (value: {})",
            key,
            value
        ));
    }
    Ok(())
}

fn validate_push_pct(push_pct: f64) -> Result<()> {
    require_finite("pushPct", push_pct)?;
    if !(0.0..=100.0).contains(&push_pct) {
        return Err(anyhow!(
            "pushPct must be within [0, 100] (value: {})",
            push_pct
        ));
    }
    Ok(())
}

fn validate_breakout_band(min: f64, max: f64) -> Result<()> {
    require_finite("windowBreakoutMin", min)?;
    require_finite("windowBreakoutMax", max)?;
    if min < 1.0 {
        return Err(anyhow!(
            "windowBreakoutMin must be >= 1 (value: {})",
            min
        ));
    }
    if max < min {
        return Err(anyhow!(
            "windowBreakoutMax ({}) must be >= windowBreakoutMin ({})",
            max,
            min
        ));
    }
    Ok(())
}
