use crate::models::{ExitReason, Trade};
use serde::{Serialize, Serializer};
use statrs::statistics::Statistics;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Gross profit over gross loss. Infinity is a variant rather than a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfitFactor {
    NoTrades,
    Unbounded,
    Value(f64),
}

impl ProfitFactor {
    pub fn from_gross(winning_trades: usize, gross_profit: f64, gross_loss: f64) -> Self {
        if gross_loss < 0.0 {
            ProfitFactor::Value(gross_profit / gross_loss.abs())
        } else if winning_trades > 0 {
            ProfitFactor::Unbounded
        } else {
            ProfitFactor::Value(0.0)
        }
    }
}

impl Serialize for ProfitFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProfitFactor::NoTrades => serializer.serialize_none(),
            ProfitFactor::Unbounded => serializer.serialize_str("unbounded"),
            ProfitFactor::Value(value) => serializer.serialize_f64(*value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub mean_return: f64,
    pub median_return: f64,
    pub return_std_dev: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub net_profit: f64,
    pub expectancy: f64,
    pub profit_factor: ProfitFactor,
    pub avg_holding_days: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub exits_by_reason: BTreeMap<ExitReason, usize>,
}

impl LedgerStats {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let total_trades = trades.len();
        let mut returns = Vec::with_capacity(total_trades);
        let mut notionals = Vec::with_capacity(total_trades);
        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut exits_by_reason = BTreeMap::new();

        for trade in trades {
            returns.push(trade.pct_return);
            notionals.push(trade.notional_return);
            if trade.notional_return > 0.0 {
                winning_trades += 1;
                gross_profit += trade.notional_return;
            } else if trade.notional_return < 0.0 {
                losing_trades += 1;
                gross_loss += trade.notional_return;
            }
            *exits_by_reason.entry(trade.exit_reason).or_insert(0) += 1;
        }

        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if total_trades == 0 {
            ProfitFactor::NoTrades
        } else {
            ProfitFactor::from_gross(winning_trades, gross_profit, gross_loss)
        };
        let holding_days: Vec<f64> = trades.iter().map(|t| t.holding_days as f64).collect();

        Self {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            mean_return: average(&returns),
            median_return: median(&returns),
            return_std_dev: std_dev(&returns),
            gross_profit,
            gross_loss,
            net_profit: gross_profit + gross_loss,
            expectancy: average(&notionals),
            profit_factor,
            avg_holding_days: average(&holding_days),
            best_trade: returns.iter().copied().reduce(f64::max).unwrap_or(0.0),
            worst_trade: returns.iter().copied().reduce(f64::min).unwrap_or(0.0),
            exits_by_reason,
        }
    }
}

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

fn average(values: &[f64]) -> f64 {
    let filtered = finite(values);
    if filtered.is_empty() {
        0.0
    } else {
        filtered.mean()
    }
}

fn median(values: &[f64]) -> f64 {
    let mut filtered = finite(values);
    if filtered.is_empty() {
        return 0.0;
    }

    filtered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = filtered.len() / 2;

    if filtered.len() % 2 == 0 {
        (filtered[mid - 1] + filtered[mid]) / 2.0
    } else {
        filtered[mid]
    }
}

/// Sample standard deviation; 0 below two observations.
fn std_dev(values: &[f64]) -> f64 {
    let filtered = finite(values);
    if filtered.len() < 2 {
        return 0.0;
    }
    let value = filtered.std_dev();
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn trade(entry: f64, exit: f64, holding_days: usize, reason: ExitReason) -> Trade {
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        Trade {
            symbol: "T".to_string(),
            entry_date: date,
            exit_date: date,
            holding_days,
            entry_price: entry,
            exit_price: exit,
            pct_return: exit / entry - 1.0,
            notional_return: (exit - entry) * 100.0,
            exit_reason: reason,
        }
    }

    #[test]
    fn empty_ledger_is_all_zero() {
        let stats = LedgerStats::from_trades(&[]);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.winning_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.mean_return, 0.0);
        assert_eq!(stats.median_return, 0.0);
        assert_eq!(stats.return_std_dev, 0.0);
        assert_eq!(stats.expectancy, 0.0);
        assert_eq!(stats.profit_factor, ProfitFactor::NoTrades);
        assert!(stats.exits_by_reason.is_empty());
        assert_eq!(
            serde_json::to_value(&stats).unwrap()["profit_factor"],
            serde_json::Value::Null
        );
    }

    #[test]
    fn aggregates_wins_and_losses() {
        let trades = vec![
            trade(100.0, 108.0, 2, ExitReason::TakeProfit),
            trade(100.0, 90.0, 1, ExitReason::IntradayStop),
            trade(200.0, 210.0, 5, ExitReason::TimeLimit),
            trade(100.0, 108.0, 3, ExitReason::TakeProfit),
        ];
        let stats = LedgerStats::from_trades(&trades);
        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.winning_trades, 3);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.win_rate, 0.75);
        assert!((stats.gross_profit - 2600.0).abs() < 1e-6);
        assert!((stats.gross_loss - -1000.0).abs() < 1e-6);
        assert!((stats.net_profit - 1600.0).abs() < 1e-6);
        assert!((stats.expectancy - 400.0).abs() < 1e-6);
        match stats.profit_factor {
            ProfitFactor::Value(pf) => assert!((pf - 2.6).abs() < 1e-9),
            other => panic!("unexpected profit factor {:?}", other),
        }
        assert!((stats.median_return - 0.065).abs() < 1e-9);
        assert!((stats.best_trade - 0.08).abs() < 1e-9);
        assert!((stats.worst_trade - -0.1).abs() < 1e-9);
        assert!((stats.avg_holding_days - 2.75).abs() < 1e-9);
        assert_eq!(stats.exits_by_reason.get(&ExitReason::TakeProfit), Some(&2));
        assert!(stats.return_std_dev > 0.0);
    }

    #[test]
    fn profit_factor_is_unbounded_without_losses() {
        let stats = LedgerStats::from_trades(&[trade(100.0, 105.0, 1, ExitReason::TakeProfit)]);
        assert_eq!(stats.profit_factor, ProfitFactor::Unbounded);
        assert_eq!(stats.return_std_dev, 0.0);

        let flat = LedgerStats::from_trades(&[trade(100.0, 100.0, 5, ExitReason::TimeLimit)]);
        assert_eq!(flat.profit_factor, ProfitFactor::Value(0.0));
        assert_eq!(flat.win_rate, 0.0);
    }
}
