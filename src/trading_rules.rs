use crate::models::Bar;

/// Fill for a resting buy limit at `limit`. A bar that opens below the limit
/// fills at the open.
pub fn limit_entry_price(bar: &Bar, limit: f64) -> Option<f64> {
    if bar.low <= limit {
        if bar.open <= limit {
            Some(bar.open)
        } else {
            Some(limit)
        }
    } else {
        None
    }
}

/// Fill for a stop below a long position. Gapping through the stop fills at
/// the open.
pub fn stop_loss_exit_price(bar: &Bar, stop_loss: f64) -> Option<f64> {
    if bar.low <= stop_loss {
        if bar.open <= stop_loss {
            Some(bar.open)
        } else {
            Some(stop_loss)
        }
    } else {
        None
    }
}

/// Fill for a resting sell limit above a long position. Gapping above the
/// target fills at the open.
pub fn take_profit_exit_price(bar: &Bar, target: f64) -> Option<f64> {
    if bar.high >= target {
        if bar.open >= target {
            Some(bar.open)
        } else {
            Some(target)
        }
    } else {
        None
    }
}

/// Close-only stop: exits at the close when it settles at or below `stop_level`.
pub fn close_stop_exit_price(bar: &Bar, stop_level: f64) -> Option<f64> {
    if bar.close <= stop_level {
        Some(bar.close)
    } else {
        None
    }
}

pub fn price_below(entry_price: f64, pct: f64) -> f64 {
    entry_price * (1.0 - pct / 100.0)
}

pub fn price_above(entry_price: f64, pct: f64) -> f64 {
    entry_price * (1.0 + pct / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "T".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            open,
            high,
            low,
            close,
        }
    }

    #[test]
    fn limit_entry_fills_at_limit_or_gapped_open() {
        assert_eq!(limit_entry_price(&bar(760.0, 780.0, 700.0, 720.0), 750.0), Some(750.0));
        assert_eq!(limit_entry_price(&bar(720.0, 730.0, 700.0, 710.0), 750.0), Some(720.0));
        assert!(limit_entry_price(&bar(800.0, 810.0, 751.0, 790.0), 750.0).is_none());
    }

    #[test]
    fn stop_loss_exit_price_prefers_open_gap() {
        let gap_bar = bar(9.0, 12.0, 8.5, 10.0);
        assert_eq!(stop_loss_exit_price(&gap_bar, 9.5), Some(9.0));
        assert!(stop_loss_exit_price(&gap_bar, 8.0).is_none());

        let intraday = bar(700.0, 710.0, 670.0, 690.0);
        let fill = stop_loss_exit_price(&intraday, price_below(750.0, 10.0)).unwrap();
        assert!((fill - 675.0).abs() < 1e-9);
    }

    #[test]
    fn take_profit_fills_at_target_or_gapped_open() {
        let target = price_above(750.0, 8.0);
        assert_eq!(take_profit_exit_price(&bar(760.0, 820.0, 755.0, 800.0), target), Some(target));
        assert_eq!(take_profit_exit_price(&bar(830.0, 840.0, 820.0, 825.0), target), Some(830.0));
        assert!(take_profit_exit_price(&bar(760.0, 800.0, 755.0, 790.0), target).is_none());
    }

    #[test]
    fn close_stop_uses_settlement_only() {
        let level = price_below(750.0, 8.0);
        assert_eq!(close_stop_exit_price(&bar(700.0, 710.0, 600.0, 689.0), level), Some(689.0));
        assert!(close_stop_exit_price(&bar(700.0, 710.0, 600.0, 700.0), level).is_none());
    }
}
