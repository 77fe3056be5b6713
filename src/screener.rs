use crate::config::RuleConfig;
use crate::error::PipelineError;
use crate::models::{Candidate, PatternFlags, ReferenceInfo, SymbolSeries, SymbolSkip, WindowMetrics};
use crate::patterns::detect_patterns;
use crate::window_metrics::{compute_metrics, MONTH_BARS};
use chrono::Duration;
use clap::ValueEnum;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const TAKE_PROFIT_MULTIPLIERS: [f64; 3] = [1.03, 1.05, 1.08];
const LISTING_AGE_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    MinPrice,
    MonthBreakout,
    LongTermDrop,
    LongTermRise,
    ListingAge,
    RiskNotes,
    Sector,
    WindowBreakout,
    RecentHigh,
    NearTarget,
    PatternVeto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub rule: Rule,
    pub passed: bool,
}

/// Outcome of every active rule for one symbol, in evaluation order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    pub checks: Vec<RuleCheck>,
}

impl Evaluation {
    pub fn satisfaction_ratio(&self) -> f64 {
        if self.checks.is_empty() {
            return 0.0;
        }
        let passed = self.checks.iter().filter(|check| check.passed).count();
        passed as f64 / self.checks.len() as f64
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn check(&self, rule: Rule) -> Option<bool> {
        self.checks
            .iter()
            .find(|check| check.rule == rule)
            .map(|check| check.passed)
    }

    pub fn pattern_veto_passed(&self) -> bool {
        self.check(Rule::PatternVeto).unwrap_or(true)
    }

    pub fn vetoed_only_by_pattern(&self) -> bool {
        !self.pattern_veto_passed()
            && self
                .checks
                .iter()
                .filter(|check| check.rule != Rule::PatternVeto)
                .all(|check| check.passed)
    }

    pub fn failed_rules(&self) -> Vec<Rule> {
        self.checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.rule)
            .collect()
    }

    fn push(&mut self, rule: Rule, passed: bool) {
        self.checks.push(RuleCheck { rule, passed });
    }
}

fn text_contains_any(text: Option<&str>, keywords: &[String]) -> bool {
    let Some(text) = text else {
        return false;
    };
    keywords
        .iter()
        .filter(|keyword| !keyword.is_empty())
        .any(|keyword| text.contains(keyword.as_str()))
}

/// True when at least one row knows when (or whether) its symbol was listed a
/// year ago. A bare company master list does not.
pub fn has_listing_data(reference: &HashMap<String, ReferenceInfo>) -> bool {
    reference
        .values()
        .any(|info| info.is_known_one_year_ago || info.listing_date.is_some())
}

fn listed_for_a_year(metrics: &WindowMetrics, reference: Option<&ReferenceInfo>) -> bool {
    let Some(info) = reference else {
        return false;
    };
    if info.is_known_one_year_ago {
        return true;
    }
    info.listing_date
        .map(|listed| listed <= metrics.latest_date - Duration::days(LISTING_AGE_DAYS))
        .unwrap_or(false)
}

/// Runs every active rule without short-circuiting. `listing_data_available`
/// says whether any reference row in the batch carries listing information;
/// listing-age screening only applies when one does.
pub fn evaluate(
    metrics: &WindowMetrics,
    patterns: &PatternFlags,
    reference: Option<&ReferenceInfo>,
    listing_data_available: bool,
    config: &RuleConfig,
) -> Evaluation {
    let mut evaluation = Evaluation::default();

    evaluation.push(Rule::MinPrice, metrics.latest_close >= config.min_price);
    evaluation.push(
        Rule::MonthBreakout,
        metrics.month_breakout_ratio <= config.max_1m_breakout_ratio,
    );
    evaluation.push(
        Rule::LongTermDrop,
        metrics.long_term_drop_pct >= config.max_long_term_drop_pct,
    );
    evaluation.push(
        Rule::LongTermRise,
        metrics.long_term_rise_ratio <= config.max_long_term_rise_ratio
            || metrics.long_term_rise_ratio == 0.0,
    );

    if config.exclude_ipo && listing_data_available {
        evaluation.push(Rule::ListingAge, listed_for_a_year(metrics, reference));
    }

    if config.exclude_risk_notes {
        let flagged = reference
            .map(|info| {
                text_contains_any(info.company_name.as_deref(), &config.risk_keywords)
                    || text_contains_any(info.risk_disclosure.as_deref(), &config.risk_keywords)
            })
            .unwrap_or(false);
        evaluation.push(Rule::RiskNotes, !flagged);
    }

    if !config.sector_filter.is_empty() {
        let in_sector = reference
            .and_then(|info| info.sector.as_deref())
            .map(|sector| config.sector_filter.iter().any(|allowed| allowed == sector))
            .unwrap_or(false);
        evaluation.push(Rule::Sector, in_sector);
    }

    evaluation.push(
        Rule::WindowBreakout,
        metrics.breakout_ratio >= config.window_breakout_min
            && metrics.breakout_ratio <= config.window_breakout_max,
    );
    evaluation.push(
        Rule::RecentHigh,
        metrics.days_since_window_high <= config.max_days_since_high,
    );
    evaluation.push(
        Rule::NearTarget,
        metrics.latest_close
            <= metrics.push_target * (1.0 + config.near_target_tolerance_pct / 100.0),
    );
    evaluation.push(Rule::PatternVeto, !patterns.has_bearish_reversal());

    evaluation
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    /// Deepest pullback first
    ReachPct,
    /// Double-bottom setups first, then deepest pullback
    #[default]
    DoubleBottomFirst,
    /// Support-hugging setups first, then deepest pullback
    SupportHugFirst,
    /// Most rules satisfied first, then deepest pullback
    Satisfaction,
}

#[derive(Debug, Clone)]
pub struct ScreenOptions {
    pub ranking: RankingMode,
    /// Minimum share of active rules a symbol must pass. 1.0 means all of them.
    pub min_satisfaction: f64,
    pub limit: Option<usize>,
}

impl Default for ScreenOptions {
    fn default() -> Self {
        Self {
            ranking: RankingMode::DoubleBottomFirst,
            min_satisfaction: 1.0,
            limit: Some(10),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScreenReport {
    pub candidates: Vec<Candidate>,
    pub evaluated: usize,
    pub pattern_vetoed: Vec<String>,
    pub skipped: Vec<SymbolSkip>,
}

/// Metrics and pattern flags for one symbol's series.
pub fn analyze_series(
    series: &SymbolSeries,
    config: &RuleConfig,
) -> Result<(WindowMetrics, PatternFlags), PipelineError> {
    let metrics = compute_metrics(series, config.push_pct)?;
    let patterns = detect_patterns(series.trailing(MONTH_BARS), metrics.window_low);
    Ok((metrics, patterns))
}

pub fn take_profit_levels(push_target: f64) -> [f64; 3] {
    TAKE_PROFIT_MULTIPLIERS.map(|multiplier| push_target * multiplier)
}

enum Screened {
    Candidate(Candidate),
    PatternVetoed(String),
    Rejected,
    Skipped(SymbolSkip),
}

fn screen_symbol(
    series: &SymbolSeries,
    reference: &HashMap<String, ReferenceInfo>,
    listing_data_available: bool,
    config: &RuleConfig,
    options: &ScreenOptions,
) -> Screened {
    let (metrics, patterns) = match analyze_series(series, config) {
        Ok(analysis) => analysis,
        Err(err) => {
            debug!("Skipping {}", err);
            return Screened::Skipped(SymbolSkip {
                symbol: series.symbol.clone(),
                reason: err.to_string(),
            });
        }
    };

    let info = reference.get(&series.symbol);
    let evaluation = evaluate(&metrics, &patterns, info, listing_data_available, config);
    let satisfaction_ratio = evaluation.satisfaction_ratio();

    if evaluation.vetoed_only_by_pattern() {
        return Screened::PatternVetoed(series.symbol.clone());
    }
    if !evaluation.pattern_veto_passed() || satisfaction_ratio < options.min_satisfaction {
        return Screened::Rejected;
    }

    Screened::Candidate(Candidate {
        symbol: series.symbol.clone(),
        take_profit_levels: take_profit_levels(metrics.push_target),
        metrics,
        patterns,
        reference: info.cloned(),
        satisfaction_ratio,
    })
}

fn primary_rank_key(candidate: &Candidate, mode: RankingMode) -> f64 {
    match mode {
        RankingMode::ReachPct => 0.0,
        RankingMode::DoubleBottomFirst => f64::from(u8::from(candidate.patterns.is_double_bottom)),
        RankingMode::SupportHugFirst => f64::from(u8::from(candidate.patterns.is_support_hug)),
        RankingMode::Satisfaction => candidate.satisfaction_ratio,
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate, mode: RankingMode) -> Ordering {
    primary_rank_key(b, mode)
        .total_cmp(&primary_rank_key(a, mode))
        .then_with(|| b.metrics.reach_pct.total_cmp(&a.metrics.reach_pct))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

pub fn rank_candidates(candidates: &mut [Candidate], mode: RankingMode) {
    candidates.sort_by(|a, b| compare_candidates(a, b, mode));
}

/// Screens every series in parallel and returns ranked candidates.
pub fn screen(
    universe: &[SymbolSeries],
    reference: &HashMap<String, ReferenceInfo>,
    config: &RuleConfig,
    options: &ScreenOptions,
) -> ScreenReport {
    let listing_data_available = has_listing_data(reference);
    if config.exclude_ipo && !reference.is_empty() && !listing_data_available {
        info!("Reference data has no listing information; listing-age rule inactive");
    }
    let outcomes: Vec<Screened> = universe
        .par_iter()
        .map(|series| screen_symbol(series, reference, listing_data_available, config, options))
        .collect();

    let mut report = ScreenReport::default();
    for outcome in outcomes {
        match outcome {
            Screened::Candidate(candidate) => {
                report.evaluated += 1;
                report.candidates.push(candidate);
            }
            Screened::PatternVetoed(symbol) => {
                report.evaluated += 1;
                report.pattern_vetoed.push(symbol);
            }
            Screened::Rejected => report.evaluated += 1,
            Screened::Skipped(skip) => report.skipped.push(skip),
        }
    }

    rank_candidates(&mut report.candidates, options.ranking);
    if let Some(limit) = options.limit {
        report.candidates.truncate(limit);
    }
    report.pattern_vetoed.sort();
    report.skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    info!(
        "Screened {} symbols: {} candidates, {} vetoed by pattern, {} skipped",
        report.evaluated,
        report.candidates.len(),
        report.pattern_vetoed.len(),
        report.skipped.len()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn metrics() -> WindowMetrics {
        WindowMetrics {
            latest_close: 560.0,
            latest_date: NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
            window_high: 700.0,
            window_low: 400.0,
            days_since_window_high: 2,
            month_low: 400.0,
            prior_window_high: Some(650.0),
            prior_window_low: Some(300.0),
            breakout_ratio: 1.75,
            month_breakout_ratio: 1.4,
            long_term_drop_pct: -13.8,
            long_term_rise_ratio: 1.87,
            push_target: 565.0,
            reach_pct: 103.7,
        }
    }

    fn candidate(symbol: &str, reach: f64, double_bottom: bool, ratio: f64) -> Candidate {
        hugging_candidate(symbol, reach, double_bottom, false, ratio)
    }

    fn hugging_candidate(
        symbol: &str,
        reach: f64,
        double_bottom: bool,
        support_hug: bool,
        ratio: f64,
    ) -> Candidate {
        let mut m = metrics();
        m.reach_pct = reach;
        Candidate {
            symbol: symbol.to_string(),
            take_profit_levels: take_profit_levels(m.push_target),
            metrics: m,
            patterns: PatternFlags {
                is_double_bottom: double_bottom,
                is_support_hug: support_hug,
                ..Default::default()
            },
            reference: None,
            satisfaction_ratio: ratio,
        }
    }

    #[test]
    fn passing_symbol_satisfies_every_rule() {
        let evaluation = evaluate(
            &metrics(),
            &PatternFlags::default(),
            None,
            false,
            &RuleConfig::default(),
        );
        assert!(evaluation.passed());
        assert_eq!(evaluation.satisfaction_ratio(), 1.0);
        // listing age inactive, sector filter empty
        assert_eq!(evaluation.checks.len(), 9);
        assert_eq!(evaluation.check(Rule::ListingAge), None);
    }

    #[test]
    fn evaluates_all_rules_without_short_circuit() {
        let mut m = metrics();
        m.latest_close = 150.0;
        m.breakout_ratio = 2.5;
        let evaluation = evaluate(&m, &PatternFlags::default(), None, false, &RuleConfig::default());
        assert_eq!(
            evaluation.failed_rules(),
            vec![Rule::MinPrice, Rule::WindowBreakout]
        );
        assert!((evaluation.satisfaction_ratio() - 7.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn long_term_rise_of_zero_passes() {
        let mut m = metrics();
        m.long_term_rise_ratio = 0.0;
        let evaluation = evaluate(&m, &PatternFlags::default(), None, false, &RuleConfig::default());
        assert_eq!(evaluation.check(Rule::LongTermRise), Some(true));

        m.long_term_rise_ratio = 3.5;
        let evaluation = evaluate(&m, &PatternFlags::default(), None, false, &RuleConfig::default());
        assert_eq!(evaluation.check(Rule::LongTermRise), Some(false));
    }

    #[test]
    fn listing_age_applies_only_with_reference_data() {
        let config = RuleConfig::default();
        let young = ReferenceInfo {
            symbol: "99990".to_string(),
            listing_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let evaluation = evaluate(&metrics(), &PatternFlags::default(), Some(&young), true, &config);
        assert_eq!(evaluation.check(Rule::ListingAge), Some(false));

        let seasoned = ReferenceInfo {
            listing_date: NaiveDate::from_ymd_opt(2023, 6, 14),
            ..young.clone()
        };
        let evaluation =
            evaluate(&metrics(), &PatternFlags::default(), Some(&seasoned), true, &config);
        assert_eq!(evaluation.check(Rule::ListingAge), Some(true));

        let known = ReferenceInfo {
            listing_date: None,
            is_known_one_year_ago: true,
            ..young
        };
        let evaluation = evaluate(&metrics(), &PatternFlags::default(), Some(&known), true, &config);
        assert_eq!(evaluation.check(Rule::ListingAge), Some(true));

        let evaluation = evaluate(&metrics(), &PatternFlags::default(), None, true, &config);
        assert_eq!(evaluation.check(Rule::ListingAge), Some(false));
    }

    #[test]
    fn master_list_without_listing_data_leaves_listing_age_inactive() {
        let master_row = ReferenceInfo {
            symbol: "13010".to_string(),
            company_name: Some("Kyokuyo".to_string()),
            sector: Some("水産・農林業".to_string()),
            market_tier: Some("Prime".to_string()),
            ..Default::default()
        };
        let mut reference = HashMap::new();
        reference.insert(master_row.symbol.clone(), master_row.clone());
        assert!(!has_listing_data(&reference));

        let evaluation = evaluate(
            &metrics(),
            &PatternFlags::default(),
            Some(&master_row),
            has_listing_data(&reference),
            &RuleConfig::default(),
        );
        assert_eq!(evaluation.check(Rule::ListingAge), None);
        assert!(evaluation.passed());

        let dated = ReferenceInfo {
            symbol: "72030".to_string(),
            listing_date: NaiveDate::from_ymd_opt(1949, 5, 16),
            ..Default::default()
        };
        reference.insert(dated.symbol.clone(), dated);
        assert!(has_listing_data(&reference));
    }

    #[test]
    fn risk_keywords_match_company_name_or_disclosure() {
        let config = RuleConfig::default();
        let flagged = ReferenceInfo {
            symbol: "12340".to_string(),
            company_name: Some("継続企業の前提に関する疑義 Holdings".to_string()),
            is_known_one_year_ago: true,
            ..Default::default()
        };
        let evaluation = evaluate(&metrics(), &PatternFlags::default(), Some(&flagged), true, &config);
        assert_eq!(evaluation.check(Rule::RiskNotes), Some(false));

        let disclosed = ReferenceInfo {
            company_name: Some("Plain Co".to_string()),
            risk_disclosure: Some("重要事象等".to_string()),
            ..flagged.clone()
        };
        let evaluation =
            evaluate(&metrics(), &PatternFlags::default(), Some(&disclosed), true, &config);
        assert_eq!(evaluation.check(Rule::RiskNotes), Some(false));

        let clean = ReferenceInfo {
            risk_disclosure: None,
            ..disclosed
        };
        let evaluation = evaluate(&metrics(), &PatternFlags::default(), Some(&clean), true, &config);
        assert!(evaluation.passed());
    }

    #[test]
    fn sector_filter_requires_matching_reference_sector() {
        let config = RuleConfig::default().with_sector_filter(vec!["銀行業".to_string()]);
        let evaluation = evaluate(&metrics(), &PatternFlags::default(), None, false, &config);
        assert_eq!(evaluation.check(Rule::Sector), Some(false));

        let bank = ReferenceInfo {
            symbol: "83060".to_string(),
            sector: Some("銀行業".to_string()),
            ..Default::default()
        };
        let evaluation = evaluate(&metrics(), &PatternFlags::default(), Some(&bank), false, &config);
        assert_eq!(evaluation.check(Rule::Sector), Some(true));
    }

    #[test]
    fn near_target_uses_tolerance_band() {
        let mut m = metrics();
        m.latest_close = 593.0;
        let evaluation = evaluate(&m, &PatternFlags::default(), None, false, &RuleConfig::default());
        assert_eq!(evaluation.check(Rule::NearTarget), Some(true));

        m.latest_close = 594.0;
        let evaluation = evaluate(&m, &PatternFlags::default(), None, false, &RuleConfig::default());
        assert_eq!(evaluation.check(Rule::NearTarget), Some(false));
    }

    #[test]
    fn bearish_pattern_vetoes_last() {
        let patterns = PatternFlags {
            is_head_shoulders: true,
            ..Default::default()
        };
        let evaluation = evaluate(&metrics(), &patterns, None, false, &RuleConfig::default());
        assert!(!evaluation.passed());
        assert!(evaluation.vetoed_only_by_pattern());
        assert_eq!(evaluation.checks.last().map(|c| c.rule), Some(Rule::PatternVeto));
    }

    #[test]
    fn ranking_orders_by_mode_then_reach_then_symbol() {
        let mut candidates = vec![
            candidate("C", 90.0, false, 1.0),
            candidate("A", 120.0, false, 0.9),
            candidate("B", 80.0, true, 1.0),
            candidate("D", 120.0, false, 0.9),
        ];

        rank_candidates(&mut candidates, RankingMode::DoubleBottomFirst);
        let order: Vec<_> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "D", "C"]);

        rank_candidates(&mut candidates, RankingMode::ReachPct);
        let order: Vec<_> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(order, vec!["A", "D", "C", "B"]);

        rank_candidates(&mut candidates, RankingMode::Satisfaction);
        let order: Vec<_> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A", "D"]);
    }

    #[test]
    fn support_hug_ranking_puts_huggers_first_then_reach() {
        let mut candidates = vec![
            hugging_candidate("A", 130.0, true, false, 1.0),
            hugging_candidate("B", 95.0, false, true, 1.0),
            hugging_candidate("C", 110.0, false, true, 1.0),
            hugging_candidate("D", 110.0, false, true, 1.0),
        ];

        rank_candidates(&mut candidates, RankingMode::SupportHugFirst);
        let order: Vec<_> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(order, vec!["C", "D", "B", "A"]);
    }

    #[test]
    fn take_profit_levels_scale_push_target() {
        let levels = take_profit_levels(100.0);
        assert!((levels[0] - 103.0).abs() < 1e-9);
        assert!((levels[1] - 105.0).abs() < 1e-9);
        assert!((levels[2] - 108.0).abs() < 1e-9);
    }
}
