use crate::backtester::BatchBacktester;
use crate::config::BacktestConfig;
use crate::data_context::{DateRange, MarketData};
use crate::run_status::RunStatus;
use anyhow::Result;
use log::info;
use std::collections::HashSet;
use std::path::Path;

#[derive(Clone)]
pub struct AppContext {
    show_progress: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MarketDataFilters {
    pub range: DateRange,
    pub symbols: Option<HashSet<String>>,
}

impl MarketDataFilters {
    pub fn is_empty(&self) -> bool {
        self.range.is_unbounded() && self.symbols.is_none()
    }
}

impl AppContext {
    pub fn initialize(show_progress: bool) -> Self {
        Self { show_progress }
    }

    pub fn engine_context_from_file<P: AsRef<Path>>(
        &self,
        data_file: P,
        filters: Option<MarketDataFilters>,
    ) -> Result<EngineContext> {
        EngineContext::initialize_with_market_data_file(data_file, filters, self.show_progress)
    }
}

pub struct EngineContext {
    market_data: MarketData,
    status: RunStatus,
    show_progress: bool,
}

impl EngineContext {
    pub fn initialize_with_market_data_file<P: AsRef<Path>>(
        data_file: P,
        filters: Option<MarketDataFilters>,
        show_progress: bool,
    ) -> Result<Self> {
        let status = RunStatus::new();
        let filters = filters.unwrap_or_default();
        let market_data = MarketData::load_from_file(data_file, &status)?;
        let market_data = Self::apply_market_data_filters(market_data, &filters)?;
        Ok(Self::from_components(market_data, status, show_progress))
    }

    pub fn from_components(market_data: MarketData, status: RunStatus, show_progress: bool) -> Self {
        status.set_phase("Idle");
        Self {
            market_data,
            status,
            show_progress,
        }
    }

    pub fn market_data(&self) -> &MarketData {
        &self.market_data
    }

    pub fn backtester(&self, config: BacktestConfig) -> BatchBacktester {
        BatchBacktester::new(config, self.status.clone()).with_progress(self.show_progress)
    }

    pub fn status_handle(&self) -> RunStatus {
        self.status.clone()
    }

    fn apply_market_data_filters(
        market_data: MarketData,
        filters: &MarketDataFilters,
    ) -> Result<MarketData> {
        if filters.is_empty() {
            return Ok(market_data);
        }

        let mut filtered = market_data;
        if let Some(symbols) = &filters.symbols {
            let before = filtered.symbols().len();
            filtered = filtered.restrict_to_symbols(symbols)?;
            info!(
                "Restricted market data to {} symbols (from {})",
                filtered.symbols().len(),
                before
            );
        }

        if !filters.range.is_unbounded() {
            let before_dates = filtered.unique_dates().len();
            filtered = filtered.restrict_to_date_range(&filters.range)?;
            info!(
                "Restricted market data to {} ({} dates -> {})",
                filters.range.describe(),
                before_dates,
                filtered.unique_dates().len()
            );
        }

        Ok(filtered)
    }
}
