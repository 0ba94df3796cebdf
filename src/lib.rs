//! # Three-Way Forecast
//!
//! A statement-reconciliation engine: given historical balance sheet and income
//! statement rows, a classification for each balance sheet line and a monthly
//! income statement forecast, it projects a balance sheet that balances and a
//! cash-flow statement that reconciles to it, period by period.
//!
//! ## Core Concepts
//!
//! - **Hierarchy**: totals and subtotals are recovered from statement layout and validated against reported values
//! - **Projection**: each balance sheet category has one formula (DSO, DPO, roll-forwards, growth, ...)
//! - **Balancing**: cash is the plug that makes Assets = Liabilities + Equity
//! - **Sequencing**: periods are a strict fold; each reads the previous period's balances
//! - **Cash flow**: indirect method, reconciled against the solved cash balance
//! - **Sensitivity**: what-if tables over a line item's growth rate
//!
//! Recoverable problems (missing drivers, unresolved totals, clamped cash,
//! non-reconciliation) never abort a run. They are returned as [`Diagnostic`]s
//! attached to the affected line item and period.
//!
//! ## Example
//!
//! ```rust,ignore
//! use three_way_forecast::*;
//! use chrono::NaiveDate;
//!
//! let config = ForecastConfig {
//!     company_name: "ACME Corp".to_string(),
//!     last_actual_period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
//!     balance_sheet: vec![
//!         StatementRow::new("Cash", vec![Some(50_000.0)]),
//!         StatementRow::new("Accounts Receivable", vec![Some(150_000.0)]),
//!         StatementRow::new("Equipment", vec![Some(100_000.0)]),
//!         StatementRow::new("Total Assets", vec![Some(300_000.0)]),
//!         StatementRow::new("Accounts Payable", vec![Some(80_000.0)]),
//!         StatementRow::new("Total Liabilities", vec![Some(80_000.0)]),
//!         StatementRow::new("Retained Earnings", vec![Some(220_000.0)]),
//!         StatementRow::new("Total Equity", vec![Some(220_000.0)]),
//!     ],
//!     income_statement: vec![],
//!     classifications: vec![
//!         Classification::new("Cash", Category::Cash),
//!         Classification::new("Accounts Receivable", Category::AccountsReceivable),
//!         Classification::new("Equipment", Category::PropertyPlantEquipment),
//!         Classification::new("Accounts Payable", Category::AccountsPayable),
//!         Classification::new("Retained Earnings", Category::RetainedEarnings),
//!     ],
//!     periods: vec![ForecastPeriod::new([
//!         ("Revenue", 100_000.0),
//!         ("Operating Expenses", 70_000.0),
//!         ("Net Income", 20_000.0),
//!     ])],
//!     assumptions: Assumptions::default(),
//!     settings: EngineSettings::default(),
//! };
//!
//! let run = run_forecast(&config).unwrap();
//! println!("{}", run.to_markdown());
//! ```

pub mod cashflow;
pub mod classification;
pub mod error;
pub mod hierarchy;
pub mod ingestion;
pub mod projector;
pub mod report;
pub mod scenario;
pub mod schema;
pub mod sensitivity;
pub mod sequencer;
pub mod solver;
pub mod utils;

pub use cashflow::{CashFlowDeriver, CashFlowLine, CashFlowSection, CashFlowStatement};
pub use classification::{ClassificationStore, Section};
pub use error::{Diagnostic, ForecastError, Result};
pub use hierarchy::{ChildSpan, HierarchyTotal, KeyTotal, StatementHierarchy, TreeNode};
pub use ingestion::Statement;
pub use projector::{ProjectedValue, ProjectionRule};
pub use scenario::{AssumptionModification, AssumptionRatio, Scenario};
pub use schema::*;
pub use sensitivity::{
    SensitivityEngine, SensitivityMode, SensitivityRequest, SensitivityRow, SensitivityTable,
};
pub use sequencer::{PeriodResult, PeriodSequencer};
pub use solver::{verify_accounting_equation, BalanceCheck, BalancingSolver};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Everything one run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub company_name: String,
    /// Balance sheet structure the run was projected through.
    pub hierarchy: StatementHierarchy,
    pub periods: Vec<PeriodResult>,
    pub cash_flows: Vec<CashFlowStatement>,
    /// Run-level findings, e.g. historical actuals that do not balance.
    pub diagnostics: Vec<Diagnostic>,
}

impl ForecastRun {
    /// Run-level diagnostics followed by every period's and cash flow's, in period order.
    pub fn all_diagnostics(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .chain(
                self.periods
                    .iter()
                    .zip(&self.cash_flows)
                    .flat_map(|(p, cf)| p.diagnostics.iter().chain(&cf.diagnostics)),
            )
            .collect()
    }

    pub fn to_markdown(&self) -> String {
        report::to_markdown(self)
    }
}

/// A validated configuration with its statement structure resolved once.
pub struct ForecastEngine {
    config: ForecastConfig,
    sequencer: PeriodSequencer,
    income_statement: Statement,
    income_hierarchy: StatementHierarchy,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;

        let balance_sheet = Statement::from_rows("balance sheet", &config.balance_sheet)?;
        let income_statement = Statement::from_rows("income statement", &config.income_statement)?;
        let store = ClassificationStore::new(&config.classifications);

        debug!(
            "Configuration contains {} balance sheet rows, {} income statement rows and {} classifications",
            balance_sheet.items.len(),
            income_statement.items.len(),
            store.len()
        );

        let income_hierarchy =
            StatementHierarchy::resolve(&income_statement, config.settings.validation_threshold);
        let sequencer = PeriodSequencer::new(balance_sheet, store, config.settings.clone());

        Ok(Self {
            config,
            sequencer,
            income_statement,
            income_hierarchy,
        })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &PeriodSequencer {
        &self.sequencer
    }

    pub fn hierarchy(&self) -> &StatementHierarchy {
        self.sequencer.hierarchy()
    }

    pub fn income_hierarchy(&self) -> &StatementHierarchy {
        &self.income_hierarchy
    }

    /// Runs the full pipeline with the configured assumptions.
    pub fn run(&self) -> ForecastRun {
        self.run_with(&self.config.assumptions)
    }

    pub fn run_with(&self, assumptions: &Assumptions) -> ForecastRun {
        info!(
            "Forecasting {} periods for {}",
            self.config.periods.len(),
            self.config.company_name
        );

        let mut diagnostics = Vec::new();
        if let Some(diagnostic) = verify_accounting_equation(
            self.sequencer.hierarchy(),
            &self.sequencer.opening_balances(),
            self.config.settings.balance_tolerance,
        ) {
            warn!("Historical actuals: {}", diagnostic);
            diagnostics.push(diagnostic);
        }

        let periods = self.sequencer.run(
            self.config.last_actual_period_end,
            &self.config.periods,
            assumptions,
        );
        let cash_flows =
            CashFlowDeriver::new(&self.sequencer, assumptions).derive_all(&periods, &self.config.periods);

        let run = ForecastRun {
            company_name: self.config.company_name.clone(),
            hierarchy: self.sequencer.hierarchy().clone(),
            periods,
            cash_flows,
            diagnostics,
        };

        info!(
            "Forecast complete for {}: {} periods, {} diagnostics",
            run.company_name,
            run.periods.len(),
            run.all_diagnostics().len()
        );
        run
    }

    /// Runs the pipeline under a scenario applied to the configured assumptions.
    pub fn run_scenario(&self, scenario: &Scenario) -> Result<ForecastRun> {
        info!("Running scenario '{}'", scenario.name);
        let assumptions = scenario.apply_validated(&self.config.assumptions)?;
        Ok(self.run_with(&assumptions))
    }

    pub fn sensitivity(&self, request: &SensitivityRequest) -> Result<SensitivityTable> {
        self.sensitivity_with(request, &self.config.assumptions)
    }

    pub fn sensitivity_with(
        &self,
        request: &SensitivityRequest,
        assumptions: &Assumptions,
    ) -> Result<SensitivityTable> {
        SensitivityEngine::new(
            &self.sequencer,
            &self.income_statement,
            &self.income_hierarchy,
            &self.config.periods,
            self.config.last_actual_period_end,
        )
        .run(request, assumptions)
    }
}

pub fn run_forecast(config: &ForecastConfig) -> Result<ForecastRun> {
    Ok(ForecastEngine::new(config.clone())?.run())
}
