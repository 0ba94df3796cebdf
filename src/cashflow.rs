//! Indirect-method cash-flow statement derived from two consecutive solved
//! balance sheets and the period's income statement forecast.

use crate::classification::Section;
use crate::error::Diagnostic;
use crate::projector::{dividends_for, monthly_depreciation, resolve_driver, DriverKind, DriverLookup};
use crate::schema::{Assumptions, Category, ForecastPeriod};
use crate::sequencer::{PeriodResult, PeriodSequencer};
use crate::utils::is_debt_name;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowLine {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowSection {
    pub line_items: Vec<CashFlowLine>,
    pub total: f64,
}

impl CashFlowSection {
    fn push(&mut self, label: impl Into<String>, amount: f64) {
        self.line_items.push(CashFlowLine {
            label: label.into(),
            amount,
        });
        self.total += amount;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub period_index: usize,
    pub period_end: NaiveDate,
    pub operating: CashFlowSection,
    pub investing: CashFlowSection,
    pub financing: CashFlowSection,
    pub net_change: f64,
    pub beginning_cash: f64,
    /// Cash as solved on the balance sheet.
    pub ending_cash: f64,
    /// Beginning cash plus net change.
    pub calculated_ending_cash: f64,
    pub reconciliation_difference: f64,
    pub reconciles: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Where a balance sheet movement lands on the cash-flow statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    WorkingCapital,
    FixedAssets,
    Financing,
    /// Cash itself and retained earnings (covered by net income less dividends).
    Excluded,
}

pub struct CashFlowDeriver<'a> {
    sequencer: &'a PeriodSequencer,
    assumptions: &'a Assumptions,
}

impl<'a> CashFlowDeriver<'a> {
    pub fn new(sequencer: &'a PeriodSequencer, assumptions: &'a Assumptions) -> Self {
        Self {
            sequencer,
            assumptions,
        }
    }

    /// One statement per period, each against the previous period's balances
    /// (the opening actuals for the first).
    pub fn derive_all(
        &self,
        results: &[PeriodResult],
        periods: &[ForecastPeriod],
    ) -> Vec<CashFlowStatement> {
        let mut prior = self.sequencer.opening_balances();
        results
            .iter()
            .zip(periods)
            .map(|(result, period)| {
                let statement = self.derive(result, &prior, &period.income_statement);
                prior = result.balances();
                statement
            })
            .collect()
    }

    pub fn derive(
        &self,
        current: &PeriodResult,
        prior: &BTreeMap<String, f64>,
        income_statement: &BTreeMap<String, f64>,
    ) -> CashFlowStatement {
        let mut operating = CashFlowSection::default();
        let mut investing = CashFlowSection::default();
        let mut financing = CashFlowSection::default();
        let mut diagnostics = Vec::new();

        let net_income = match self.net_income(income_statement) {
            DriverLookup::Found { value, .. } => value,
            DriverLookup::Missing { wanted } => {
                diagnostics.push(Diagnostic::MissingDriver {
                    item: "Cash flow from operations".to_string(),
                    driver: wanted,
                });
                0.0
            }
        };
        operating.push("Net income", net_income);

        let mut total_depreciation = 0.0;
        let mut tracks_fixed_assets = false;

        for item in self.sequencer.statement().details() {
            let name = item.name.as_str();
            let Some(section) = self.sequencer.sections().get(name).copied() else {
                continue;
            };
            let now = current.value(name).unwrap_or(0.0);
            let before = prior.get(name).copied().unwrap_or(0.0);
            let delta = now - before;

            match self.activity(name, section) {
                Activity::Excluded => {}
                Activity::FixedAssets => {
                    tracks_fixed_assets = true;
                    let (depreciation, _) =
                        monthly_depreciation(income_statement, before, self.assumptions);
                    total_depreciation += depreciation;
                    let capex = delta + depreciation;
                    investing.push(format!("Capital expenditure ({})", name), -capex);
                }
                Activity::WorkingCapital => {
                    let amount = match section {
                        Section::Asset => -delta,
                        Section::Liability | Section::Equity => delta,
                    };
                    if amount != 0.0 {
                        operating.push(format!("Change in {}", name), amount);
                    }
                }
                Activity::Financing => {
                    if delta != 0.0 {
                        financing.push(format!("Change in {}", name), delta);
                    }
                }
            }
        }

        if !tracks_fixed_assets {
            total_depreciation = DriverKind::Depreciation
                .find(income_statement)
                .map(|(_, v)| v.abs())
                .unwrap_or(0.0);
            let revenue = DriverKind::Revenue
                .find(income_statement)
                .map(|(_, v)| v)
                .unwrap_or(0.0);
            let capex = revenue * 12.0 * self.assumptions.capex_pct_of_revenue / 100.0 / 12.0;
            if capex != 0.0 {
                investing.push("Capital expenditure (estimated from revenue)", -capex);
            }
        }
        // Depreciation sits directly after net income.
        operating.line_items.insert(
            1,
            CashFlowLine {
                label: "Depreciation & amortization".to_string(),
                amount: total_depreciation,
            },
        );
        operating.total += total_depreciation;

        let dividends = dividends_for(net_income, self.assumptions);
        if dividends != 0.0 {
            financing.push("Dividends paid", -dividends);
        }

        let net_change = operating.total + investing.total + financing.total;
        let (beginning_cash, ending_cash) = match self.sequencer.cash_item() {
            Some(cash) => (
                prior.get(cash).copied().unwrap_or(0.0),
                current.value(cash).unwrap_or(0.0),
            ),
            None => (0.0, 0.0),
        };
        let calculated_ending_cash = beginning_cash + net_change;
        let reconciliation_difference = calculated_ending_cash - ending_cash;
        let reconciles =
            reconciliation_difference.abs() < self.sequencer.settings().reconciliation_tolerance;

        debug!(
            "Period {} cash flow: operating {:.2}, investing {:.2}, financing {:.2}, net {:.2}",
            current.period_index, operating.total, investing.total, financing.total, net_change
        );

        if !reconciles {
            diagnostics.push(Diagnostic::NonReconciliation {
                calculated_ending_cash,
                balance_sheet_cash: ending_cash,
                difference: reconciliation_difference,
            });
        }
        for diagnostic in &diagnostics {
            warn!("Period {}: {}", current.period_index, diagnostic);
        }

        CashFlowStatement {
            period_index: current.period_index,
            period_end: current.period_end,
            operating,
            investing,
            financing,
            net_change,
            beginning_cash,
            ending_cash,
            calculated_ending_cash,
            reconciliation_difference,
            reconciles,
            diagnostics,
        }
    }

    /// Net income as the retained earnings roll-forward reads it.
    fn net_income(&self, income_statement: &BTreeMap<String, f64>) -> DriverLookup {
        let explicit = self
            .sequencer
            .statement()
            .details()
            .filter_map(|item| self.sequencer.store().get(&item.name))
            .find(|c| c.category == Category::RetainedEarnings)
            .and_then(|c| c.driver.as_deref());
        resolve_driver(explicit, DriverKind::NetIncome, income_statement)
    }

    fn activity(&self, name: &str, section: Section) -> Activity {
        if self.sequencer.cash_item() == Some(name) {
            return Activity::Excluded;
        }
        match self.sequencer.store().category_of(name) {
            Some(Category::RetainedEarnings) => Activity::Excluded,
            Some(Category::PropertyPlantEquipment) => Activity::FixedAssets,
            Some(Category::ShortTermDebt | Category::LongTermDebt | Category::CommonStock) => {
                Activity::Financing
            }
            _ => match section {
                Section::Asset => Activity::WorkingCapital,
                Section::Liability if is_debt_name(name) => Activity::Financing,
                Section::Liability => Activity::WorkingCapital,
                Section::Equity => Activity::Financing,
            },
        }
    }
}
