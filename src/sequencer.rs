use crate::classification::{ClassificationStore, Section};
use crate::error::Diagnostic;
use crate::hierarchy::StatementHierarchy;
use crate::ingestion::Statement;
use crate::projector::{self, ProjectedValue, ProjectionContext, ProjectionRule, StaticValueRule};
use crate::schema::{Assumptions, Category, Classification, EngineSettings, ForecastPeriod, StructuralRole};
use crate::solver::{BalanceCheck, BalancingSolver};
use crate::utils::forecast_period_ends;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The solved balance sheet for one forecast period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodResult {
    pub period_index: usize,
    pub period_end: NaiveDate,
    /// Every balance sheet row, including totals and headings.
    pub values: BTreeMap<String, ProjectedValue>,
    pub balance_check: Option<BalanceCheck>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PeriodResult {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).map(|v| v.value)
    }

    /// Plain balances, as read by the next period.
    pub fn balances(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .map(|(name, v)| (name.clone(), v.value))
            .collect()
    }
}

/// Balance sheet context resolved once per run and shared by every period.
#[derive(Debug, Clone)]
pub struct PeriodSequencer {
    statement: Statement,
    hierarchy: StatementHierarchy,
    store: ClassificationStore,
    sections: BTreeMap<String, Section>,
    cash_item: Option<String>,
    settings: EngineSettings,
}

impl PeriodSequencer {
    pub fn new(statement: Statement, store: ClassificationStore, settings: EngineSettings) -> Self {
        let hierarchy = StatementHierarchy::resolve(&statement, settings.validation_threshold);
        let sections = store.resolve_sections(&statement, &hierarchy);
        let cash_item = store.cash_item(&statement).map(|item| item.name.clone());
        Self {
            statement,
            hierarchy,
            store,
            sections,
            cash_item,
            settings,
        }
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn hierarchy(&self) -> &StatementHierarchy {
        &self.hierarchy
    }

    pub fn store(&self) -> &ClassificationStore {
        &self.store
    }

    pub fn sections(&self) -> &BTreeMap<String, Section> {
        &self.sections
    }

    pub fn cash_item(&self) -> Option<&str> {
        self.cash_item.as_deref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// state[-1]: the most recent actual of every balance sheet row.
    pub fn opening_balances(&self) -> BTreeMap<String, f64> {
        self.statement.latest_actuals()
    }

    /// Folds over the forecast periods in order, each reading its predecessor's balances.
    pub fn run(
        &self,
        last_actual_period_end: NaiveDate,
        periods: &[ForecastPeriod],
        assumptions: &Assumptions,
    ) -> Vec<PeriodResult> {
        let period_ends = forecast_period_ends(last_actual_period_end, periods.len());
        let mut prior = self.opening_balances();
        let mut results = Vec::with_capacity(periods.len());

        for (index, (period, period_end)) in periods.iter().zip(period_ends).enumerate() {
            let result = self.compute_period(
                index,
                period_end,
                &period.income_statement,
                assumptions,
                &prior,
            );
            prior = result.balances();
            results.push(result);
        }

        results
    }

    /// Projector, totals pass 1, balancing solver (which runs totals pass 2).
    pub fn compute_period(
        &self,
        period_index: usize,
        period_end: NaiveDate,
        income_statement: &BTreeMap<String, f64>,
        assumptions: &Assumptions,
        prior: &BTreeMap<String, f64>,
    ) -> PeriodResult {
        debug!("Computing period {} ({})", period_index, period_end);

        let mut values = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for item in &self.statement.items {
            if item.role != StructuralRole::Detail {
                continue;
            }
            let projected = self.project_detail(&item.name, income_statement, assumptions, prior);
            diagnostics.extend(projected.diagnostics.iter().cloned());
            values.insert(item.name.clone(), projected);
        }

        self.hierarchy.apply_totals(&mut values, prior);

        let solver = BalancingSolver::new(
            &self.hierarchy,
            &self.sections,
            self.cash_item.as_deref(),
            &self.settings,
        );
        let report = solver.solve(&mut values, prior);

        for total in &self.hierarchy.totals {
            if let Some(projected) = values.get(&total.name) {
                diagnostics.extend(projected.diagnostics.iter().cloned());
            }
        }
        for diagnostic in &diagnostics {
            warn!("Period {}: {}", period_index, diagnostic);
        }
        diagnostics.extend(report.diagnostics);

        PeriodResult {
            period_index,
            period_end,
            values,
            balance_check: report.check,
            diagnostics,
        }
    }

    fn project_detail(
        &self,
        name: &str,
        income_statement: &BTreeMap<String, f64>,
        assumptions: &Assumptions,
        prior: &BTreeMap<String, f64>,
    ) -> ProjectedValue {
        let prior_value = prior.get(name).copied();

        let classification = match self.store.get(name) {
            Some(c) if !c.category.is_structural() => c,
            _ => {
                let fallback = Classification::new(name, Category::OtherAssetOrLiability);
                let projected = projector::project(
                    name,
                    &fallback,
                    income_statement,
                    assumptions,
                    prior_value,
                );
                return projected.with_diagnostic(Diagnostic::Unclassified {
                    item: name.to_string(),
                });
            }
        };

        // Only the first cash row is the plug; any other cash account is held flat.
        if classification.category == Category::Cash && self.cash_item.as_deref() != Some(name) {
            let ctx = ProjectionContext {
                item_name: name,
                classification,
                income_statement,
                assumptions,
                prior: prior_value,
            };
            return StaticValueRule.project(&ctx);
        }

        let projected = projector::project(
            name,
            classification,
            income_statement,
            assumptions,
            prior_value,
        );

        // The formula always follows the category; a conflicting declared method is reported.
        let applied = classification.category.default_method();
        if classification.method != applied {
            return projected.with_diagnostic(Diagnostic::MethodMismatch {
                item: name.to_string(),
                declared: classification.method,
                applied,
            });
        }
        projected
    }
}
