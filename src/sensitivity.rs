//! What-if tables over a line item's growth-rate override.
//!
//! The cascade check is a naming heuristic, not a dependency-graph derivative:
//! an output whose name reads as an aggregate ("Total ...") is assumed to
//! contain a test item whose name does not, and moves by exactly the test
//! item's change. When the output's children were resolved, the test item must
//! also be one of its descendants. Every other output is independent of the
//! test item and keeps its baseline value, whatever the candidate. Treat
//! results as an approximation.
//!
//! Each candidate is evaluated against its own copy of the assumptions, so the
//! caller's assumptions are never touched and candidates run in parallel.

use crate::error::{ForecastError, Result};
use crate::hierarchy::StatementHierarchy;
use crate::ingestion::Statement;
use crate::projector;
use crate::schema::{Assumptions, Category, Classification, ForecastPeriod};
use crate::sequencer::PeriodSequencer;
use crate::utils::is_aggregate_name;
use chrono::NaiveDate;
use log::{debug, info};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound on the number of tested values in one request.
pub const MAX_SENSITIVITY_CANDIDATES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SensitivityRequest {
    #[schemars(description = "Line item whose annual growth-rate override is varied")]
    pub test_item: String,

    #[schemars(description = "First growth rate tested (percent per year)")]
    pub min: f64,

    #[schemars(description = "Last growth rate tested (percent per year), inclusive when reachable by whole steps")]
    pub max: f64,

    #[schemars(description = "Increment between tested growth rates (percent per year)")]
    pub step: f64,

    #[schemars(description = "Line item whose value is reported for each tested rate")]
    pub output_item: String,

    #[schemars(description = "Zero-based forecast period the output is read from")]
    pub target_period: usize,
}

impl SensitivityRequest {
    /// Tested values, built by index so that rounding does not accumulate.
    pub fn candidates(&self) -> Result<Vec<f64>> {
        let invalid = |details: &str| ForecastError::InvalidSensitivityRange {
            min: self.min,
            max: self.max,
            step: self.step,
            details: details.to_string(),
        };

        if !self.min.is_finite() || !self.max.is_finite() || !self.step.is_finite() {
            return Err(invalid("bounds and step must be finite"));
        }
        if self.step <= 0.0 {
            return Err(invalid("step must be positive"));
        }
        if self.min > self.max {
            return Err(invalid("min must not exceed max"));
        }

        let steps = ((self.max - self.min) / self.step + 1e-9).floor();
        if !steps.is_finite() || steps >= MAX_SENSITIVITY_CANDIDATES as f64 {
            return Err(invalid(&format!(
                "range yields more than {} candidates",
                MAX_SENSITIVITY_CANDIDATES
            )));
        }
        let count = (steps as usize)
            .checked_add(1)
            .ok_or_else(|| invalid("candidate count overflows"))?;
        Ok((0..count)
            .map(|i| self.min + i as f64 * self.step)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityMode {
    /// Output moves by the test item's change from baseline.
    Cascade,
    /// Output ignores the test item's perturbation and stays at baseline.
    Independent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRow {
    pub candidate: f64,
    pub output: f64,
    pub delta: f64,
    pub pct_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityTable {
    pub test_item: String,
    pub output_item: String,
    pub target_period: usize,
    pub mode: SensitivityMode,
    /// The test item's growth override before the analysis, if it had one.
    pub baseline_override: Option<f64>,
    pub baseline_test_value: f64,
    pub baseline_output: f64,
    pub rows: Vec<SensitivityRow>,
}

/// Read-only model context a sensitivity run evaluates against.
pub struct SensitivityEngine<'a> {
    balance_sheet: &'a PeriodSequencer,
    income_statement: &'a Statement,
    income_hierarchy: &'a StatementHierarchy,
    periods: &'a [ForecastPeriod],
    last_actual_period_end: NaiveDate,
}

impl<'a> SensitivityEngine<'a> {
    pub fn new(
        balance_sheet: &'a PeriodSequencer,
        income_statement: &'a Statement,
        income_hierarchy: &'a StatementHierarchy,
        periods: &'a [ForecastPeriod],
        last_actual_period_end: NaiveDate,
    ) -> Self {
        Self {
            balance_sheet,
            income_statement,
            income_hierarchy,
            periods,
            last_actual_period_end,
        }
    }

    /// Cascade when the output reads as an aggregate and the test item does not.
    /// If the output's children were resolved, the test item must also sit beneath it.
    pub fn mode_for(&self, test_item: &str, output_item: &str) -> SensitivityMode {
        if !is_aggregate_name(output_item) || is_aggregate_name(test_item) {
            return SensitivityMode::Independent;
        }

        let structure = [self.income_hierarchy, self.balance_sheet.hierarchy()]
            .into_iter()
            .find_map(|h| h.total(output_item).filter(|t| !t.children.is_empty()).map(|_| h));
        match structure {
            Some(h) if !h.descendants(output_item).contains(test_item) => SensitivityMode::Independent,
            _ => SensitivityMode::Cascade,
        }
    }

    pub fn run(&self, request: &SensitivityRequest, assumptions: &Assumptions) -> Result<SensitivityTable> {
        let candidates = request.candidates()?;
        for name in [&request.test_item, &request.output_item] {
            if !self.knows(name) {
                return Err(ForecastError::UnknownLineItem(name.clone()));
            }
        }
        if request.target_period >= self.periods.len() {
            return Err(ForecastError::PeriodOutOfRange {
                index: request.target_period,
                horizon: self.periods.len(),
            });
        }

        let mode = self.mode_for(&request.test_item, &request.output_item);
        info!(
            "Sensitivity of '{}' to '{}' growth: {} candidates, {:?} mode",
            request.output_item,
            request.test_item,
            candidates.len(),
            mode
        );

        let period = request.target_period;
        let baseline_test_value = self.value_at(&request.test_item, period, assumptions);
        let baseline_output = self.value_at(&request.output_item, period, assumptions);

        let rows: Vec<SensitivityRow> = candidates
            .par_iter()
            .map(|&candidate| {
                let output = match mode {
                    SensitivityMode::Cascade => {
                        let scenario = assumptions.with_growth_override(&request.test_item, candidate);
                        let test_value = self.value_at(&request.test_item, period, &scenario);
                        baseline_output + (test_value - baseline_test_value)
                    }
                    SensitivityMode::Independent => baseline_output,
                };
                let delta = output - baseline_output;
                let pct_change = if baseline_output.abs() > f64::EPSILON {
                    delta / baseline_output.abs() * 100.0
                } else {
                    0.0
                };
                debug!("  {:.4} -> {:.2} ({:+.2})", candidate, output, delta);
                SensitivityRow {
                    candidate,
                    output,
                    delta,
                    pct_change,
                }
            })
            .collect();

        Ok(SensitivityTable {
            test_item: request.test_item.clone(),
            output_item: request.output_item.clone(),
            target_period: period,
            mode,
            baseline_override: assumptions.growth_overrides.get(&request.test_item).copied(),
            baseline_test_value,
            baseline_output,
            rows,
        })
    }

    fn knows(&self, name: &str) -> bool {
        self.income_statement.get(name).is_some() || self.balance_sheet.statement().get(name).is_some()
    }

    /// Value of a line item at `period` under `assumptions`.
    ///
    /// Income statement details follow their growth rate from the last actual;
    /// income statement totals sum their children. Balance sheet rows run the
    /// full sequencer up to the period.
    pub fn value_at(&self, name: &str, period: usize, assumptions: &Assumptions) -> f64 {
        if self.income_statement.get(name).is_some() {
            return self.income_value_at(name, period, assumptions);
        }

        let horizon = (period + 1).min(self.periods.len());
        self.balance_sheet
            .run(self.last_actual_period_end, &self.periods[..horizon], assumptions)
            .last()
            .and_then(|result| result.value(name))
            .unwrap_or(0.0)
    }

    fn income_value_at(&self, name: &str, period: usize, assumptions: &Assumptions) -> f64 {
        if let Some(total) = self.income_hierarchy.total(name) {
            if !total.children.is_empty() {
                return total
                    .children
                    .iter()
                    .map(|child| self.income_value_at(child, period, assumptions))
                    .sum();
            }
        }

        let growth = Classification::new(name, Category::OtherAssetOrLiability);
        let mut value = self
            .income_statement
            .get(name)
            .and_then(|item| item.latest_actual())
            .unwrap_or(0.0);
        let no_drivers = BTreeMap::new();
        for _ in 0..=period {
            value = projector::project(name, &growth, &no_drivers, assumptions, Some(value)).value;
        }
        value
    }
}
