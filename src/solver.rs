use crate::classification::Section;
use crate::error::Diagnostic;
use crate::hierarchy::{KeyTotal, StatementHierarchy};
use crate::projector::ProjectedValue;
use crate::schema::{EngineSettings, ProjectionMethod};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub total_equity: f64,
    /// Cash required by the accounting identity, before any floor.
    pub unclamped_cash: f64,
    /// Cash actually booked.
    pub cash: f64,
    /// Assets - (Liabilities + Equity).
    pub difference: f64,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancingReport {
    /// None when balancing was skipped for the period.
    pub check: Option<BalanceCheck>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Solves the cash plug so that Assets = Liabilities + Equity.
pub struct BalancingSolver<'a> {
    hierarchy: &'a StatementHierarchy,
    sections: &'a BTreeMap<String, Section>,
    cash_item: Option<&'a str>,
    settings: &'a EngineSettings,
}

impl<'a> BalancingSolver<'a> {
    pub fn new(
        hierarchy: &'a StatementHierarchy,
        sections: &'a BTreeMap<String, Section>,
        cash_item: Option<&'a str>,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            hierarchy,
            sections,
            cash_item,
            settings,
        }
    }

    /// Books cash into `values` and recomputes every total with cash included.
    ///
    /// `values` must already hold this period's projections and the preliminary
    /// totals (cash pending at 0). When a key total or the cash row is missing,
    /// the prior cash balance is carried and the period is reported unbalanced
    /// rather than failing.
    pub fn solve(
        &self,
        values: &mut BTreeMap<String, ProjectedValue>,
        prior: &BTreeMap<String, f64>,
    ) -> BalancingReport {
        let mut diagnostics = Vec::new();

        let Some(cash_name) = self.cash_item else {
            warn!("{}", Diagnostic::MissingPlug);
            diagnostics.push(Diagnostic::MissingPlug);
            self.hierarchy.apply_totals(values, prior);
            return BalancingReport {
                check: None,
                diagnostics,
            };
        };

        let key_names: Vec<Option<String>> = [KeyTotal::Assets, KeyTotal::Liabilities, KeyTotal::Equity]
            .into_iter()
            .map(|key| {
                let found = self.hierarchy.key_total(key).map(|t| t.name.clone());
                if found.is_none() {
                    let diagnostic = Diagnostic::MissingKeyTotal {
                        key: key.label().to_string(),
                    };
                    warn!("{}", diagnostic);
                    diagnostics.push(diagnostic);
                }
                found
            })
            .collect();

        let (Some(assets_name), Some(liabilities_name), Some(equity_name)) =
            (&key_names[0], &key_names[1], &key_names[2])
        else {
            let carried = prior.get(cash_name).copied().unwrap_or(0.0);
            values.insert(
                cash_name.to_string(),
                ProjectedValue {
                    value: carried,
                    method: ProjectionMethod::PendingBalance,
                    note: format!(
                        "Balancing skipped (key total missing); carried prior cash {:.2}",
                        carried
                    ),
                    is_balanced: Some(false),
                    diagnostics: diagnostics.clone(),
                },
            );
            self.hierarchy.apply_totals(values, prior);
            return BalancingReport {
                check: None,
                diagnostics,
            };
        };

        let total_liabilities = value_of(values, liabilities_name);
        let total_equity = value_of(values, equity_name);
        let non_cash_assets: f64 = self
            .sections
            .iter()
            .filter(|(name, section)| **section == Section::Asset && name.as_str() != cash_name)
            .map(|(name, _)| value_of(values, name))
            .sum();

        let unclamped_cash = (total_liabilities + total_equity) - non_cash_assets;
        let clamped = self.settings.clamp_negative_cash && unclamped_cash < 0.0;
        let cash = if clamped { 0.0 } else { unclamped_cash };

        debug!(
            "Cash plug: ({:.2} + {:.2}) - non-cash assets {:.2} = {:.2}",
            total_liabilities, total_equity, non_cash_assets, unclamped_cash
        );

        let mut note = format!(
            "({} {:.2} + {} {:.2}) - non-cash assets {:.2} = {:.2}",
            liabilities_name,
            total_liabilities,
            equity_name,
            total_equity,
            non_cash_assets,
            unclamped_cash
        );
        if clamped {
            note.push_str(" (floored at 0)");
        }
        values.insert(
            cash_name.to_string(),
            ProjectedValue::new(cash, ProjectionMethod::BalancingPlug, note),
        );

        self.hierarchy.apply_totals(values, prior);

        let check = self.balance_check(values, assets_name, liabilities_name, equity_name, unclamped_cash, cash);

        if clamped {
            diagnostics.push(Diagnostic::NegativeCashClamped {
                unclamped: unclamped_cash,
                imbalance: check.difference.abs(),
            });
        } else if !check.is_balanced {
            diagnostics.push(Diagnostic::OutOfBalance {
                assets: check.total_assets,
                liabilities_and_equity: check.total_liabilities + check.total_equity,
                difference: check.difference,
            });
        }
        for diagnostic in &diagnostics {
            warn!("{}", diagnostic);
        }

        if let Some(plug) = values.get_mut(cash_name) {
            plug.is_balanced = Some(check.is_balanced);
            plug.diagnostics.extend(diagnostics.iter().cloned());
        }

        BalancingReport {
            check: Some(check),
            diagnostics,
        }
    }

    fn balance_check(
        &self,
        values: &BTreeMap<String, ProjectedValue>,
        assets_name: &str,
        liabilities_name: &str,
        equity_name: &str,
        unclamped_cash: f64,
        cash: f64,
    ) -> BalanceCheck {
        let total_assets = value_of(values, assets_name);
        let total_liabilities = value_of(values, liabilities_name);
        let total_equity = value_of(values, equity_name);
        let difference = total_assets - (total_liabilities + total_equity);

        BalanceCheck {
            total_assets,
            total_liabilities,
            total_equity,
            unclamped_cash,
            cash,
            difference,
            is_balanced: difference.abs() < self.settings.balance_tolerance,
        }
    }
}

fn value_of(values: &BTreeMap<String, ProjectedValue>, name: &str) -> f64 {
    values.get(name).map(|v| v.value).unwrap_or(0.0)
}

/// Checks Assets = Liabilities + Equity on a set of balances (e.g. historical actuals).
pub fn verify_accounting_equation(
    hierarchy: &StatementHierarchy,
    balances: &BTreeMap<String, f64>,
    tolerance: f64,
) -> Option<Diagnostic> {
    let assets = balances.get(&hierarchy.key_total(KeyTotal::Assets)?.name)?;
    let liabilities = balances.get(&hierarchy.key_total(KeyTotal::Liabilities)?.name)?;
    let equity = balances.get(&hierarchy.key_total(KeyTotal::Equity)?.name)?;

    let difference = assets - (liabilities + equity);
    if difference.abs() > tolerance {
        Some(Diagnostic::OutOfBalance {
            assets: *assets,
            liabilities_and_equity: liabilities + equity,
            difference,
        })
    } else {
        None
    }
}
