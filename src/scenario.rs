use crate::error::Result;
use crate::schema::Assumptions;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named set of assumption changes, e.g. "Slow collections" or "Aggressive capex".
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Scenario {
    #[schemars(description = "Short name for the scenario")]
    pub name: String,

    #[schemars(description = "What the scenario represents (optional)")]
    #[serde(default)]
    pub description: Option<String>,

    #[schemars(description = "Ordered list of changes applied to the base assumptions")]
    #[serde(default)]
    pub modifications: Vec<AssumptionModification>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssumptionRatio {
    DaysSalesOutstanding,
    DaysPayableOutstanding,
    DaysInventoryOutstanding,
    DepreciationRatePct,
    CapexPctOfRevenue,
    DividendPayoutPct,
    AccruedExpensePct,
    PrepaidExpensePct,
    FallbackGrowthPct,
}

impl AssumptionRatio {
    fn slot(self, assumptions: &mut Assumptions) -> &mut f64 {
        match self {
            AssumptionRatio::DaysSalesOutstanding => &mut assumptions.days_sales_outstanding,
            AssumptionRatio::DaysPayableOutstanding => &mut assumptions.days_payable_outstanding,
            AssumptionRatio::DaysInventoryOutstanding => &mut assumptions.days_inventory_outstanding,
            AssumptionRatio::DepreciationRatePct => &mut assumptions.depreciation_rate_pct,
            AssumptionRatio::CapexPctOfRevenue => &mut assumptions.capex_pct_of_revenue,
            AssumptionRatio::DividendPayoutPct => &mut assumptions.dividend_payout_pct,
            AssumptionRatio::AccruedExpensePct => &mut assumptions.accrued_expense_pct,
            AssumptionRatio::PrepaidExpensePct => &mut assumptions.prepaid_expense_pct,
            AssumptionRatio::FallbackGrowthPct => &mut assumptions.fallback_growth_pct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AssumptionModification {
    /// Replace a ratio outright (e.g., DSO 45 -> 60).
    SetRatio {
        ratio: AssumptionRatio,
        value: f64,
    },

    /// Multiply a ratio by a factor (e.g., 1.1 for a 10% deterioration).
    ScaleRatio {
        ratio: AssumptionRatio,
        factor: f64,
    },

    /// Pin a line item's annual growth rate.
    SetGrowthOverride {
        #[schemars(description = "The exact line item name.")]
        target: String,
        #[schemars(description = "Annual growth rate in percent.")]
        growth_pct: f64,
    },

    /// Return a line item to the fallback growth rate.
    ClearGrowthOverride { target: String },
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with(mut self, modification: AssumptionModification) -> Self {
        self.modifications.push(modification);
        self
    }

    /// Applies the modifications in order to a copy of `base`. `base` is never changed.
    pub fn apply(&self, base: &Assumptions) -> Assumptions {
        let mut assumptions = base.clone();
        for modification in &self.modifications {
            debug!("Scenario '{}': {:?}", self.name, modification);
            apply_single_modification(&mut assumptions, modification);
        }
        assumptions
    }

    /// As [`Scenario::apply`], rejecting results outside the assumptions' valid domain.
    pub fn apply_validated(&self, base: &Assumptions) -> Result<Assumptions> {
        let assumptions = self.apply(base);
        assumptions.validate()?;
        Ok(assumptions)
    }
}

fn apply_single_modification(assumptions: &mut Assumptions, modification: &AssumptionModification) {
    match modification {
        AssumptionModification::SetRatio { ratio, value } => {
            *ratio.slot(assumptions) = *value;
        }
        AssumptionModification::ScaleRatio { ratio, factor } => {
            *ratio.slot(assumptions) *= factor;
        }
        AssumptionModification::SetGrowthOverride { target, growth_pct } => {
            assumptions
                .growth_overrides
                .insert(target.clone(), *growth_pct);
        }
        AssumptionModification::ClearGrowthOverride { target } => {
            assumptions.growth_overrides.remove(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;

    #[test]
    fn test_apply_leaves_base_untouched() {
        let base = Assumptions::default();
        let scenario = Scenario::new("Slow collections")
            .with(AssumptionModification::SetRatio {
                ratio: AssumptionRatio::DaysSalesOutstanding,
                value: 75.0,
            })
            .with(AssumptionModification::ScaleRatio {
                ratio: AssumptionRatio::CapexPctOfRevenue,
                factor: 2.0,
            });

        let applied = scenario.apply(&base);
        assert_eq!(applied.days_sales_outstanding, 75.0);
        assert_eq!(applied.capex_pct_of_revenue, 6.0);
        assert_eq!(base, Assumptions::default());
    }

    #[test]
    fn test_growth_overrides_apply_in_order() {
        let scenario = Scenario::new("Growth")
            .with(AssumptionModification::SetGrowthOverride {
                target: "Product Revenue".to_string(),
                growth_pct: 12.0,
            })
            .with(AssumptionModification::SetGrowthOverride {
                target: "Security Deposits".to_string(),
                growth_pct: 3.0,
            })
            .with(AssumptionModification::ClearGrowthOverride {
                target: "Security Deposits".to_string(),
            });

        let applied = scenario.apply(&Assumptions::default());
        assert_eq!(applied.growth_rate_for("Product Revenue"), 12.0);
        assert_eq!(applied.growth_rate_for("Security Deposits"), 5.0);
    }

    #[test]
    fn test_scenario_from_json() {
        let json = r#"{
            "name": "Dividends",
            "modifications": [
                { "action": "set_ratio", "ratio": "dividend_payout_pct", "value": 50.0 },
                { "action": "clear_growth_override", "target": "Rent" }
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.modifications.len(), 2);
        assert_eq!(scenario.apply(&Assumptions::default()).dividend_payout_pct, 50.0);
    }

    #[test]
    fn test_apply_validated_rejects_out_of_domain() {
        let scenario = Scenario::new("Bad").with(AssumptionModification::SetRatio {
            ratio: AssumptionRatio::DividendPayoutPct,
            value: 150.0,
        });
        assert!(matches!(
            scenario.apply_validated(&Assumptions::default()),
            Err(ForecastError::InvalidAssumption { .. })
        ));
    }
}
