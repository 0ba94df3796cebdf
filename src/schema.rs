use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StructuralRole {
    #[schemars(description = "A regular line item carrying its own values (e.g., 'Accounts Receivable')")]
    Detail,

    #[schemars(description = "A total or subtotal whose value is the sum of the line items above it")]
    Total,

    #[schemars(description = "A section heading with no values of its own (e.g., 'Current Assets')")]
    Subheader,
}

/// Raw, already-parsed statement row as delivered by the upload/parsing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatementRow {
    #[schemars(description = "The line item name exactly as it appears in the statement")]
    pub name: String,

    #[schemars(
        description = "Historical values in chronological order, one per period. Use null for blank cells."
    )]
    #[serde(default)]
    pub values: Vec<Option<f64>>,
}

impl StatementRow {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub name: String,
    pub actual_values: Vec<Option<f64>>,
    /// Inferred from the name and values; only trusted once the hierarchy validates it.
    pub role: StructuralRole,
}

impl LineItem {
    /// Most recent non-null actual value.
    pub fn latest_actual(&self) -> Option<f64> {
        self.actual_values.iter().rev().find_map(|v| *v)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[schemars(description = "Cash and cash equivalents. Never projected: solved as the balancing plug.")]
    Cash,
    #[schemars(description = "Trade receivables, projected from revenue and days sales outstanding")]
    AccountsReceivable,
    #[schemars(description = "Inventory, projected from cost of goods sold and days inventory outstanding")]
    Inventory,
    #[schemars(description = "Trade payables, projected from operating expenses and days payable outstanding")]
    AccountsPayable,
    #[schemars(description = "Accrued expenses, projected as a percentage of an expense driver")]
    AccruedExpenses,
    #[schemars(description = "Prepaid expenses, projected as a percentage of revenue")]
    PrepaidExpenses,
    #[schemars(description = "Deferred revenue, projected as a fixed percentage of revenue")]
    DeferredRevenue,
    #[schemars(description = "Property, plant & equipment, rolled forward with capex and depreciation")]
    PropertyPlantEquipment,
    #[schemars(description = "Retained earnings, rolled forward with net income less dividends")]
    RetainedEarnings,
    #[schemars(description = "Share capital, carried forward unchanged")]
    CommonStock,
    #[schemars(description = "Short-term borrowings, carried forward unchanged")]
    ShortTermDebt,
    #[schemars(description = "Long-term borrowings, carried forward unchanged")]
    LongTermDebt,
    #[schemars(description = "Any other balance sheet item, grown at the fallback growth rate")]
    OtherAssetOrLiability,
    #[schemars(description = "A total or subtotal resolved from the statement hierarchy")]
    CalculatedTotal,
    #[schemars(description = "A section heading with no value")]
    Subheader,
}

impl Category {
    pub fn default_method(self) -> ProjectionMethod {
        match self {
            Category::Cash => ProjectionMethod::PendingBalance,
            Category::AccountsReceivable => ProjectionMethod::DaysSalesOutstanding,
            Category::Inventory => ProjectionMethod::DaysInventoryOutstanding,
            Category::AccountsPayable => ProjectionMethod::DaysPayableOutstanding,
            Category::AccruedExpenses => ProjectionMethod::PercentOfExpenses,
            Category::PrepaidExpenses => ProjectionMethod::PercentOfRevenue,
            Category::DeferredRevenue => ProjectionMethod::DeferredRevenuePolicy,
            Category::PropertyPlantEquipment => ProjectionMethod::CapexDepreciationRollForward,
            Category::RetainedEarnings => ProjectionMethod::RetainedEarningsRollForward,
            Category::CommonStock | Category::ShortTermDebt | Category::LongTermDebt => {
                ProjectionMethod::StaticValue
            }
            Category::OtherAssetOrLiability => ProjectionMethod::FallbackGrowth,
            Category::CalculatedTotal => ProjectionMethod::CalculatedTotal,
            Category::Subheader => ProjectionMethod::Subheader,
        }
    }

    pub fn is_structural(self) -> bool {
        matches!(self, Category::CalculatedTotal | Category::Subheader)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMethod {
    DaysSalesOutstanding,
    DaysInventoryOutstanding,
    DaysPayableOutstanding,
    PercentOfExpenses,
    PercentOfRevenue,
    DeferredRevenuePolicy,
    CapexDepreciationRollForward,
    RetainedEarningsRollForward,
    StaticValue,
    FallbackGrowth,
    /// Cash placeholder until the balancing solver runs.
    PendingBalance,
    /// Cash after the balancing solver has run.
    BalancingPlug,
    CalculatedTotal,
    Subheader,
    NoPnlDriver,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    #[schemars(description = "The balance sheet line item this classification applies to")]
    pub name: String,

    #[schemars(description = "Projection category of the line item")]
    pub category: Category,

    #[schemars(description = "The formula the classifier expects to be applied. The formula used always follows the category; a different method here is reported as a diagnostic.")]
    pub method: ProjectionMethod,

    #[serde(default)]
    #[schemars(
        description = "Name of the income statement line item feeding the formula. Leave null to use the category default (revenue, cost of goods sold, operating expenses, net income)."
    )]
    pub driver: Option<String>,

    #[serde(default = "default_confidence")]
    #[schemars(description = "Classifier confidence between 0.0 and 1.0")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Classification {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            method: category.default_method(),
            driver: None,
            confidence: 1.0,
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Driver ratios for a run. Percentages are expressed in percent units (30.0 = 30%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Assumptions {
    #[schemars(description = "Average days to collect receivables")]
    pub days_sales_outstanding: f64,

    #[schemars(description = "Average days to pay suppliers")]
    pub days_payable_outstanding: f64,

    #[schemars(description = "Average days inventory is held")]
    pub days_inventory_outstanding: f64,

    #[schemars(description = "Annual depreciation rate applied to PP&E when the income statement has no depreciation line (percent)")]
    pub depreciation_rate_pct: f64,

    #[schemars(description = "Capital expenditure as a percentage of annualized revenue")]
    pub capex_pct_of_revenue: f64,

    #[schemars(description = "Share of net income paid out as dividends (percent)")]
    pub dividend_payout_pct: f64,

    #[schemars(description = "Accrued expenses as a percentage of the monthly expense driver")]
    pub accrued_expense_pct: f64,

    #[schemars(description = "Prepaid expenses as a percentage of monthly revenue")]
    pub prepaid_expense_pct: f64,

    #[schemars(description = "Annual growth rate for unclassified items (percent)")]
    pub fallback_growth_pct: f64,

    #[schemars(description = "Per line item annual growth rate overrides (percent), keyed by line item name")]
    pub growth_overrides: BTreeMap<String, f64>,
}

impl Default for Assumptions {
    fn default() -> Self {
        Self {
            days_sales_outstanding: 45.0,
            days_payable_outstanding: 30.0,
            days_inventory_outstanding: 60.0,
            depreciation_rate_pct: 10.0,
            capex_pct_of_revenue: 3.0,
            dividend_payout_pct: 0.0,
            accrued_expense_pct: 5.0,
            prepaid_expense_pct: 2.0,
            fallback_growth_pct: 5.0,
            growth_overrides: BTreeMap::new(),
        }
    }
}

impl Assumptions {
    /// Annual growth rate (percent) for a line item: its override, else the fallback.
    pub fn growth_rate_for(&self, name: &str) -> f64 {
        self.growth_overrides
            .get(name)
            .copied()
            .unwrap_or(self.fallback_growth_pct)
    }

    /// Returns a copy with the growth override for `name` set to `growth_pct`.
    pub fn with_growth_override(&self, name: &str, growth_pct: f64) -> Self {
        let mut next = self.clone();
        next.growth_overrides.insert(name.to_string(), growth_pct);
        next
    }

    pub fn validate(&self) -> Result<()> {
        let days = [
            ("days_sales_outstanding", self.days_sales_outstanding),
            ("days_payable_outstanding", self.days_payable_outstanding),
            ("days_inventory_outstanding", self.days_inventory_outstanding),
        ];
        for (name, value) in days {
            if !value.is_finite() || value < 0.0 {
                return Err(ForecastError::InvalidAssumption {
                    name: name.to_string(),
                    value,
                    details: "day counts must be finite and non-negative".to_string(),
                });
            }
        }

        let percentages = [
            ("depreciation_rate_pct", self.depreciation_rate_pct),
            ("capex_pct_of_revenue", self.capex_pct_of_revenue),
            ("dividend_payout_pct", self.dividend_payout_pct),
            ("accrued_expense_pct", self.accrued_expense_pct),
            ("prepaid_expense_pct", self.prepaid_expense_pct),
        ];
        for (name, value) in percentages {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ForecastError::InvalidAssumption {
                    name: name.to_string(),
                    value,
                    details: "must be a percentage between 0 and 100".to_string(),
                });
            }
        }

        let growth = std::iter::once(("fallback_growth_pct".to_string(), self.fallback_growth_pct))
            .chain(
                self.growth_overrides
                    .iter()
                    .map(|(item, v)| (format!("growth_overrides[{}]", item), *v)),
            );
        for (name, value) in growth {
            if !value.is_finite() || value <= -1200.0 {
                return Err(ForecastError::InvalidAssumption {
                    name,
                    value,
                    details: "growth must be finite and above -1200% per year".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Thresholds and policies that govern validation, balancing and reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineSettings {
    #[schemars(description = "Maximum relative difference between a total and the sum of its children for the total to validate (0.05 = 5%)")]
    pub validation_threshold: f64,

    #[schemars(description = "Absolute tolerance for Assets = Liabilities + Equity")]
    pub balance_tolerance: f64,

    #[schemars(description = "Absolute tolerance between cash-flow ending cash and balance sheet cash")]
    pub reconciliation_tolerance: f64,

    #[schemars(description = "Floor the solved cash balance at zero. Flooring can leave the balance sheet out of balance.")]
    pub clamp_negative_cash: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            validation_threshold: 0.05,
            balance_tolerance: 1.0,
            reconciliation_tolerance: 1.0,
            clamp_negative_cash: true,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        let settings = [
            ("validation_threshold", self.validation_threshold),
            ("balance_tolerance", self.balance_tolerance),
            ("reconciliation_tolerance", self.reconciliation_tolerance),
        ];
        for (name, value) in settings {
            if !value.is_finite() || value <= 0.0 {
                return Err(ForecastError::InvalidSetting {
                    name: name.to_string(),
                    value,
                    details: "must be finite and positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Externally forecasted income statement for one period.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ForecastPeriod {
    #[schemars(description = "Monthly income statement values keyed by line item name (e.g., 'Revenue', 'Net Income')")]
    pub income_statement: BTreeMap<String, f64>,
}

impl ForecastPeriod {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            income_statement: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ForecastConfig {
    #[schemars(description = "The legal name of the company being forecast")]
    pub company_name: String,

    #[schemars(description = "Month-end date of the last historical period (YYYY-MM-DD). Forecast periods follow monthly from here.")]
    pub last_actual_period_end: NaiveDate,

    #[schemars(description = "Balance sheet rows in statement order, including totals and section headings")]
    pub balance_sheet: Vec<StatementRow>,

    #[serde(default)]
    #[schemars(description = "Income statement rows in statement order (used by sensitivity analysis)")]
    pub income_statement: Vec<StatementRow>,

    #[schemars(description = "Pre-resolved classification for each balance sheet line item")]
    pub classifications: Vec<Classification>,

    #[schemars(description = "Forecast periods in chronological order")]
    pub periods: Vec<ForecastPeriod>,

    #[serde(default)]
    pub assumptions: Assumptions,

    #[serde(default)]
    pub settings: EngineSettings,
}

impl ForecastConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ForecastConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn validate(&self) -> Result<()> {
        self.assumptions.validate()?;
        self.settings.validate()?;
        crate::ingestion::Statement::from_rows("balance sheet", &self.balance_sheet)?;
        crate::ingestion::Statement::from_rows("income statement", &self.income_statement)?;
        Ok(())
    }
}
