//! Per-category projection formulas for balance sheet line items.
//!
//! Every category maps to exactly one [`ProjectionRule`]. Rules are pure: they
//! read the driver value for the period, the assumptions and the item's prior
//! balance, and return a value with a note describing the arithmetic.

use crate::error::Diagnostic;
use crate::schema::{Assumptions, Category, Classification, ProjectionMethod};
use crate::utils::{is_depreciation_name, name_words, normalize_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deferred revenue policy: share of monthly revenue held as deferred revenue (percent).
pub const DEFERRED_REVENUE_PCT: f64 = 8.0;

const DAYS_PER_YEAR: f64 = 365.0;
const MONTHS_PER_YEAR: f64 = 12.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedValue {
    pub value: f64,
    pub method: ProjectionMethod,
    pub note: String,
    /// Only set on the balancing plug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_balanced: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl ProjectedValue {
    pub fn new(value: f64, method: ProjectionMethod, note: String) -> Self {
        Self {
            value,
            method,
            note,
            is_balanced: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Income statement lines a formula can be driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Revenue,
    CostOfGoodsSold,
    OperatingExpenses,
    NetIncome,
    Depreciation,
}

impl DriverKind {
    pub fn label(self) -> &'static str {
        match self {
            DriverKind::Revenue => "revenue",
            DriverKind::CostOfGoodsSold => "cost of goods sold",
            DriverKind::OperatingExpenses => "operating expenses",
            DriverKind::NetIncome => "net income",
            DriverKind::Depreciation => "depreciation",
        }
    }

    fn preferred_names(self) -> &'static [&'static str] {
        match self {
            DriverKind::Revenue => &[
                "total revenue",
                "revenue",
                "net revenue",
                "revenues",
                "total sales",
                "net sales",
                "sales",
                "turnover",
            ],
            DriverKind::CostOfGoodsSold => &[
                "cost of goods sold",
                "cost of sales",
                "cogs",
                "cost of revenue",
                "total cost of sales",
            ],
            DriverKind::OperatingExpenses => &[
                "operating expenses",
                "total operating expenses",
                "opex",
                "total expenses",
                "expenses",
            ],
            DriverKind::NetIncome => &[
                "net income",
                "net profit",
                "net earnings",
                "net profit after tax",
                "profit for the period",
            ],
            DriverKind::Depreciation => &[
                "depreciation",
                "depreciation and amortization",
                "depreciation amortization",
                "depreciation and amortisation",
            ],
        }
    }

    fn loosely_matches(self, name: &str) -> bool {
        let words = name_words(name);
        let has = |w: &str| words.iter().any(|x| x == w);
        let starts = |p: &str| words.iter().any(|x| x.starts_with(p));
        match self {
            DriverKind::Revenue => {
                (starts("revenue") || has("sales")) && !has("cost") && !has("deferred")
            }
            DriverKind::CostOfGoodsSold => {
                has("cost") && (has("goods") || has("sales") || has("revenue"))
            }
            DriverKind::OperatingExpenses => has("operating") && starts("expense"),
            DriverKind::NetIncome => {
                has("net")
                    && (has("income") || has("profit") || has("earnings"))
                    && !has("before")
            }
            DriverKind::Depreciation => is_depreciation_name(name),
        }
    }

    /// Finds this driver in a period's income statement by name: known names first, then patterns.
    pub fn find<'a>(self, income_statement: &'a BTreeMap<String, f64>) -> Option<(&'a str, f64)> {
        for preferred in self.preferred_names() {
            if let Some((name, value)) = income_statement
                .iter()
                .find(|(name, _)| normalize_name(name) == *preferred)
            {
                return Some((name.as_str(), *value));
            }
        }
        income_statement
            .iter()
            .find(|(name, _)| self.loosely_matches(name))
            .map(|(name, value)| (name.as_str(), *value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverLookup {
    Found { name: String, value: f64 },
    Missing { wanted: String },
}

/// Looks up an explicitly named driver, or the category default by pattern.
pub fn resolve_driver(
    explicit: Option<&str>,
    default_kind: DriverKind,
    income_statement: &BTreeMap<String, f64>,
) -> DriverLookup {
    match explicit {
        Some(name) => match income_statement.get(name) {
            Some(value) => DriverLookup::Found {
                name: name.to_string(),
                value: *value,
            },
            None => DriverLookup::Missing {
                wanted: name.to_string(),
            },
        },
        None => match default_kind.find(income_statement) {
            Some((name, value)) => DriverLookup::Found {
                name: name.to_string(),
                value,
            },
            None => DriverLookup::Missing {
                wanted: default_kind.label().to_string(),
            },
        },
    }
}

/// Dividends declared on a period's net income. A loss gives a negative amount.
pub fn dividends_for(net_income: f64, assumptions: &Assumptions) -> f64 {
    net_income * assumptions.dividend_payout_pct / 100.0
}

/// Monthly depreciation: the income statement line if present, else the annual rate on the prior balance.
pub fn monthly_depreciation(
    income_statement: &BTreeMap<String, f64>,
    prior_ppe: f64,
    assumptions: &Assumptions,
) -> (f64, String) {
    match DriverKind::Depreciation.find(income_statement) {
        Some((name, value)) => (value.abs(), format!("{} from income statement", name)),
        None => (
            prior_ppe * assumptions.depreciation_rate_pct / 100.0 / MONTHS_PER_YEAR,
            format!(
                "{:.2} x {}% / 12",
                prior_ppe, assumptions.depreciation_rate_pct
            ),
        ),
    }
}

pub struct ProjectionContext<'a> {
    pub item_name: &'a str,
    pub classification: &'a Classification,
    pub income_statement: &'a BTreeMap<String, f64>,
    pub assumptions: &'a Assumptions,
    pub prior: Option<f64>,
}

impl ProjectionContext<'_> {
    fn driver(&self, default_kind: DriverKind) -> DriverLookup {
        resolve_driver(
            self.classification.driver.as_deref(),
            default_kind,
            self.income_statement,
        )
    }

    fn prior_or_zero(&self) -> f64 {
        self.prior.unwrap_or(0.0)
    }

    fn missing_driver(&self, wanted: String) -> ProjectedValue {
        ProjectedValue::new(
            0.0,
            ProjectionMethod::NoPnlDriver,
            format!(
                "No income statement driver '{}' for {}; projected as 0",
                wanted, self.item_name
            ),
        )
        .with_diagnostic(Diagnostic::MissingDriver {
            item: self.item_name.to_string(),
            driver: wanted,
        })
    }

    fn floored(&self, raw: f64, method: ProjectionMethod, note: String) -> ProjectedValue {
        if raw < 0.0 {
            ProjectedValue::new(0.0, method, format!("{} (floored at 0)", note)).with_diagnostic(
                Diagnostic::NegativeValueFloored {
                    item: self.item_name.to_string(),
                    raw_value: raw,
                },
            )
        } else {
            ProjectedValue::new(raw, method, note)
        }
    }
}

pub trait ProjectionRule: Sync {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue;
}

fn days_outstanding(
    ctx: &ProjectionContext<'_>,
    default_kind: DriverKind,
    days: f64,
    days_label: &str,
    method: ProjectionMethod,
) -> ProjectedValue {
    match ctx.driver(default_kind) {
        DriverLookup::Missing { wanted } => ctx.missing_driver(wanted),
        DriverLookup::Found { name, value } => {
            let raw = (value * MONTHS_PER_YEAR / DAYS_PER_YEAR) * days;
            ctx.floored(
                raw,
                method,
                format!(
                    "({} {:.2} x 12 / 365) x {} days {} = {:.2}",
                    name, value, days, days_label, raw
                ),
            )
        }
    }
}

fn percent_of_driver(
    ctx: &ProjectionContext<'_>,
    default_kind: DriverKind,
    pct: f64,
    method: ProjectionMethod,
) -> ProjectedValue {
    match ctx.driver(default_kind) {
        DriverLookup::Missing { wanted } => ctx.missing_driver(wanted),
        DriverLookup::Found { name, value } => {
            let projected = value * pct / 100.0;
            ProjectedValue::new(
                projected,
                method,
                format!("{} {:.2} x {}% = {:.2}", name, value, pct, projected),
            )
        }
    }
}

pub struct ReceivablesRule;

impl ProjectionRule for ReceivablesRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        days_outstanding(
            ctx,
            DriverKind::Revenue,
            ctx.assumptions.days_sales_outstanding,
            "DSO",
            ProjectionMethod::DaysSalesOutstanding,
        )
    }
}

pub struct InventoryRule;

impl ProjectionRule for InventoryRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        days_outstanding(
            ctx,
            DriverKind::CostOfGoodsSold,
            ctx.assumptions.days_inventory_outstanding,
            "DIO",
            ProjectionMethod::DaysInventoryOutstanding,
        )
    }
}

pub struct PayablesRule;

impl ProjectionRule for PayablesRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        days_outstanding(
            ctx,
            DriverKind::OperatingExpenses,
            ctx.assumptions.days_payable_outstanding,
            "DPO",
            ProjectionMethod::DaysPayableOutstanding,
        )
    }
}

pub struct AccruedExpensesRule;

impl ProjectionRule for AccruedExpensesRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        percent_of_driver(
            ctx,
            DriverKind::OperatingExpenses,
            ctx.assumptions.accrued_expense_pct,
            ProjectionMethod::PercentOfExpenses,
        )
    }
}

pub struct PrepaidExpensesRule;

impl ProjectionRule for PrepaidExpensesRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        percent_of_driver(
            ctx,
            DriverKind::Revenue,
            ctx.assumptions.prepaid_expense_pct,
            ProjectionMethod::PercentOfRevenue,
        )
    }
}

pub struct DeferredRevenueRule;

impl ProjectionRule for DeferredRevenueRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        percent_of_driver(
            ctx,
            DriverKind::Revenue,
            DEFERRED_REVENUE_PCT,
            ProjectionMethod::DeferredRevenuePolicy,
        )
    }
}

pub struct PropertyPlantEquipmentRule;

impl ProjectionRule for PropertyPlantEquipmentRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        let (revenue_name, monthly_revenue) = match ctx.driver(DriverKind::Revenue) {
            DriverLookup::Missing { wanted } => return ctx.missing_driver(wanted),
            DriverLookup::Found { name, value } => (name, value),
        };

        let prior = ctx.prior_or_zero();
        let annualized_revenue = monthly_revenue * MONTHS_PER_YEAR;
        let capex = annualized_revenue * ctx.assumptions.capex_pct_of_revenue / 100.0 / MONTHS_PER_YEAR;
        let (depreciation, depreciation_source) =
            monthly_depreciation(ctx.income_statement, prior, ctx.assumptions);
        let raw = prior + capex - depreciation;

        ctx.floored(
            raw,
            ProjectionMethod::CapexDepreciationRollForward,
            format!(
                "Prior {:.2} + capex {:.2} ({} {:.2} x 12 x {}% / 12) - depreciation {:.2} ({}) = {:.2}",
                prior,
                capex,
                revenue_name,
                monthly_revenue,
                ctx.assumptions.capex_pct_of_revenue,
                depreciation,
                depreciation_source,
                raw
            ),
        )
    }
}

pub struct RetainedEarningsRule;

impl ProjectionRule for RetainedEarningsRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        match ctx.driver(DriverKind::NetIncome) {
            DriverLookup::Missing { wanted } => ctx.missing_driver(wanted),
            DriverLookup::Found { name, value } => {
                let prior = ctx.prior_or_zero();
                let dividends = dividends_for(value, ctx.assumptions);
                let projected = prior + value - dividends;
                ProjectedValue::new(
                    projected,
                    ProjectionMethod::RetainedEarningsRollForward,
                    format!(
                        "Prior {:.2} + {} {:.2} - dividends {:.2} ({}% payout) = {:.2}",
                        prior,
                        name,
                        value,
                        dividends,
                        ctx.assumptions.dividend_payout_pct,
                        projected
                    ),
                )
            }
        }
    }
}

pub struct StaticValueRule;

impl ProjectionRule for StaticValueRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        match ctx.prior {
            Some(prior) => ProjectedValue::new(
                prior,
                ProjectionMethod::StaticValue,
                format!("Carried forward unchanged at {:.2}", prior),
            ),
            None => ProjectedValue::new(
                0.0,
                ProjectionMethod::StaticValue,
                "No prior balance to carry forward; 0".to_string(),
            ),
        }
    }
}

pub struct FallbackGrowthRule;

impl ProjectionRule for FallbackGrowthRule {
    fn project(&self, ctx: &ProjectionContext<'_>) -> ProjectedValue {
        let prior = ctx.prior_or_zero();
        let annual_growth = ctx.assumptions.growth_rate_for(ctx.item_name);
        let projected = prior * (1.0 + annual_growth / 100.0 / MONTHS_PER_YEAR);
        ProjectedValue::new(
            projected,
            ProjectionMethod::FallbackGrowth,
            format!(
                "Prior {:.2} x (1 + {}% / 12) = {:.2}",
                prior, annual_growth, projected
            ),
        )
    }
}

pub struct CashPlaceholderRule;

impl ProjectionRule for CashPlaceholderRule {
    fn project(&self, _ctx: &ProjectionContext<'_>) -> ProjectedValue {
        ProjectedValue::new(
            0.0,
            ProjectionMethod::PendingBalance,
            "Pending: solved by the balancing step".to_string(),
        )
    }
}

pub struct TotalPlaceholderRule;

impl ProjectionRule for TotalPlaceholderRule {
    fn project(&self, _ctx: &ProjectionContext<'_>) -> ProjectedValue {
        ProjectedValue::new(
            0.0,
            ProjectionMethod::CalculatedTotal,
            "Pending: resolved from the statement hierarchy".to_string(),
        )
    }
}

pub struct SubheaderRule;

impl ProjectionRule for SubheaderRule {
    fn project(&self, _ctx: &ProjectionContext<'_>) -> ProjectedValue {
        ProjectedValue::new(0.0, ProjectionMethod::Subheader, "Section heading".to_string())
    }
}

pub fn rule_for(category: Category) -> &'static dyn ProjectionRule {
    match category {
        Category::Cash => &CashPlaceholderRule,
        Category::AccountsReceivable => &ReceivablesRule,
        Category::Inventory => &InventoryRule,
        Category::AccountsPayable => &PayablesRule,
        Category::AccruedExpenses => &AccruedExpensesRule,
        Category::PrepaidExpenses => &PrepaidExpensesRule,
        Category::DeferredRevenue => &DeferredRevenueRule,
        Category::PropertyPlantEquipment => &PropertyPlantEquipmentRule,
        Category::RetainedEarnings => &RetainedEarningsRule,
        Category::CommonStock | Category::ShortTermDebt | Category::LongTermDebt => {
            &StaticValueRule
        }
        Category::OtherAssetOrLiability => &FallbackGrowthRule,
        Category::CalculatedTotal => &TotalPlaceholderRule,
        Category::Subheader => &SubheaderRule,
    }
}

/// Projects one line item for one period.
pub fn project(
    item_name: &str,
    classification: &Classification,
    income_statement: &BTreeMap<String, f64>,
    assumptions: &Assumptions,
    prior: Option<f64>,
) -> ProjectedValue {
    let ctx = ProjectionContext {
        item_name,
        classification,
        income_statement,
        assumptions,
        prior,
    };
    rule_for(classification.category).project(&ctx)
}
