use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use three_way_forecast::*;

const BALANCE_SHEET: &str = "\
Line Item,2024-11,2024-12
Assets,,
Current Assets,,
Cash,45000,50000
Accounts Receivable,140000,150000
Inventory,75000,80000
Prepaid Expenses,5000,6000
Total Current Assets,265000,286000
Non-Current Assets,,
Property Plant & Equipment,200000,210000
Security Deposits,10000,10000
Total Non-Current Assets,210000,220000
Total Assets,475000,506000
Liabilities,,
Accounts Payable,60000,65000
Accrued Expenses,15000,16000
Deferred Revenue,10000,12000
Total Current Liabilities,85000,93000
Long-Term Debt,120000,120000
Total Liabilities,205000,213000
Equity,,
Common Stock,100000,100000
Retained Earnings,170000,193000
Total Equity,270000,293000
Total Liabilities and Equity,475000,506000
";

const INCOME_STATEMENT: &str = "\
Line Item,2024-11,2024-12
Product Revenue,68000,70000
Service Revenue,29000,30000
Total Revenue,97000,100000
Cost of Goods Sold,54000,55000
Salaries,22000,22000
Rent,8000,8000
Total Expenses,30000,30000
Depreciation,1500,1500
Net Income,11500,12000
";

// Security Deposits is deliberately left unclassified.
const CLASSIFICATIONS: &str = "\
name,category,driver
Cash,cash,
Accounts Receivable,accounts_receivable,
Inventory,inventory,
Prepaid Expenses,prepaid_expenses,
Property Plant & Equipment,property_plant_equipment,
Accounts Payable,accounts_payable,
Accrued Expenses,accrued_expenses,
Deferred Revenue,deferred_revenue,
Long-Term Debt,long_term_debt,
Common Stock,common_stock,
Retained Earnings,retained_earnings,Net Income
";

#[derive(Debug, Deserialize)]
struct ClassificationRecord {
    name: String,
    category: Category,
    driver: Option<String>,
}

fn statement_rows(data: &str) -> anyhow::Result<Vec<StatementRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut fields = record.iter();
        let name = fields.next().unwrap_or_default().to_string();
        let values = fields
            .map(|field| {
                if field.is_empty() {
                    Ok(None)
                } else {
                    field.parse::<f64>().map(Some)
                }
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.push(StatementRow::new(name, values));
    }
    Ok(rows)
}

fn classifications(data: &str) -> anyhow::Result<Vec<Classification>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let mut out = Vec::new();
    for record in reader.deserialize() {
        let record: ClassificationRecord = record?;
        let mut classification = Classification::new(record.name, record.category);
        if let Some(driver) = record.driver {
            classification = classification.with_driver(driver);
        }
        out.push(classification);
    }
    Ok(out)
}

fn forecast_periods(count: usize) -> Vec<ForecastPeriod> {
    (0..count)
        .map(|i| {
            ForecastPeriod::new([
                ("Revenue", 100_000.0 + 2_000.0 * i as f64),
                ("Cost of Goods Sold", 55_000.0),
                ("Operating Expenses", 30_000.0),
                ("Depreciation", 1_500.0),
                ("Net Income", 12_000.0),
            ])
        })
        .collect()
}

fn config() -> anyhow::Result<ForecastConfig> {
    Ok(ForecastConfig {
        company_name: "Northwind Trading".to_string(),
        last_actual_period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        balance_sheet: statement_rows(BALANCE_SHEET)?,
        income_statement: statement_rows(INCOME_STATEMENT)?,
        classifications: classifications(CLASSIFICATIONS)?,
        periods: forecast_periods(6),
        assumptions: Assumptions {
            days_inventory_outstanding: 30.0,
            dividend_payout_pct: 25.0,
            ..Assumptions::default()
        },
        settings: EngineSettings::default(),
    })
}

#[test]
fn test_fixture_structure_is_resolved() -> anyhow::Result<()> {
    let engine = ForecastEngine::new(config()?)?;
    let hierarchy = engine.hierarchy();

    for total in &hierarchy.totals {
        assert!(total.validated, "{} did not validate", total.name);
    }
    assert_eq!(
        hierarchy.total("Total Assets").unwrap().children,
        vec!["Total Current Assets", "Total Non-Current Assets"]
    );
    assert_eq!(
        hierarchy.total("Total Liabilities and Equity").unwrap().children,
        vec!["Total Liabilities", "Total Equity"]
    );
    let roots: Vec<&str> = hierarchy.roots.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(roots, vec!["Total Assets", "Total Liabilities and Equity"]);
    assert_eq!(engine.sequencer().sections()["Security Deposits"], Section::Asset);
    Ok(())
}

#[test]
fn test_balance_identity_holds_every_period() -> anyhow::Result<()> {
    let run = run_forecast(&config()?)?;

    assert_eq!(run.periods.len(), 6);
    for period in &run.periods {
        let check = period.balance_check.as_ref().unwrap();
        assert!(check.unclamped_cash >= 0.0);
        assert!(check.is_balanced, "period {} out of balance", period.period_index);

        let assets = period.value("Total Assets").unwrap();
        let liabilities = period.value("Total Liabilities").unwrap();
        let equity = period.value("Total Equity").unwrap();
        assert!((assets - (liabilities + equity)).abs() < 1.0);
        assert!((period.value("Total Liabilities and Equity").unwrap() - assets).abs() < 1.0);
    }
    Ok(())
}

#[test]
fn test_hierarchy_sum_law_every_period() -> anyhow::Result<()> {
    let run = run_forecast(&config()?)?;

    for period in &run.periods {
        for total in run.hierarchy.totals.iter().filter(|t| t.validated) {
            let sum: f64 = total
                .children
                .iter()
                .map(|child| period.value(child).unwrap())
                .sum();
            assert_eq!(period.value(&total.name).unwrap(), sum, "{}", total.name);
        }
    }
    Ok(())
}

#[test]
fn test_cash_flow_reconciles_every_period() -> anyhow::Result<()> {
    let run = run_forecast(&config()?)?;

    let mut beginning = 50_000.0;
    for flow in &run.cash_flows {
        assert_eq!(flow.beginning_cash, beginning);
        let computed = flow.beginning_cash
            + flow.operating.total
            + flow.investing.total
            + flow.financing.total;
        assert!(
            (computed - flow.ending_cash).abs() < 1.0,
            "period {}: {:.2} vs {:.2}",
            flow.period_index,
            computed,
            flow.ending_cash
        );
        assert!(flow.reconciles);
        beginning = flow.ending_cash;
    }

    // 25% payout on 12,000 of net income
    let dividends = run.cash_flows[0]
        .financing
        .line_items
        .iter()
        .find(|l| l.label == "Dividends paid")
        .unwrap();
    assert!((dividends.amount + 3_000.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_clamped_cash_imbalance_equals_unclamped_cash() -> anyhow::Result<()> {
    let mut config = config()?;
    config.assumptions.days_sales_outstanding = 400.0;
    let run = run_forecast(&config)?;

    let check = run.periods[0].balance_check.as_ref().unwrap();
    assert!(check.unclamped_cash < 0.0);
    assert_eq!(check.cash, 0.0);
    assert_eq!(run.periods[0].value("Cash"), Some(0.0));
    assert!(!check.is_balanced);
    assert!((check.difference.abs() - check.unclamped_cash.abs()).abs() < 1e-6);

    assert!(run.periods[0]
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::NegativeCashClamped { .. })));
    assert!(!run.cash_flows[0].reconciles);
    Ok(())
}

#[test]
fn test_unclamped_policy_keeps_identity_with_negative_cash() -> anyhow::Result<()> {
    let mut config = config()?;
    config.assumptions.days_sales_outstanding = 400.0;
    config.settings.clamp_negative_cash = false;
    let run = run_forecast(&config)?;

    for (period, flow) in run.periods.iter().zip(&run.cash_flows) {
        assert!(period.balance_check.as_ref().unwrap().is_balanced);
        assert!(flow.reconciles);
    }
    assert!(run.periods[0].value("Cash").unwrap() < 0.0);
    Ok(())
}

#[test]
fn test_runs_are_idempotent() -> anyhow::Result<()> {
    let config = config()?;
    let first = run_forecast(&config)?;
    let second = run_forecast(&config)?;

    assert_eq!(
        serde_json::to_string(&first.periods)?,
        serde_json::to_string(&second.periods)?
    );
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_config_json_round_trip() -> anyhow::Result<()> {
    let config = config()?;
    let json = serde_json::to_string_pretty(&config)?;
    let restored = ForecastConfig::from_json(&json)?;

    assert_eq!(run_forecast(&config)?, run_forecast(&restored)?);
    Ok(())
}

#[test]
fn test_unclassified_item_is_projected_and_flagged() -> anyhow::Result<()> {
    let run = run_forecast(&config()?)?;
    let deposits = &run.periods[0].values["Security Deposits"];

    assert_eq!(deposits.method, ProjectionMethod::FallbackGrowth);
    assert!((deposits.value - 10_000.0 * (1.0 + 5.0 / 1200.0)).abs() < 1e-6);
    assert!(deposits.diagnostics.contains(&Diagnostic::Unclassified {
        item: "Security Deposits".to_string()
    }));
    Ok(())
}

#[test]
fn test_missing_driver_does_not_abort_the_run() -> anyhow::Result<()> {
    let mut config = config()?;
    for period in &mut config.periods {
        period.income_statement.remove("Net Income");
    }
    let run = run_forecast(&config)?;

    assert_eq!(run.periods.len(), 6);
    let retained = &run.periods[0].values["Retained Earnings"];
    assert_eq!(retained.value, 0.0);
    assert_eq!(retained.method, ProjectionMethod::NoPnlDriver);
    assert!(run.periods[0].diagnostics.contains(&Diagnostic::MissingDriver {
        item: "Retained Earnings".to_string(),
        driver: "Net Income".to_string(),
    }));
    // Receivables are unaffected
    assert!(run.periods[0].value("Accounts Receivable").unwrap() > 0.0);
    Ok(())
}

#[test]
fn test_missing_key_total_skips_balancing_only() -> anyhow::Result<()> {
    let mut config = config()?;
    config.balance_sheet.retain(|row| row.name != "Total Equity");
    let run = run_forecast(&config)?;

    for period in &run.periods {
        assert!(period.balance_check.is_none());
        assert!(period.diagnostics.contains(&Diagnostic::MissingKeyTotal {
            key: "Total Equity".to_string()
        }));
        assert_eq!(period.value("Cash"), Some(50_000.0));
    }
    assert!(run.periods[0].value("Accounts Receivable").unwrap() > 0.0);
    Ok(())
}

#[test]
fn test_sensitivity_cascade_into_total() -> anyhow::Result<()> {
    let engine = ForecastEngine::new(config()?)?;
    let request = SensitivityRequest {
        test_item: "Product Revenue".to_string(),
        min: 10.0,
        max: 20.0,
        step: 10.0,
        output_item: "Total Revenue".to_string(),
        target_period: 3,
    };
    let table = engine.sensitivity(&request)?;

    assert_eq!(table.mode, SensitivityMode::Cascade);
    let candidates: Vec<f64> = table.rows.iter().map(|r| r.candidate).collect();
    assert_eq!(candidates, vec![10.0, 20.0]);

    let product_at = |growth: f64| 70_000.0 * (1.0 + growth / 1200.0).powi(4);
    let increase = table.rows[1].output - table.rows[0].output;
    assert!((increase - (product_at(20.0) - product_at(10.0))).abs() < 1e-6);

    assert!(engine.config().assumptions.growth_overrides.is_empty());
    Ok(())
}

#[test]
fn test_sensitivity_unrelated_output_unchanged() -> anyhow::Result<()> {
    let engine = ForecastEngine::new(config()?)?;
    let request = SensitivityRequest {
        test_item: "Product Revenue".to_string(),
        min: 10.0,
        max: 20.0,
        step: 10.0,
        output_item: "Total Expenses".to_string(),
        target_period: 3,
    };
    let table = engine.sensitivity(&request)?;

    assert_eq!(table.mode, SensitivityMode::Independent);
    for row in &table.rows {
        assert_eq!(row.output, table.baseline_output);
        assert_eq!(row.pct_change, 0.0);
    }
    Ok(())
}

#[test]
fn test_scenario_changes_only_the_scenario_run() -> anyhow::Result<()> {
    let engine = ForecastEngine::new(config()?)?;
    let scenario: Scenario = serde_json::from_str(
        r#"{
            "name": "Higher capex",
            "modifications": [
                { "action": "scale_ratio", "ratio": "capex_pct_of_revenue", "factor": 2.0 }
            ]
        }"#,
    )?;

    let base = engine.run();
    let higher = engine.run_scenario(&scenario)?;

    let ppe = |run: &ForecastRun| run.periods[0].value("Property Plant & Equipment").unwrap();
    assert!((ppe(&higher) - ppe(&base) - 3_000.0).abs() < 1e-6);
    assert!(higher.cash_flows[0].investing.total < base.cash_flows[0].investing.total);
    for flow in &higher.cash_flows {
        assert!(flow.reconciles);
    }
    Ok(())
}

#[test]
fn test_cash_flow_export_to_csv() -> anyhow::Result<()> {
    let run = run_forecast(&config()?)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["period_end", "section", "line", "amount"])?;
    for flow in &run.cash_flows {
        for (section, lines) in [
            ("operating", &flow.operating),
            ("investing", &flow.investing),
            ("financing", &flow.financing),
        ] {
            for line in &lines.line_items {
                writer.write_record([
                    flow.period_end.to_string(),
                    section.to_string(),
                    line.label.clone(),
                    format!("{:.2}", line.amount),
                ])?;
            }
        }
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("csv writer: {}", e))?;

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        *totals.entry(record[0].to_string()).or_default() += record[3].parse::<f64>()?;
    }

    assert_eq!(totals.len(), 6);
    for flow in &run.cash_flows {
        let exported = totals[&flow.period_end.to_string()];
        // Rounded to cents per line
        assert!((exported - flow.net_change).abs() < 0.5);
    }
    Ok(())
}

#[test]
fn test_markdown_report() -> anyhow::Result<()> {
    let run = run_forecast(&config()?)?;
    let markdown = run.to_markdown();

    assert!(markdown.contains("# Forecast Reconciliation - Northwind Trading"));
    assert!(markdown.contains("**Total Assets**"));
    assert!(markdown.contains("| 2025-01-31 |"));
    assert!(markdown.contains("Capital expenditure (Property Plant & Equipment)"));
    assert!(markdown.contains("Security Deposits: no classification"));
    Ok(())
}

#[test]
fn test_schema_describes_the_configuration() -> anyhow::Result<()> {
    let schema = ForecastConfig::schema_as_json()?;
    assert!(schema.contains("last_actual_period_end"));
    assert!(schema.contains("clamp_negative_cash"));
    assert!(schema.contains("property_plant_equipment"));
    Ok(())
}
