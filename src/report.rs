//! Markdown reconciliation summary, composed from a run's structured results.

use crate::cashflow::CashFlowSection;
use crate::hierarchy::TreeNode;
use crate::schema::StructuralRole;
use crate::ForecastRun;

pub fn to_markdown(run: &ForecastRun) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Forecast Reconciliation - {}\n\n", run.company_name));
    output.push_str(&format!("**Periods:** {}\n\n", run.periods.len()));

    output.push_str("## Statement Structure\n\n");
    for root in &run.hierarchy.roots {
        write_tree(&mut output, root, 0, run);
    }
    output.push('\n');

    output.push_str("## Balance Checks\n\n");
    output.push_str("| Period | Total Assets | Liabilities + Equity | Cash | Difference | Balanced |\n");
    output.push_str("|---|---:|---:|---:|---:|:---:|\n");
    for period in &run.periods {
        match &period.balance_check {
            Some(check) => {
                let clamp_marker = if check.cash != check.unclamped_cash {
                    format!(" (unclamped {:.2})", check.unclamped_cash)
                } else {
                    String::new()
                };
                output.push_str(&format!(
                    "| {} | {:.2} | {:.2} | {:.2}{} | {:.2} | {} |\n",
                    period.period_end,
                    check.total_assets,
                    check.total_liabilities + check.total_equity,
                    check.cash,
                    clamp_marker,
                    check.difference,
                    if check.is_balanced { "yes" } else { "**NO**" }
                ));
            }
            None => output.push_str(&format!(
                "| {} | - | - | - | - | skipped |\n",
                period.period_end
            )),
        }
    }
    output.push('\n');

    output.push_str("## Cash Flow\n\n");
    for flow in &run.cash_flows {
        output.push_str(&format!("### {}\n\n", flow.period_end));
        write_section(&mut output, "Operating", &flow.operating);
        write_section(&mut output, "Investing", &flow.investing);
        write_section(&mut output, "Financing", &flow.financing);
        output.push_str(&format!(
            "Beginning cash {:.2} + net change {:.2} = {:.2} vs balance sheet {:.2} (difference {:.2}) - {}\n\n",
            flow.beginning_cash,
            flow.net_change,
            flow.calculated_ending_cash,
            flow.ending_cash,
            flow.reconciliation_difference,
            if flow.reconciles { "reconciles" } else { "**DOES NOT RECONCILE**" }
        ));
    }

    let diagnostics = run.all_diagnostics();
    output.push_str("## Diagnostics\n\n");
    if diagnostics.is_empty() {
        output.push_str("None.\n");
    } else {
        for diagnostic in diagnostics {
            output.push_str(&format!("- {}\n", diagnostic));
        }
    }

    output
}

fn write_tree(output: &mut String, node: &TreeNode, depth: usize, run: &ForecastRun) {
    let marker = match run.hierarchy.total(&node.name) {
        Some(total) if !total.validated => format!(
            " *(unvalidated, {:.0}% confidence)*",
            total.confidence_percent
        ),
        _ => String::new(),
    };
    let name = if node.role == StructuralRole::Total {
        format!("**{}**", node.name)
    } else {
        node.name.clone()
    };
    output.push_str(&format!("{}- {}{}\n", "  ".repeat(depth), name, marker));
    for child in &node.children {
        write_tree(output, child, depth + 1, run);
    }
}

fn write_section(output: &mut String, title: &str, section: &CashFlowSection) {
    output.push_str(&format!("**{}**\n\n", title));
    for line in &section.line_items {
        output.push_str(&format!("- {}: {:.2}\n", line.label, line.amount));
    }
    output.push_str(&format!("- *Total {}*: {:.2}\n\n", title.to_lowercase(), section.total));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cashflow::CashFlowStatement;
    use crate::error::Diagnostic;
    use crate::hierarchy::{ChildSpan, HierarchyTotal, StatementHierarchy};
    use crate::sequencer::PeriodResult;
    use crate::solver::BalanceCheck;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn run() -> ForecastRun {
        let period_end = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let hierarchy = StatementHierarchy {
            totals: vec![HierarchyTotal {
                name: "Total Assets".to_string(),
                children: vec!["Cash".to_string()],
                validated: false,
                expected_value: 90.0,
                actual_value: Some(100.0),
                confidence_percent: 90.0,
                span: ChildSpan::Strict,
            }],
            roots: vec![TreeNode {
                name: "Total Assets".to_string(),
                role: StructuralRole::Total,
                children: vec![TreeNode {
                    name: "Cash".to_string(),
                    role: StructuralRole::Detail,
                    children: vec![],
                }],
            }],
            subheaders: vec![],
        };
        let clamped = Diagnostic::NegativeCashClamped {
            unclamped: -25.0,
            imbalance: 25.0,
        };
        ForecastRun {
            company_name: "Test Corp".to_string(),
            hierarchy,
            periods: vec![PeriodResult {
                period_index: 0,
                period_end,
                values: BTreeMap::new(),
                balance_check: Some(BalanceCheck {
                    total_assets: 100.0,
                    total_liabilities: 75.0,
                    total_equity: 50.0,
                    unclamped_cash: -25.0,
                    cash: 0.0,
                    difference: -25.0,
                    is_balanced: false,
                }),
                diagnostics: vec![clamped],
            }],
            cash_flows: vec![CashFlowStatement {
                period_index: 0,
                period_end,
                operating: CashFlowSection::default(),
                investing: CashFlowSection::default(),
                financing: CashFlowSection::default(),
                net_change: 0.0,
                beginning_cash: 10.0,
                ending_cash: 0.0,
                calculated_ending_cash: 10.0,
                reconciliation_difference: 10.0,
                reconciles: false,
                diagnostics: vec![],
            }],
            diagnostics: vec![],
        }
    }

    #[test]
    fn test_report_sections() {
        let markdown = to_markdown(&run());

        assert!(markdown.contains("# Forecast Reconciliation - Test Corp"));
        assert!(markdown.contains("- **Total Assets** *(unvalidated, 90% confidence)*"));
        assert!(markdown.contains("  - Cash"));
        assert!(markdown.contains("(unclamped -25.00)"));
        assert!(markdown.contains("**NO**"));
        assert!(markdown.contains("**DOES NOT RECONCILE**"));
        assert!(markdown.contains("floored at 0"));
    }
}
