//! Reconstructs the total/subtotal structure of a flat, ordered statement.
//!
//! Statements arrive as a list of rows with no explicit parent links. The
//! structure is recovered from layout alone: a total sums the line items that
//! sit directly above it, back to the previous total or section heading. When
//! that strict span does not reproduce the total's own reported value, the scan
//! is allowed to absorb preceding totals (skipping over the rows those totals
//! already cover, and the heading of their section) and the longest candidate
//! that reproduces the reported value wins.

use crate::error::Diagnostic;
use crate::ingestion::Statement;
use crate::projector::ProjectedValue;
use crate::schema::{LineItem, ProjectionMethod, StructuralRole};
use crate::utils::{is_total_assets_name, is_total_equity_name, is_total_liabilities_name, is_total_name};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Classifies a row from its name and values.
pub fn detect_role(name: &str, values: &[Option<f64>]) -> StructuralRole {
    if is_total_name(name) {
        StructuralRole::Total
    } else if values.iter().all(|v| v.is_none()) {
        StructuralRole::Subheader
    } else {
        StructuralRole::Detail
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChildSpan {
    /// Only the detail rows between the total and the previous total or heading.
    Strict,
    /// The scan absorbed preceding totals.
    Extended,
    /// No children could be found.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyTotal {
    pub name: String,
    /// Children in statement order. Nested totals are kept by name, not flattened.
    pub children: Vec<String>,
    pub validated: bool,
    /// Sum of the children's most recent actuals.
    pub expected_value: f64,
    /// The total's own most recent actual.
    pub actual_value: Option<f64>,
    pub confidence_percent: f64,
    pub span: ChildSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    pub name: String,
    pub role: StructuralRole,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTotal {
    Assets,
    Liabilities,
    Equity,
}

impl KeyTotal {
    pub fn matches(self, name: &str) -> bool {
        match self {
            KeyTotal::Assets => is_total_assets_name(name),
            KeyTotal::Liabilities => is_total_liabilities_name(name),
            KeyTotal::Equity => is_total_equity_name(name),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KeyTotal::Assets => "Total Assets",
            KeyTotal::Liabilities => "Total Liabilities",
            KeyTotal::Equity => "Total Equity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementHierarchy {
    /// Totals in statement order; every nested total precedes its parent.
    pub totals: Vec<HierarchyTotal>,
    /// Roots are totals that are no other total's child.
    pub roots: Vec<TreeNode>,
    pub subheaders: Vec<String>,
}

/// One backward scan from a total: candidate children nearest-first, and for
/// each, the lowest row index the scan has covered after taking it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildScan {
    pub candidates: Vec<usize>,
    pub reach: Vec<usize>,
}

impl ChildScan {
    /// Length of the leading run of detail rows.
    pub fn strict_len(&self, items: &[LineItem]) -> usize {
        self.candidates
            .iter()
            .take_while(|&&i| items[i].role == StructuralRole::Detail)
            .count()
    }
}

/// Walks backward from the total at `index`.
///
/// Details are taken. A preceding total is taken by name and the scan resumes
/// above the rows it covers (`region_starts`), also stepping over the heading
/// directly above that region. Any other heading, or the start of the
/// statement, ends the scan.
pub fn scan_children(
    items: &[LineItem],
    index: usize,
    region_starts: &BTreeMap<usize, usize>,
) -> ChildScan {
    let mut candidates = Vec::new();
    let mut reach = Vec::new();
    let mut cursor = index.checked_sub(1);

    while let Some(pos) = cursor {
        match items[pos].role {
            StructuralRole::Detail => {
                candidates.push(pos);
                reach.push(pos);
                cursor = pos.checked_sub(1);
            }
            StructuralRole::Subheader => break,
            StructuralRole::Total => {
                let start = region_starts.get(&pos).copied().unwrap_or(pos);
                let mut lowest = start;
                let mut next = start.checked_sub(1);
                if let Some(heading) = next {
                    if items[heading].role == StructuralRole::Subheader {
                        lowest = heading;
                        next = heading.checked_sub(1);
                    }
                }
                candidates.push(pos);
                reach.push(lowest);
                cursor = next;
            }
        }
    }

    ChildScan { candidates, reach }
}

/// Relative difference between a children sum and a reported total.
pub fn relative_difference(expected: f64, actual: f64) -> f64 {
    if actual.abs() < f64::EPSILON {
        if expected.abs() < f64::EPSILON {
            0.0
        } else {
            1.0
        }
    } else {
        (expected - actual).abs() / actual.abs()
    }
}

impl StatementHierarchy {
    pub fn resolve(statement: &Statement, validation_threshold: f64) -> Self {
        let items = &statement.items;
        let mut region_starts: BTreeMap<usize, usize> = BTreeMap::new();
        // Value used when a row is summed as a child: detail actuals, or a nested total's children sum.
        let mut child_values: BTreeMap<usize, f64> = BTreeMap::new();
        let mut totals = Vec::new();

        for (index, item) in items.iter().enumerate() {
            match item.role {
                StructuralRole::Detail => {
                    child_values.insert(index, item.latest_actual().unwrap_or(0.0));
                    continue;
                }
                StructuralRole::Subheader => continue,
                StructuralRole::Total => {}
            }

            let scan = scan_children(items, index, &region_starts);
            let prefix_sums: Vec<f64> = scan
                .candidates
                .iter()
                .scan(0.0, |acc, i| {
                    *acc += child_values.get(i).copied().unwrap_or(0.0);
                    Some(*acc)
                })
                .collect();
            let strict_len = scan.strict_len(items);
            let actual = item.latest_actual();

            let validates = |len: usize| -> bool {
                match actual {
                    Some(a) if len > 0 => {
                        relative_difference(prefix_sums[len - 1], a) < validation_threshold
                    }
                    _ => false,
                }
            };

            let chosen_len = if strict_len > 0 && validates(strict_len) {
                strict_len
            } else if let Some(len) = (1..=scan.candidates.len()).rev().find(|&len| validates(len)) {
                len
            } else if strict_len > 0 {
                strict_len
            } else {
                scan.candidates.len()
            };

            let mut children_idx: Vec<usize> = scan.candidates[..chosen_len].to_vec();
            children_idx.reverse();
            let expected = if chosen_len > 0 {
                prefix_sums[chosen_len - 1]
            } else {
                0.0
            };

            let (validated, confidence) = match actual {
                Some(a) if chosen_len > 0 => {
                    let diff = relative_difference(expected, a);
                    (diff < validation_threshold, (1.0 - diff).max(0.0))
                }
                _ => (false, 0.0),
            };

            let span = if chosen_len == 0 {
                ChildSpan::Empty
            } else if chosen_len <= strict_len {
                ChildSpan::Strict
            } else {
                ChildSpan::Extended
            };

            debug!(
                "Total '{}': {} children ({:?}), expected {:.2}, actual {:?}, validated {}",
                item.name, chosen_len, span, expected, actual, validated
            );

            region_starts.insert(
                index,
                if chosen_len > 0 {
                    scan.reach[chosen_len - 1]
                } else {
                    index
                },
            );
            child_values.insert(
                index,
                if chosen_len > 0 {
                    expected
                } else {
                    actual.unwrap_or(0.0)
                },
            );

            totals.push(HierarchyTotal {
                name: item.name.clone(),
                children: children_idx.iter().map(|&i| items[i].name.clone()).collect(),
                validated,
                expected_value: expected,
                actual_value: actual,
                confidence_percent: confidence * 100.0,
                span,
            });
        }

        let roots = build_forest(items, &totals);
        let subheaders = items
            .iter()
            .filter(|i| i.role == StructuralRole::Subheader)
            .map(|i| i.name.clone())
            .collect();

        Self {
            totals,
            roots,
            subheaders,
        }
    }

    pub fn total(&self, name: &str) -> Option<&HierarchyTotal> {
        self.totals.iter().find(|t| t.name == name)
    }

    pub fn is_total(&self, name: &str) -> bool {
        self.total(name).is_some()
    }

    /// First total (in statement order) whose name matches the key pattern.
    pub fn key_total(&self, key: KeyTotal) -> Option<&HierarchyTotal> {
        self.totals.iter().find(|t| key.matches(&t.name))
    }

    /// All rows (details and nested totals) beneath a total.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(total) = self.total(&current) {
                for child in &total.children {
                    if out.insert(child.clone()) {
                        stack.push(child.clone());
                    }
                }
            }
        }
        out
    }

    /// Recomputes every total from its children's values for one period.
    ///
    /// Totals are processed in statement order, so nested totals are final
    /// before their parents read them. A total with no children carries its
    /// prior value forward.
    pub fn apply_totals(
        &self,
        values: &mut BTreeMap<String, ProjectedValue>,
        prior: &BTreeMap<String, f64>,
    ) {
        for total in &self.totals {
            let projected = if total.children.is_empty() {
                let carried = prior.get(&total.name).copied().unwrap_or(0.0);
                ProjectedValue::new(
                    carried,
                    ProjectionMethod::CalculatedTotal,
                    format!(
                        "No detectable children; carried forward prior value {:.2}",
                        carried
                    ),
                )
                .with_diagnostic(Diagnostic::UnresolvedTotal {
                    total: total.name.clone(),
                })
            } else {
                let parts: Vec<(String, f64)> = total
                    .children
                    .iter()
                    .map(|c| (c.clone(), values.get(c).map(|v| v.value).unwrap_or(0.0)))
                    .collect();
                let sum: f64 = parts.iter().map(|(_, v)| *v).sum();
                let terms = parts
                    .iter()
                    .map(|(n, v)| format!("{} ({:.2})", n, v))
                    .collect::<Vec<_>>()
                    .join(" + ");
                let caveat = if total.validated {
                    ""
                } else {
                    " [unvalidated structure, best-effort]"
                };
                ProjectedValue::new(
                    sum,
                    ProjectionMethod::CalculatedTotal,
                    format!("Sum of children: {} = {:.2}{}", terms, sum, caveat),
                )
            };
            values.insert(total.name.clone(), projected);
        }

        for heading in &self.subheaders {
            values.insert(
                heading.clone(),
                ProjectedValue::new(0.0, ProjectionMethod::Subheader, "Section heading".to_string()),
            );
        }
    }
}

fn build_forest(items: &[LineItem], totals: &[HierarchyTotal]) -> Vec<TreeNode> {
    let by_name: BTreeMap<&str, &HierarchyTotal> =
        totals.iter().map(|t| (t.name.as_str(), t)).collect();
    let claimed: BTreeSet<&str> = totals
        .iter()
        .flat_map(|t| t.children.iter().map(String::as_str))
        .collect();

    fn node(
        name: &str,
        items: &[LineItem],
        by_name: &BTreeMap<&str, &HierarchyTotal>,
    ) -> TreeNode {
        let role = items
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.role)
            .unwrap_or(StructuralRole::Detail);
        let children = by_name
            .get(name)
            .map(|t| {
                t.children
                    .iter()
                    .map(|c| node(c, items, by_name))
                    .collect()
            })
            .unwrap_or_default();
        TreeNode {
            name: name.to_string(),
            role,
            children,
        }
    }

    totals
        .iter()
        .filter(|t| !claimed.contains(t.name.as_str()))
        .map(|t| node(&t.name, items, &by_name))
        .collect()
}
