use crate::error::{ForecastError, Result};
use crate::hierarchy::detect_role;
use crate::schema::{LineItem, StatementRow, StructuralRole};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// An ordered statement (balance sheet or income statement) with detected structural roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Statement {
    pub name: String,
    pub items: Vec<LineItem>,
}

impl Statement {
    /// Builds a statement from parsed rows, preserving their order.
    ///
    /// Rows with blank names are dropped. Names must be unique within a statement.
    pub fn from_rows(statement_name: &str, rows: &[StatementRow]) -> Result<Self> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::with_capacity(rows.len());

        for row in rows {
            let name = row.name.trim();
            if name.is_empty() {
                continue;
            }

            if !seen.insert(name.to_string()) {
                return Err(ForecastError::DuplicateLineItem {
                    statement: statement_name.to_string(),
                    name: name.to_string(),
                });
            }

            items.push(LineItem {
                name: name.to_string(),
                actual_values: row.values.clone(),
                role: detect_role(name, &row.values),
            });
        }

        Ok(Self {
            name: statement_name.to_string(),
            items,
        })
    }

    pub fn get(&self, name: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn details(&self) -> impl Iterator<Item = &LineItem> {
        self.items
            .iter()
            .filter(|item| item.role == StructuralRole::Detail)
    }

    /// Most recent non-null actual of every item that has one.
    pub fn latest_actuals(&self) -> BTreeMap<String, f64> {
        self.items
            .iter()
            .filter_map(|item| item.latest_actual().map(|v| (item.name.clone(), v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_become_ordered_line_items() {
        let rows = vec![
            StatementRow::new("Current Assets", vec![None, None]),
            StatementRow::new("Cash", vec![Some(10.0), Some(12.0)]),
            StatementRow::new("  ", vec![Some(1.0)]),
            StatementRow::new("Accounts Receivable", vec![Some(5.0), None]),
            StatementRow::new("Total Current Assets", vec![Some(15.0), Some(12.0)]),
        ];

        let statement = Statement::from_rows("balance sheet", &rows).unwrap();
        let names: Vec<&str> = statement.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Current Assets", "Cash", "Accounts Receivable", "Total Current Assets"]
        );
        assert_eq!(statement.items[0].role, StructuralRole::Subheader);
        assert_eq!(statement.items[1].role, StructuralRole::Detail);
        assert_eq!(statement.items[3].role, StructuralRole::Total);

        let latest = statement.latest_actuals();
        assert_eq!(latest.get("Accounts Receivable"), Some(&5.0));
        assert_eq!(latest.get("Cash"), Some(&12.0));
        assert!(!latest.contains_key("Current Assets"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let rows = vec![
            StatementRow::new("Cash", vec![Some(1.0)]),
            StatementRow::new("Cash ", vec![Some(2.0)]),
        ];

        let err = Statement::from_rows("balance sheet", &rows).unwrap_err();
        assert!(matches!(err, ForecastError::DuplicateLineItem { .. }));
    }
}
