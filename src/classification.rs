use crate::hierarchy::{KeyTotal, StatementHierarchy};
use crate::ingestion::Statement;
use crate::schema::{Category, Classification, LineItem, StructuralRole};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Asset,
    Liability,
    Equity,
}

impl Category {
    /// The balance sheet side a category always belongs to, if it is fixed.
    pub fn natural_section(self) -> Option<Section> {
        match self {
            Category::Cash
            | Category::AccountsReceivable
            | Category::Inventory
            | Category::PrepaidExpenses
            | Category::PropertyPlantEquipment => Some(Section::Asset),
            Category::AccountsPayable
            | Category::AccruedExpenses
            | Category::DeferredRevenue
            | Category::ShortTermDebt
            | Category::LongTermDebt => Some(Section::Liability),
            Category::RetainedEarnings | Category::CommonStock => Some(Section::Equity),
            Category::OtherAssetOrLiability | Category::CalculatedTotal | Category::Subheader => {
                None
            }
        }
    }
}

/// Read-only map from line item name to its pre-resolved classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationStore {
    entries: BTreeMap<String, Classification>,
}

impl ClassificationStore {
    /// The first classification for a name wins.
    pub fn new(classifications: &[Classification]) -> Self {
        let mut entries = BTreeMap::new();
        for classification in classifications {
            if entries.contains_key(&classification.name) {
                debug!(
                    "Ignoring repeated classification for '{}'",
                    classification.name
                );
                continue;
            }
            entries.insert(classification.name.clone(), classification.clone());
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Classification> {
        self.entries.get(name)
    }

    pub fn category_of(&self, name: &str) -> Option<Category> {
        self.entries.get(name).map(|c| c.category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The balancing plug: the first detail row, in statement order, classified as cash.
    pub fn cash_item<'a>(&self, statement: &'a Statement) -> Option<&'a LineItem> {
        statement.items.iter().find(|item| {
            item.role == StructuralRole::Detail
                && self.category_of(&item.name) == Some(Category::Cash)
        })
    }

    /// Balance sheet side of every detail row.
    ///
    /// Categories with a fixed side use it. Unclassified rows and
    /// `other_asset_or_liability` rows take the side of the key total they sit under.
    pub fn resolve_sections(
        &self,
        statement: &Statement,
        hierarchy: &StatementHierarchy,
    ) -> BTreeMap<String, Section> {
        let positional: Vec<(Section, _)> = [
            (Section::Asset, KeyTotal::Assets),
            (Section::Liability, KeyTotal::Liabilities),
            (Section::Equity, KeyTotal::Equity),
        ]
        .into_iter()
        .filter_map(|(section, key)| {
            hierarchy
                .key_total(key)
                .map(|t| (section, hierarchy.descendants(&t.name)))
        })
        .collect();

        let mut sections = BTreeMap::new();
        for item in statement.details() {
            let natural = self
                .category_of(&item.name)
                .and_then(Category::natural_section);
            let section = natural.or_else(|| {
                positional
                    .iter()
                    .find(|(_, members)| members.contains(&item.name))
                    .map(|(section, _)| *section)
            });
            match section {
                Some(section) => {
                    sections.insert(item.name.clone(), section);
                }
                None => debug!("'{}' sits under no key total; side unknown", item.name),
            }
        }
        sections
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries.values().collect::<Vec<_>>())
    }
}
