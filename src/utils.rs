use chrono::{Datelike, Days, NaiveDate};

pub fn next_month_end(date: NaiveDate) -> NaiveDate {
    let year = if date.month() == 12 {
        date.year() + 1
    } else {
        date.year()
    };

    let month = if date.month() == 12 {
        1
    } else {
        date.month() + 1
    };

    last_day_of_month(year, month)
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .checked_sub_days(Days::new(1))
        .unwrap()
}

/// Month-end dates of `count` forecast periods following the last actual period.
pub fn forecast_period_ends(last_actual_period_end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut current = last_day_of_month(last_actual_period_end.year(), last_actual_period_end.month());
    for _ in 0..count {
        current = next_month_end(current);
        dates.push(current);
    }
    dates
}

/// Lowercases a line item name and splits it into alphanumeric words.
/// "Sub-Total: Current Assets" -> ["sub", "total", "current", "assets"]
pub fn name_words(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn normalize_name(name: &str) -> String {
    name_words(name).join(" ")
}

fn has_word_starting(words: &[String], prefix: &str) -> bool {
    words.iter().any(|w| w.starts_with(prefix))
}

fn has_word(words: &[String], word: &str) -> bool {
    words.iter().any(|w| w == word)
}

/// Total, subtotal and grand-total naming patterns.
pub fn is_total_name(name: &str) -> bool {
    let words = name_words(name);
    words
        .iter()
        .any(|w| w == "total" || w == "totals" || w == "subtotal")
}

/// Names that read as an aggregate of other line items (used by the sensitivity cascade check).
pub fn is_aggregate_name(name: &str) -> bool {
    if is_total_name(name) {
        return true;
    }
    let words = name_words(name);
    ["aggregate", "combined", "consolidated", "overall", "all"]
        .iter()
        .any(|w| has_word(&words, w))
}

const SUBSECTION_QUALIFIERS: [&str; 9] = [
    "current",
    "noncurrent",
    "fixed",
    "other",
    "intangible",
    "tangible",
    "long",
    "short",
    "operating",
];

fn has_qualifier(words: &[String]) -> bool {
    SUBSECTION_QUALIFIERS.iter().any(|q| has_word(words, q))
}

pub fn is_total_assets_name(name: &str) -> bool {
    let words = name_words(name);
    is_total_name(name)
        && has_word_starting(&words, "asset")
        && !has_word_starting(&words, "liabilit")
        && !has_word(&words, "equity")
        && !has_qualifier(&words)
}

pub fn is_total_liabilities_name(name: &str) -> bool {
    let words = name_words(name);
    is_total_name(name)
        && has_word_starting(&words, "liabilit")
        && !has_word(&words, "equity")
        && !has_word(&words, "capital")
        && !has_qualifier(&words)
}

pub fn is_total_equity_name(name: &str) -> bool {
    let words = name_words(name);
    let equity_words = has_word(&words, "equity")
        || (has_word_starting(&words, "shareholder") && has_word(&words, "funds"))
        || (has_word(&words, "net") && has_word(&words, "worth"));
    is_total_name(name) && equity_words && !has_word_starting(&words, "liabilit")
}

/// Short/long-term debt, loans, notes and bonds.
pub fn is_debt_name(name: &str) -> bool {
    let words = name_words(name);
    if has_word_starting(&words, "receivable") {
        return false;
    }
    ["debt", "loan", "loans", "note", "notes", "bond", "bonds", "borrowing", "borrowings"]
        .iter()
        .any(|w| has_word(&words, w))
}

pub fn is_depreciation_name(name: &str) -> bool {
    let words = name_words(name);
    has_word_starting(&words, "depreciation") || has_word_starting(&words, "amorti")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_month_end() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 31).unwrap();
        assert_eq!(next_month_end(date), NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());

        let date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert_eq!(next_month_end(date), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(
            last_day_of_month(2024, 2),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            last_day_of_month(2023, 4),
            NaiveDate::from_ymd_opt(2023, 4, 30).unwrap()
        );
    }

    #[test]
    fn test_forecast_period_ends() {
        let dates = forecast_period_ends(NaiveDate::from_ymd_opt(2023, 11, 30).unwrap(), 3);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            ]
        );

        // Mid-month anchors snap to the month end first
        let dates = forecast_period_ends(NaiveDate::from_ymd_opt(2023, 6, 15).unwrap(), 1);
        assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2023, 7, 31).unwrap()]);
    }

    #[test]
    fn test_total_patterns() {
        assert!(is_total_name("Total Assets"));
        assert!(is_total_name("Sub-Total Current Liabilities"));
        assert!(is_total_name("Grand Total"));
        assert!(!is_total_name("Totalizer Equipment"));
        assert!(!is_total_name("Accounts Receivable"));
    }

    #[test]
    fn test_key_total_patterns() {
        assert!(is_total_assets_name("Total Assets"));
        assert!(!is_total_assets_name("Total Current Assets"));
        assert!(!is_total_assets_name("Total Non-Current Assets"));
        assert!(is_total_liabilities_name("Total Liabilities"));
        assert!(!is_total_liabilities_name("Total Liabilities & Equity"));
        assert!(!is_total_liabilities_name("Total Current Liabilities"));
        assert!(is_total_equity_name("Total Shareholders' Equity"));
        assert!(is_total_equity_name("Total Equity"));
        assert!(!is_total_equity_name("Total Liabilities and Equity"));
    }

    #[test]
    fn test_debt_and_depreciation_patterns() {
        assert!(is_debt_name("Long-Term Debt"));
        assert!(is_debt_name("Bank Loan"));
        assert!(is_debt_name("Convertible Notes"));
        assert!(!is_debt_name("Notes Receivable"));
        assert!(is_depreciation_name("Depreciation & Amortization"));
        assert!(!is_depreciation_name("Rent"));
    }
}
