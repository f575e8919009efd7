//! Auto-calculation of the valuation table in the form editor.
//!
//! The ten line items live in the same flat field bag as every other form
//! field. Derived values are written back into the bag and stay editable: a
//! later edit to a derived field is kept until one of its inputs changes,
//! and feeds the values computed from it.
//!
//! Amounts are `f64` throughout; a result too large to represent is left
//! blank.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::record::FieldBag;

pub const LINE_ITEMS: usize = 10;

pub const TOTAL_ESTIMATED_VALUE: &str = "totalEstimatedValue";
pub const ROUND_FIGURE: &str = "roundFigure";
pub const REALIZABLE_VALUE: &str = "realizableValue";
pub const DISTRESS_VALUE: &str = "distressValue";
pub const INSURABLE_VALUE: &str = "insurableValue";

/// Percentages of the round figure for the three secondary values.
const REALIZABLE_PERCENT: f64 = 90.0;
const DISTRESS_PERCENT: f64 = 80.0;
const INSURABLE_PERCENT: f64 = 35.0;

lazy_static! {
    static ref LINE_ITEM_KEY: Regex =
        Regex::new(r"^(quantity|rate|estimatedValue)([0-9]{1,2})$").unwrap();
}

pub fn quantity_key(item: usize) -> String {
    format!("quantity{}", item)
}

pub fn rate_key(item: usize) -> String {
    format!("rate{}", item)
}

pub fn estimated_value_key(item: usize) -> String {
    format!("estimatedValue{}", item)
}

enum LineField {
    Operand(usize),
    Estimate,
}

fn classify(key: &str) -> Option<LineField> {
    let caps = LINE_ITEM_KEY.captures(key)?;
    let item: usize = caps[2].parse().ok()?;
    if !(1..=LINE_ITEMS).contains(&item) {
        return None;
    }
    match &caps[1] {
        "estimatedValue" => Some(LineField::Estimate),
        _ => Some(LineField::Operand(item)),
    }
}

/// Write one field and recompute whatever depends on it.
///
/// Returns the keys written, starting with `key` itself.
pub fn apply_edit(bag: &mut FieldBag, key: &str, value: Value) -> Vec<String> {
    bag.insert(key.to_string(), value);
    let mut touched = vec![key.to_string()];

    match classify(key) {
        Some(LineField::Operand(item)) => {
            touched.push(recompute_item(bag, item));
            touched.extend(recompute_totals(bag));
        }
        Some(LineField::Estimate) => touched.extend(recompute_totals(bag)),
        None if key == TOTAL_ESTIMATED_VALUE => {
            let total = bag.get(key).and_then(parse_amount).unwrap_or(0.0);
            touched.extend(derive_from_total(bag, total));
        }
        None if key == ROUND_FIGURE => {
            let round = bag.get(key).and_then(parse_amount).unwrap_or(0.0);
            touched.extend(derive_from_round(bag, round));
        }
        None => {}
    }

    touched
}

/// Recompute all ten line items and the totals, discarding overrides.
pub fn recalculate(bag: &mut FieldBag) {
    for item in 1..=LINE_ITEMS {
        recompute_item(bag, item);
    }
    recompute_totals(bag);
}

fn recompute_item(bag: &mut FieldBag, item: usize) -> String {
    let quantity = bag.get(&quantity_key(item)).and_then(parse_amount);
    let rate = bag.get(&rate_key(item)).and_then(parse_amount);

    let estimate = match (quantity, rate) {
        (Some(q), Some(r)) => format_amount(q * r),
        _ => String::new(),
    };

    let key = estimated_value_key(item);
    bag.insert(key.clone(), Value::String(estimate));
    key
}

fn recompute_totals(bag: &mut FieldBag) -> Vec<String> {
    let total: f64 = (1..=LINE_ITEMS)
        .filter_map(|item| bag.get(&estimated_value_key(item)).and_then(parse_amount))
        .sum();

    let mut touched = write_derived(bag, &[(TOTAL_ESTIMATED_VALUE, format_amount(total))]);
    touched.extend(derive_from_total(bag, total));
    touched
}

/// Round figure and the three percentages from a total.
fn derive_from_total(bag: &mut FieldBag, total: f64) -> Vec<String> {
    let round = round_to_thousand(total);
    let mut touched = write_derived(bag, &[(ROUND_FIGURE, format_amount(round))]);
    touched.extend(derive_from_round(bag, round));
    touched
}

fn derive_from_round(bag: &mut FieldBag, round: f64) -> Vec<String> {
    let share = |percent: f64| {
        if round == 0.0 {
            String::new()
        } else {
            format_amount(round * percent / 100.0)
        }
    };

    write_derived(
        bag,
        &[
            (REALIZABLE_VALUE, share(REALIZABLE_PERCENT)),
            (DISTRESS_VALUE, share(DISTRESS_PERCENT)),
            (INSURABLE_VALUE, share(INSURABLE_PERCENT)),
        ],
    )
}

fn write_derived(bag: &mut FieldBag, values: &[(&str, String)]) -> Vec<String> {
    values
        .iter()
        .map(|(key, value)| {
            bag.insert(key.to_string(), Value::String(value.clone()));
            key.to_string()
        })
        .collect()
}

/// Round to the nearest 1000, halves away from zero.
pub fn round_to_thousand(amount: f64) -> f64 {
    (amount / 1000.0).round() * 1000.0
}

/// Numeric value of a form field; blanks and text yield `None`.
///
/// Thousands separators are tolerated (`"1,50,000"`).
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
        _ => None,
    }
}

/// Render an amount without a trailing `.0`; fractions keep two decimals at most.
///
/// Infinite or NaN amounts render blank.
pub fn format_amount(amount: f64) -> String {
    if !amount.is_finite() {
        String::new()
    } else if amount.fract() == 0.0 {
        // `+ 0.0` turns -0 into 0
        format!("{}", amount + 0.0)
    } else {
        let text = format!("{:.2}", amount);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(bag: &FieldBag, key: &str) -> String {
        bag.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
    }

    #[test]
    fn quantity_times_rate() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity1", json!("3"));
        assert_eq!(text(&bag, "estimatedValue1"), "");

        let touched = apply_edit(&mut bag, "rate1", json!("1500"));
        assert_eq!(text(&bag, "estimatedValue1"), "4500");
        assert_eq!(touched[0], "rate1");
        assert!(touched.contains(&"estimatedValue1".to_string()));
        assert!(touched.contains(&ROUND_FIGURE.to_string()));
    }

    #[test]
    fn totals_and_percentages() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity1", json!("100"));
        apply_edit(&mut bag, "rate1", json!("1234.56"));
        apply_edit(&mut bag, "quantity2", json!(1));
        apply_edit(&mut bag, "rate2", json!(0));

        assert_eq!(text(&bag, "estimatedValue1"), "123456");
        assert_eq!(text(&bag, "estimatedValue2"), "0");
        assert_eq!(text(&bag, TOTAL_ESTIMATED_VALUE), "123456");
        assert_eq!(text(&bag, ROUND_FIGURE), "123000");
        assert_eq!(text(&bag, REALIZABLE_VALUE), "110700");
        assert_eq!(text(&bag, DISTRESS_VALUE), "98400");
        assert_eq!(text(&bag, INSURABLE_VALUE), "43050");
    }

    #[test]
    fn all_zero_items_leave_percentages_blank() {
        let mut bag = FieldBag::new();
        for item in 1..=LINE_ITEMS {
            bag.insert(quantity_key(item), json!("0"));
            bag.insert(rate_key(item), json!("0"));
        }
        recalculate(&mut bag);

        assert_eq!(text(&bag, ROUND_FIGURE), "0");
        assert_eq!(text(&bag, REALIZABLE_VALUE), "");
        assert_eq!(text(&bag, DISTRESS_VALUE), "");
        assert_eq!(text(&bag, INSURABLE_VALUE), "");
    }

    #[test]
    fn rounds_to_nearest_thousand() {
        assert_eq!(round_to_thousand(123456.0), 123000.0);
        assert_eq!(round_to_thousand(123500.0), 124000.0);
        assert_eq!(round_to_thousand(499.0), 0.0);
        assert_eq!(round_to_thousand(0.0), 0.0);
    }

    #[test]
    fn huge_rates_do_not_overflow() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity1", json!("1"));
        apply_edit(&mut bag, "rate1", json!("200000000000000000"));

        assert_eq!(text(&bag, ROUND_FIGURE), "200000000000000000");
        assert_eq!(text(&bag, REALIZABLE_VALUE), "180000000000000000");
        assert_eq!(text(&bag, INSURABLE_VALUE), "70000000000000000");

        apply_edit(&mut bag, "quantity1", json!("1e300"));
        apply_edit(&mut bag, "rate1", json!("1e300"));
        assert_eq!(text(&bag, "estimatedValue1"), "");
        assert_eq!(text(&bag, ROUND_FIGURE), "0");
    }

    #[test]
    fn edited_round_figure_feeds_percentages() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity1", json!("1"));
        apply_edit(&mut bag, "rate1", json!("100000"));
        assert_eq!(text(&bag, REALIZABLE_VALUE), "90000");

        let touched = apply_edit(&mut bag, ROUND_FIGURE, json!("200000"));
        assert_eq!(text(&bag, REALIZABLE_VALUE), "180000");
        assert_eq!(text(&bag, DISTRESS_VALUE), "160000");
        assert_eq!(text(&bag, INSURABLE_VALUE), "70000");
        assert_eq!(text(&bag, TOTAL_ESTIMATED_VALUE), "100000");
        assert!(touched.contains(&REALIZABLE_VALUE.to_string()));
    }

    #[test]
    fn edited_total_feeds_round_figure() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity1", json!("1"));
        apply_edit(&mut bag, "rate1", json!("100000"));

        apply_edit(&mut bag, TOTAL_ESTIMATED_VALUE, json!("251400"));
        assert_eq!(text(&bag, ROUND_FIGURE), "251000");
        assert_eq!(text(&bag, DISTRESS_VALUE), "200800");
        assert_eq!(text(&bag, "estimatedValue1"), "100000");
    }

    #[test]
    fn downstream_override_survives_unrelated_edits() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity1", json!("2"));
        apply_edit(&mut bag, "rate1", json!("50000"));
        assert_eq!(text(&bag, REALIZABLE_VALUE), "90000");

        apply_edit(&mut bag, REALIZABLE_VALUE, json!("95000"));
        apply_edit(&mut bag, "clientRemarks", json!("corner plot"));
        assert_eq!(text(&bag, REALIZABLE_VALUE), "95000");

        apply_edit(&mut bag, "rate1", json!("60000"));
        assert_eq!(text(&bag, REALIZABLE_VALUE), "108000");
    }

    #[test]
    fn edited_estimate_feeds_total() {
        let mut bag = FieldBag::new();
        apply_edit(&mut bag, "quantity3", json!("1"));
        apply_edit(&mut bag, "rate3", json!("1000"));
        apply_edit(&mut bag, "estimatedValue3", json!("2500"));
        assert_eq!(text(&bag, TOTAL_ESTIMATED_VALUE), "2500");
        assert_eq!(text(&bag, ROUND_FIGURE), "3000");
    }

    #[test]
    fn out_of_range_items_are_plain_fields() {
        let mut bag = FieldBag::new();
        let touched = apply_edit(&mut bag, "quantity11", json!("4"));
        assert_eq!(touched, vec!["quantity11".to_string()]);
        assert!(!bag.contains_key(ROUND_FIGURE));
    }

    #[test]
    fn amount_parsing_and_formatting() {
        assert_eq!(parse_amount(&json!("1,50,000")), Some(150000.0));
        assert_eq!(parse_amount(&json!("  ")), None);
        assert_eq!(parse_amount(&json!("abc")), None);
        assert_eq!(parse_amount(&json!(null)), None);
        assert_eq!(format_amount(4500.0), "4500");
        assert_eq!(format_amount(12.5), "12.5");
        assert_eq!(format_amount(0.126), "0.13");
    }
}
