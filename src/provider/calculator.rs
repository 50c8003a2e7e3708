//! Calculator provider: evaluates math expressions typed as queries.

use super::{LoadStep, Provider};
use crate::entry::EntryItem;
use crate::search::Searcher;

const SCHEME: &str = "calc://";

/// Calculator results rank above most list matches.
const CALCULATOR_RELEVANCE: i64 = 90;

/// Evaluate a math expression and return the result
/// Returns None if the expression is invalid or not a math expression
pub fn evaluate(expr: &str) -> Option<f64> {
    let expr = expr.trim();

    // Skip if empty or doesn't look like math
    if expr.is_empty() {
        return None;
    }

    // Must contain at least one digit
    if !expr.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    match meval::eval_str(expr) {
        Ok(result) if result.is_finite() => Some(result),
        _ => None,
    }
}

/// Format a floating-point number for display
/// Removes unnecessary decimal places (e.g., 4.0 -> "4")
/// Limits precision to 10 decimal places
pub fn format_result(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e12 {
        format!("{}", value as i64)
    } else {
        let formatted = format!("{:.10}", value);
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Stateless provider; always loaded.
#[derive(Debug, Default)]
pub struct CalculatorProvider;

impl CalculatorProvider {
    pub fn new() -> Self {
        Self
    }

    fn entry_for(expr: &str) -> Option<EntryItem> {
        let expr = expr.trim();
        let value = evaluate(expr)?;
        let result = format_result(value);
        Some(
            EntryItem::new(format!("{}{}", SCHEME, expr), result)
                .with_description(expr)
                .with_relevance(CALCULATOR_RELEVANCE),
        )
    }
}

impl Provider for CalculatorProvider {
    fn is_loaded(&self) -> bool {
        true
    }

    fn load_step(&self) -> LoadStep {
        LoadStep::FIRST
    }

    fn reload(&self, _force: bool) {}

    fn set_dirty(&self) {}

    fn request_results(&self, query: &str, searcher: &Searcher) {
        if let Some(entry) = Self::entry_for(query) {
            searcher.add_results(&[entry]);
        }
    }

    fn entries(&self) -> Option<Vec<EntryItem>> {
        None
    }

    fn may_find_by_id(&self, id: &str) -> bool {
        id.starts_with(SCHEME)
    }

    fn find_by_id(&self, id: &str) -> Option<EntryItem> {
        id.strip_prefix(SCHEME).and_then(Self::entry_for)
    }
}
