//! Text helpers shared by the prompt builders and response parsers.

use once_cell::sync::Lazy;
use regex::Regex;

static MEAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(breakfast|brunch|lunch|dinner|supper|meal|restaurant|dining|food|eat|eating)\b").unwrap()
});

/// Drop control characters except newlines and tabs.
pub fn sanitize_user_input(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect::<String>()
}

/// Trim a model response and remove a surrounding ```` ```json ```` or
/// ```` ``` ```` fence.
pub fn strip_code_fences(response: &str) -> &str {
    let mut cleaned = response.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    } else {
        return cleaned;
    }
    cleaned.strip_suffix("```").unwrap_or(cleaned).trim()
}

/// Whether any of the texts mentions a meal as a whole word.
pub fn mentions_meal(texts: &[Option<&str>]) -> bool {
    texts.iter().flatten().any(|text| MEAL_RE.is_match(text))
}
