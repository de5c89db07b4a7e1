// Lenient field coercion for raw scraped values.
// Scraped feeds are messy: "$2,450", "1,095 sqft", blank cells. Coercion
// never fails — unparseable numbers become 0.0 and unparseable dates become
// None, and the discard rules upstream decide what to do with them.

use chrono::NaiveDate;

/// Parse a currency/number string to f64, tolerating `$`, commas, units and
/// surrounding noise. Blank or garbage input yields 0.0.
pub fn to_float(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// Parse a date in `MM/DD/YYYY` form, falling back to ISO `YYYY-MM-DD`.
pub fn to_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
}

/// Parse a date in the two-digit-year `MM/DD/YY` form some feeds use.
/// Falls back to the long forms so already-normalized values survive.
pub fn to_date_short_year(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(trimmed, "%m/%d/%y")
        .ok()
        .or_else(|| to_date(trimmed))
}
