//! Locale-tolerant price parsing.
//!
//! Handles currency symbols and codes around the number, `.` or `,` as the
//! decimal separator, and `.`, `,`, `'`, spaces or narrow no-break spaces as
//! thousands separators ("$1,234.56", "1.234,56 €", "CHF 1'234.50",
//! "1 234,56 zł", "$1.299.900").

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::ValidationError;

/// Parses the first number in `text` as a positive price.
pub fn parse_price(text: &str) -> Result<Decimal, ValidationError> {
    let (negative, token) =
        numeric_token(text).ok_or_else(|| ValidationError::UnparseablePrice(text.to_string()))?;

    let normalized = normalize_separators(&token)
        .ok_or_else(|| ValidationError::UnparseablePrice(text.to_string()))?;

    let value = Decimal::from_str(&normalized)
        .map_err(|_| ValidationError::UnparseablePrice(text.to_string()))?;

    if negative {
        return Err(ValidationError::NonPositivePrice(-value));
    }
    if value <= Decimal::ZERO {
        return Err(ValidationError::NonPositivePrice(value));
    }
    Ok(value.normalize())
}

fn is_group_space(c: char) -> bool {
    matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '\u{2009}')
}

/// Extracts the first run of digits and separators, plus whether a minus sign precedes it.
fn numeric_token(text: &str) -> Option<(bool, String)> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;

    let negative = chars[..start]
        .iter()
        .rev()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| matches!(c, '-' | '\u{2212}'));

    let mut token = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '.' || c == ',' {
            token.push(c);
        } else if matches!(c, '\'' | '\u{2019}') {
            // Swiss grouping, dropped
        } else if is_group_space(c) && is_three_digit_group(&chars[i + 1..]) {
            // space used as thousands separator, dropped
        } else {
            break;
        }
        i += 1;
    }

    let token = token.trim_end_matches(['.', ',']).to_string();
    if token.is_empty() { None } else { Some((negative, token)) }
}

/// True if `rest` starts with exactly three digits.
fn is_three_digit_group(rest: &[char]) -> bool {
    rest.len() >= 3
        && rest[..3].iter().all(|c| c.is_ascii_digit())
        && rest.get(3).is_none_or(|c| !c.is_ascii_digit())
}

/// Rewrites a token such as "1.234,56" into "1234.56".
fn normalize_separators(token: &str) -> Option<String> {
    let last_dot = token.rfind('.');
    let last_comma = token.rfind(',');

    let decimal_sep = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (Some(_), None) => single_separator_role(token, '.'),
        (None, Some(_)) => single_separator_role(token, ','),
        (None, None) => None,
    };

    let mut out = String::with_capacity(token.len());
    let mut seen_decimal = false;
    for c in token.chars() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if Some(c) == decimal_sep {
            if seen_decimal {
                return None;
            }
            seen_decimal = true;
            out.push('.');
        }
    }

    if out.is_empty() || out == "." { None } else { Some(out) }
}

/// Decides whether a lone separator kind marks decimals or thousands.
fn single_separator_role(token: &str, sep: char) -> Option<char> {
    if token.matches(sep).count() > 1 {
        return None;
    }
    let (before, after) = token.split_once(sep)?;
    let looks_grouped = after.len() == 3 && !before.is_empty() && before.len() <= 3 && before != "0";
    if looks_grouped { None } else { Some(sep) }
}
