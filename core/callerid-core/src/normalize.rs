//! Phone number canonicalization.
//!
//! Turns whatever the user typed into the phone-book (`090-1234-5678`,
//! `+81 (0)90 1234 5678`, full-width digits, ...) into the country-code-prefixed
//! integer the platform directory keys on.
//!
//! No length validation is applied: `"0"` normalizes to the bare country code.

/// Converts full-width ASCII variants (U+FF01..U+FF5E) and the ideographic space.
fn to_half_width(c: char) -> char {
    match c {
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        '\u{3000}' => ' ',
        _ => c,
    }
}

/// Normalizes `raw` into a canonical number, or `None` when nothing usable remains.
pub fn normalize(raw: &str, default_country_code: &str) -> Option<u64> {
    let filtered: String = raw
        .chars()
        .map(to_half_width)
        .filter(|c| *c == '+' || c.is_ascii_digit())
        .collect();

    let mut digits = filtered.as_str();
    if let Some(rest) = digits.strip_prefix('+') {
        digits = rest;
    }
    if let Some(rest) = digits.strip_prefix("00") {
        digits = rest;
    }
    if digits.is_empty() {
        return None;
    }

    let canonical = if let Some(subscriber) = digits.strip_prefix(default_country_code) {
        // Drop the domestic trunk prefix written after the country code: +81 (0)90...
        let subscriber = subscriber.strip_prefix('0').unwrap_or(subscriber);
        format!("{}{}", default_country_code, subscriber)
    } else if let Some(local) = digits.strip_prefix('0') {
        format!("{}{}", default_country_code, local)
    } else {
        format!("{}{}", default_country_code, digits)
    };

    canonical.parse::<u64>().ok()
}

/// Normalizes a number with an explicit country code (exported to hosts).
#[uniffi::export]
pub fn normalize_number(raw: String, country_code: String) -> Option<u64> {
    normalize(&raw, &country_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domestic_with_spaces() {
        assert_eq!(normalize("0701234 5678", "81"), Some(817012345678));
    }

    #[test]
    fn test_international_with_plus_and_dashes() {
        assert_eq!(normalize("+81 70-1234-5678", "81"), Some(817012345678));
    }

    #[test]
    fn test_already_canonical_unchanged() {
        assert_eq!(normalize("819012345678", "81"), Some(819012345678));
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(normalize("", "81"), None);
    }

    #[test]
    fn test_only_symbols_is_none() {
        assert_eq!(normalize("(-) ", "81"), None);
        assert_eq!(normalize("+", "81"), None);
    }

    #[test]
    fn test_trunk_zero_after_country_code_removed() {
        assert_eq!(normalize("+81 (0)90-1234-5678", "81"), Some(819012345678));
    }

    #[test]
    fn test_international_access_prefix() {
        assert_eq!(normalize("0081-90-1234-5678", "81"), Some(819012345678));
    }

    #[test]
    fn test_bare_local_number_gets_country_code() {
        assert_eq!(normalize("312345678", "81"), Some(81312345678));
    }

    #[test]
    fn test_full_width_digits() {
        assert_eq!(normalize("０９０－１２３４－５６７８", "81"), Some(819012345678));
        assert_eq!(normalize("＋８１\u{3000}９０１２３４５６７８", "81"), Some(819012345678));
    }

    #[test]
    fn test_letters_discarded() {
        assert_eq!(normalize("tel: 090 1234 5678 (home)", "81"), Some(819012345678));
    }

    #[test]
    fn test_embedded_plus_is_unparseable() {
        assert_eq!(normalize("090+1234", "81"), None);
    }

    #[test]
    fn test_overflow_is_none() {
        assert_eq!(normalize("99999999999999999999999", "81"), None);
    }

    #[test]
    fn test_country_code_only_passes_through() {
        assert_eq!(normalize("+81", "81"), Some(81));
    }

    #[test]
    fn test_other_country_code() {
        assert_eq!(normalize("010-1234-5678", "82"), Some(821012345678));
    }
}
