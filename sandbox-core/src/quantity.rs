// Parsing for cluster resource quantities.
//
// Accepts the same grammar the cluster API uses for cpu, memory and storage:
// - Plain numbers: "2", "0.5", ".5"
// - Decimal SI suffixes: "500m", "1k", "2G"
// - Binary SI suffixes: "512Mi", "10Gi"
// - Decimal exponents: "1e3", "2E-3"

use std::fmt;

/// A parsed quantity; keeps the caller's spelling for round-tripping.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    text: String,
    value: f64,
}

impl Quantity {
    /// The quantity as written, trimmed.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Value in base units (cores for cpu, bytes for memory and storage).
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_quantity(s)
    }
}

/// Parse a resource quantity string.
///
/// # Examples
/// ```
/// # use sandbox_core::quantity::parse_quantity;
/// assert_eq!(parse_quantity("500m").unwrap().value(), 0.5);
/// assert_eq!(parse_quantity("1Ki").unwrap().value(), 1024.0);
/// assert!(parse_quantity("ten").is_err());
/// ```
pub fn parse_quantity(s: &str) -> Result<Quantity, String> {
    let text = s.trim();
    if text.is_empty() {
        return Err("quantity is empty".to_string());
    }

    let (sign, unsigned) = match text.as_bytes()[0] {
        b'-' => (-1.0, &text[1..]),
        b'+' => (1.0, &text[1..]),
        _ => (1.0, text),
    };

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    let mantissa = parse_number(number).ok_or_else(|| format!("invalid number in '{}'", text))?;
    let multiplier =
        suffix_multiplier(suffix).ok_or_else(|| format!("invalid suffix '{}' in '{}'", suffix, text))?;

    Ok(Quantity {
        text: text.to_string(),
        value: sign * mantissa * multiplier,
    })
}

fn parse_number(number: &str) -> Option<f64> {
    if !number.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if number.matches('.').count() > 1 {
        return None;
    }
    // "5." and ".5" are both valid spellings
    let normalized = if number.ends_with('.') {
        format!("{}0", number)
    } else if number.starts_with('.') {
        format!("0{}", number)
    } else {
        number.to_string()
    };
    normalized.parse::<f64>().ok()
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return decimal_exponent(suffix),
    };
    Some(multiplier)
}

fn decimal_exponent(suffix: &str) -> Option<f64> {
    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    let exponent = exponent.strip_prefix('+').unwrap_or(exponent);
    let digits = exponent.strip_prefix('-').unwrap_or(exponent);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let power = exponent.parse::<i32>().ok()?;
    Some(10f64.powi(power))
}
