/// Group the integer digits of `digits` with commas: "1234567" -> "1,234,567".
fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// Two decimals with thousands separators: $1,234.56
pub fn money(val: f64) -> String {
    let fixed = format!("{:.2}", val.abs());
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if val < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}${}.{dec_part}", group_thousands(int_part))
}

/// Share in 0.0..=1.0 as a whole percentage: 0.333 -> "33%".
pub fn percent(share: f64) -> String {
    format!("{:.0}%", share * 100.0)
}

pub fn score(val: f64) -> String {
    format!("{val:.4}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(1234.56), "$1,234.56");
        assert_eq!(money(-500.00), "-$500.00");
        assert_eq!(money(0.0), "$0.00");
        assert_eq!(money(1000000.99), "$1,000,000.99");
        assert_eq!(money(15.5), "$15.50");
        assert_eq!(money(-0.001), "$0.00");
        assert_eq!(money(999.999), "$1,000.00");
    }

    #[test]
    fn test_percent_and_score() {
        assert_eq!(percent(0.5), "50%");
        assert_eq!(percent(1.0 / 3.0), "33%");
        assert_eq!(percent(0.0), "0%");
        assert_eq!(score(0.5), "0.5000");
    }
}
