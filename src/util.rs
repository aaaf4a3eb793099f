/// Parse a human-readable memory size into mebibytes.
///
/// Accepts `"2048"` (MB), `"512M"`, `"4G"`, `"1T"`. Binary units: 1G = 1024 MB.
pub fn parse_size_mb(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("size cannot be empty".into());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (s[..i].trim(), s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid size number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "M" | "MB" | "MIB" => 1,
        "G" | "GB" | "GIB" => 1024,
        "T" | "TB" | "TIB" => 1024 * 1024,
        _ => return Err(format!("unknown size suffix: '{suffix}' (use M, G or T)")),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflows: '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_number_is_megabytes() {
        assert_eq!(parse_size_mb("2048").unwrap(), 2048);
    }

    #[test]
    fn suffixes() {
        assert_eq!(parse_size_mb("512M").unwrap(), 512);
        assert_eq!(parse_size_mb("4G").unwrap(), 4096);
        assert_eq!(parse_size_mb("4 gb").unwrap(), 4096);
        assert_eq!(parse_size_mb("1T").unwrap(), 1024 * 1024);
    }

    #[test]
    fn zero_parses_and_is_left_to_validation() {
        assert_eq!(parse_size_mb("0").unwrap(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size_mb("").is_err());
        assert!(parse_size_mb("-1").is_err());
        assert!(parse_size_mb("10K").is_err());
        assert!(parse_size_mb("lots").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_size_mb(&format!("{}T", u64::MAX)).is_err());
    }
}
