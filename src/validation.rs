//! Small validation helpers shared by the configuration checks.
use std::ops::RangeInclusive;

/// Validates if a given u16 value is a valid port number.
/// By type, the port is already within the 0-65535 range.
/// This function checks that the port is not 0, which is reserved.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates if a given string is a usable file path.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty (ignoring surrounding whitespace).
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Endpoint names end up in file and directory names.
pub fn is_valid_file_stem(value: &str) -> Result<(), &'static str> {
    is_not_empty(value)?;
    if value.chars().all(|c| c == '.') {
        return Err("Name cannot consist of dots only");
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Ok(())
    } else {
        Err("Only ASCII letters, digits, '-', '_' and '.' are allowed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_zero_rejected() {
        assert!(is_valid_port(0).is_err());
        assert!(is_valid_port(9880).is_ok());
    }

    #[test]
    fn test_paths() {
        assert!(is_valid_path("").is_err());
        assert!(is_valid_path("a\0b").is_err());
        assert!(is_valid_path("~/data/thermo").is_ok());
    }

    #[test]
    fn test_file_stems() {
        assert!(is_valid_file_stem("tei49i-ps").is_ok());
        assert!(is_valid_file_stem("tei49i_1").is_ok());
        assert!(is_valid_file_stem("tei 49i").is_err());
        assert!(is_valid_file_stem("../up").is_err());
        assert!(is_valid_file_stem("  ").is_err());
        assert!(is_valid_file_stem(".").is_err());
        assert!(is_valid_file_stem("..").is_err());
        assert!(is_valid_file_stem("tei49i.v2").is_ok());
    }

    #[test]
    fn test_range() {
        assert!(is_in_range(127u8, 0..=127).is_ok());
        assert!(is_in_range(128u8, 0..=127).is_err());
    }
}
