use crate::error::{CalcError, INVALID_NUMBERS};

/// Parses both operands as finite numbers.
///
/// Operands arrive as raw query values, so a missing value, an empty string,
/// `NaN` and `inf` are all rejected the same way.
pub fn validate(a: Option<&str>, b: Option<&str>) -> Result<(f64, f64), CalcError> {
    match (parse_operand(a), parse_operand(b)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(CalcError::InvalidInput(INVALID_NUMBERS.to_string())),
    }
}

fn parse_operand(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_finite_numbers() {
        assert_eq!(validate(Some("2"), Some("3")).unwrap(), (2.0, 3.0));
        assert_eq!(validate(Some(" -1.5 "), Some("1e3")).unwrap(), (-1.5, 1000.0));
        assert_eq!(validate(Some("0"), Some("-0")).unwrap(), (0.0, -0.0));
    }

    #[test]
    fn rejects_anything_else() {
        for (a, b) in [
            (Some("x"), Some("2")),
            (Some("2"), None),
            (None, None),
            (Some(""), Some("1")),
            (Some("NaN"), Some("1")),
            (Some("1"), Some("inf")),
            (Some("-infinity"), Some("1")),
            (Some("3abc"), Some("1")),
        ] {
            let err = validate(a, b).unwrap_err();
            assert!(matches!(err, CalcError::InvalidInput(ref msg) if msg == INVALID_NUMBERS), "{:?} {:?}", a, b);
        }
    }
}
