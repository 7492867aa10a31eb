//! Status code matching.

/// Return true if `status` matches `pattern`.
///
/// Each pattern character is either a literal digit or the wildcard `x`.
/// Patterns of a different length than the status never match.
pub fn matches(status: u16, pattern: &str) -> bool {
    let code = status.to_string();
    if code.len() != pattern.len() {
        return false;
    }

    code.bytes()
        .zip(pattern.bytes())
        .all(|(digit, expected)| expected == b'x' || expected == digit)
}

/// Decide whether an endpoint is up.
///
/// `status` is `None` when the request failed before a response arrived, which
/// counts as a non-match. Inversion is applied last, so an unreachable endpoint
/// with `inverse` set is reported as up.
pub fn is_up(status: Option<u16>, pattern: &str, inverse: bool) -> bool {
    let matched = status.is_some_and(|code| matches(code, pattern));
    matched != inverse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(matches(204, "2xx"));
        assert!(matches(200, "2xx"));
        assert!(matches(299, "2x9"));
        assert!(matches(418, "xxx"));
        assert!(!matches(404, "2xx"));
        assert!(!matches(301, "2xx"));
    }

    #[test]
    fn test_literal_patterns() {
        assert!(matches(200, "200"));
        assert!(!matches(201, "200"));
        assert!(matches(503, "503"));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(!matches(200, "20"));
        assert!(!matches(200, "2xxx"));
        assert!(!matches(200, ""));
    }

    #[test]
    fn test_every_code_against_2xx() {
        for code in 100..600u16 {
            assert_eq!(matches(code, "2xx"), (200..300).contains(&code), "code {}", code);
            assert_eq!(matches(code, "x0x"), (code / 10) % 10 == 0, "code {}", code);
        }
    }

    #[test]
    fn test_inversion() {
        assert!(is_up(Some(200), "2xx", false));
        assert!(!is_up(Some(200), "2xx", true));
        assert!(!is_up(Some(503), "2xx", false));
        assert!(is_up(Some(503), "2xx", true));
    }

    #[test]
    fn test_transport_failure_is_a_non_match() {
        assert!(!is_up(None, "2xx", false));
        assert!(is_up(None, "2xx", true));
    }
}
