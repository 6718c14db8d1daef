use std::collections::HashMap;

use url::Url;

use crate::errors::HarnessError;

/// Whether `location` is a network locator rather than a local path.
pub fn is_url(location: &str) -> bool {
    Url::parse(location).is_ok()
}

/// Parse `NAME:VALUE` header specifications from the command line.
///
/// Whitespace around the value is trimmed, so both `Authorization:Bearer x`
/// and `Authorization: Bearer x` work. Every malformed entry is rejected
/// with an error naming the accepted format.
pub fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>, HarnessError> {
    let mut headers = HashMap::new();
    for entry in raw {
        let (name, value) = entry.split_once(':').ok_or_else(|| HarnessError::InvalidHeader {
            value: entry.clone(),
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HarnessError::InvalidHeader {
                value: entry.clone(),
            });
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("http://0.0.0.0:8080/schema.yaml"));
        assert!(!is_url("/tmp/schema.yaml"));
        assert!(!is_url("schema.yaml"));
    }

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Authorization: Bearer token".to_string(),
            "X-Run:42".to_string(),
        ])
        .unwrap();
        assert_eq!(headers["Authorization"], "Bearer token");
        assert_eq!(headers["X-Run"], "42");
    }

    #[test]
    fn test_parse_headers_invalid() {
        for raw in ["no-separator", ": empty-name"] {
            let error = parse_headers(&[raw.to_string()]).unwrap_err();
            let message = error.to_string();
            assert!(message.contains("NAME:VALUE"), "{message}");
            assert!(message.contains("NAME: VALUE"), "{message}");
        }
    }
}
