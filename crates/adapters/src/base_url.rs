use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+(?:beta)?/?$").expect("valid version suffix regex"));

/// Appends `/v1` unless the URL already names an API version. A trailing
/// `#` keeps the URL verbatim (minus the `#`).
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some(verbatim) = trimmed.strip_suffix('#') {
        return verbatim.to_string();
    }

    if VERSION_SUFFIX_RE.is_match(trimmed) || trimmed.contains("/v1/") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_base_url_appends_v1_when_missing() {
        assert_eq!(
            check_base_url("https://example.com/"),
            "https://example.com/v1"
        );
    }

    #[test]
    fn check_base_url_keeps_existing_version() {
        assert_eq!(
            check_base_url("https://example.com/v2"),
            "https://example.com/v2"
        );
        assert_eq!(
            check_base_url("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1"
        );
    }

    #[test]
    fn check_base_url_respects_hash_suffix() {
        assert_eq!(
            check_base_url("https://proxy.local/chat#"),
            "https://proxy.local/chat"
        );
    }
}
