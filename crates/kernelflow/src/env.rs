use std::env;
use std::sync::OnceLock;

static KERNELFLOW_ACCESS_LOG: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Whether newly created blob handles record every checked access.
pub(crate) fn access_log_enabled() -> bool {
    *KERNELFLOW_ACCESS_LOG.get_or_init(|| match env::var("KERNELFLOW_ACCESS_LOG") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(" On "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool(""));
    }
}
