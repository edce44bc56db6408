// Utility helpers

use crate::{
    constants::{HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT},
    error::{AppError, Result},
};

/// Basic guard for list/query limits to avoid expensive node and explorer queries.
pub fn ensure_page_limit(limit: Option<u32>) -> Result<u32> {
    let limit = limit.unwrap_or(HISTORY_DEFAULT_LIMIT);
    if limit == 0 {
        return Err(AppError::BadRequest("limit must be greater than 0".to_string()));
    }
    if limit > HISTORY_MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be at most {}",
            HISTORY_MAX_LIMIT
        )));
    }
    Ok(limit)
}

/// Lowercases a request host and strips any port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(&host);
    let host = host.split('/').next().unwrap_or_default();
    host.split(':').next().unwrap_or_default().to_string()
}

pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_page_limit_defaults_and_caps() {
        assert_eq!(ensure_page_limit(None).unwrap(), HISTORY_DEFAULT_LIMIT);
        assert_eq!(ensure_page_limit(Some(10)).unwrap(), 10);
        assert!(ensure_page_limit(Some(0)).is_err());
        assert!(ensure_page_limit(Some(HISTORY_MAX_LIMIT + 1)).is_err());
    }

    #[test]
    fn normalize_host_strips_scheme_and_port() {
        assert_eq!(normalize_host("Arcade.Example.com:443"), "arcade.example.com");
        assert_eq!(normalize_host("https://codex.example.com/path"), "codex.example.com");
        assert_eq!(normalize_host("localhost"), "localhost");
    }
}
