//! Environment variable utilities
//!
//! Provides helpers for reading environment variable overrides.

/// Get environment variable as Option
///
/// Returns `Some(value)` if set and non-empty, `None` otherwise.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get environment variable as integer
///
/// Returns `Some(value)` if set and parseable, `None` otherwise.
pub fn env_int<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env_opt(key)?.parse().ok()
}

/// Get environment variable as a whitespace-separated word list
pub fn env_words(key: &str) -> Option<Vec<String>> {
    let words: Vec<String> = env_opt(key)?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words)
    }
}
