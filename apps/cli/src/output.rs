//! Output formatting utilities

use serde::Serialize;

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// First characters of a token, enough to recognise it in a table
pub fn short_token(token: &str) -> String {
    let mut chars = token.chars();
    let head: String = chars.by_ref().take(12).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_token() {
        assert_eq!(short_token("abc"), "abc");
        assert_eq!(short_token(&"f".repeat(12)), "f".repeat(12));
        assert_eq!(short_token(&"f".repeat(64)), format!("{}…", "f".repeat(12)));
        assert_eq!(short_token(&"é".repeat(20)), format!("{}…", "é".repeat(12)));
    }
}
