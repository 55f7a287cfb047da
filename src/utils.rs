//! String helpers shared by the auth modules
//!
//! UTF-8 safe truncation for provider error bodies and token masking for
//! log output.

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes.
///
/// # Example
/// ```
/// use voide_oauth::utils::safe_truncate;
///
/// let text = "Status: 🔍 Active";
/// assert_eq!(safe_truncate(text, 10), "Status: ");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a string for display, appending "..." if anything was cut.
///
/// # Example
/// ```
/// use voide_oauth::utils::truncate_for_display;
///
/// assert_eq!(truncate_for_display("This is a long message", 10), "This is a ...");
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}

/// Mask a secret for logs, keeping only a short prefix.
///
/// # Example
/// ```
/// use voide_oauth::utils::mask_token;
///
/// assert_eq!(mask_token("ya29.a0AfH6SMBx"), "ya29...");
/// assert_eq!(mask_token("short"), "***");
/// ```
#[must_use]
pub fn mask_token(token: &str) -> String {
    const VISIBLE: usize = 4;
    if token.chars().count() <= VISIBLE * 2 {
        return "***".to_string();
    }
    format!("{}...", safe_truncate(token, VISIBLE))
}
