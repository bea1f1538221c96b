//! Small helpers shared by the upstream clients.

/// Truncates an upstream error body before it is attached to an error value.
/// The cap counts characters, not bytes, so multi-byte text never splits
/// mid-codepoint.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        body.chars().take(MAX).collect()
    }
}
