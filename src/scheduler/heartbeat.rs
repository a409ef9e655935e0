//! Heartbeat checklist parsing from `HEARTBEAT.md`.
//!
//! The heartbeat is a periodic "health check" that the agent runs against a
//! configurable checklist.  The checklist is stored in `HEARTBEAT.md` inside
//! the identity directory.

/// Parse checklist items from a `HEARTBEAT.md` file.
///
/// Lines that start with `- [ ]` or `- [x]` (case-insensitive) are extracted
/// as action items.  The returned strings contain only the item text (the
/// checkbox prefix is stripped).
pub fn parse_heartbeat_items(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            // Match "- [ ] Item" or "- [x] Item" (completed items included
            // so the agent can verify they remain passing).
            if let Some(rest) = trimmed.strip_prefix("- [ ]") {
                Some(rest.trim().to_owned())
            } else if let Some(rest) = trimmed.strip_prefix("- [x]") {
                Some(rest.trim().to_owned())
            } else {
                trimmed
                    .strip_prefix("- [X]")
                    .map(|rest| rest.trim().to_owned())
            }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default heartbeat interval in seconds (30 minutes).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30 * 60;

/// Error back-off levels in seconds: 30s → 60s → 300s → 900s → 3600s.
pub const ERROR_BACKOFF_SECS: &[u64] = &[30, 60, 300, 900, 3_600];

/// Return the back-off delay for `error_count` consecutive failures.
///
/// After `ERROR_BACKOFF_SECS.len()` failures the maximum back-off is used.
pub fn backoff_secs(error_count: u32) -> u64 {
    let idx = (error_count as usize).min(ERROR_BACKOFF_SECS.len() - 1);
    ERROR_BACKOFF_SECS[idx]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
