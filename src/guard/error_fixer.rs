//! Error-Fixer Engine (§4.5): builds an ordered recovery plan from the last
//! error string and the action description.

/// Build the recovery plan for `last_error` against `description`.
///
/// The plan always opens with a critical-objective reminder and a diagnostic
/// step, branches by error-text signal, and always ends with the termination
/// rule (surface the exact error and ask for help if the fix fails).
pub fn build_recovery_plan(last_error: &str, description: &str) -> Vec<String> {
    let mut plan = vec![
        format!("Re-read the critical objective: \"{description}\"."),
        format!("Diagnose: re-examine the exact failure — \"{last_error}\" — before acting again."),
    ];

    let lower = last_error.to_lowercase();
    if lower.contains("network") || lower.contains("timeout") || lower.contains("connection") {
        plan.push(
            "Network/timeout signal: retry with a smaller payload, a longer timeout, or a fallback endpoint."
                .to_string(),
        );
    } else if lower.contains("enoent") || lower.contains("file not found") || lower.contains("no such file") {
        plan.push(
            "File-not-found signal: locate the correct path (list the directory or search) before retrying."
                .to_string(),
        );
    } else if lower.contains("permission") || lower.contains("denied") {
        plan.push(
            "Permission-denied signal: find a path the process owns, or use a different tool that does not require this access."
                .to_string(),
        );
    } else if lower.contains("rate limit") || lower.contains("429") || lower.contains("rate-limit") {
        plan.push(
            "Rate-limit signal: switch provider if one is configured, or schedule the retry for later."
                .to_string(),
        );
    } else if lower.contains("syntax") || lower.contains("invalid") {
        plan.push(
            "Syntax/invalid-argument signal: re-read the tool's documented usage and escape arguments correctly."
                .to_string(),
        );
    }

    plan.push(
        "If this fix does not resolve the problem, surface the exact error text to the user and ask for help."
            .to_string(),
    );
    plan
}
