//! Conscience Engine (§4.5): turns the current loop context plus recent
//! incidents into guidance text, an escalate flag, a complexity score, and a
//! risk level.

use super::types::{ConscienceResult, Incident, LoopContext, RiskLevel};
use crate::config::schema::GuardConfig;

/// Minimum number of non-trivial overlapping words considered "very long"
/// for complexity scoring purposes.
const LONG_DESCRIPTION_CHARS: usize = 400;

/// Evaluate the conscience rules (a)-(f) of §4.5 against `ctx` and the
/// action's recent `incidents`.
pub fn evaluate(ctx: &LoopContext, incidents: &[Incident], cfg: &GuardConfig) -> ConscienceResult {
    let mut guidance: Vec<String> = Vec::new();
    let mut risk = RiskLevel::Low;
    let mut warning_signals = 0u32;

    // (a) ≥2 steps without a tool invocation → circling.
    if ctx.no_tool_steps >= 2 {
        guidance.push(format!(
            "The loop is circling: {} consecutive steps produced no tool call. Pick a concrete action.",
            ctx.no_tool_steps
        ));
        warning_signals += 1;
    }

    // (b) last error present → warn, forbid identical retry parameters.
    if let Some(err) = &ctx.last_error {
        guidance.push(format!(
            "Last error: \"{err}\". Do not retry with identical parameters; adjust the approach."
        ));
        warning_signals += 1;
    }

    // (c) ≥2 consecutive failures → high risk, demand diagnostic/simplification.
    if ctx.consecutive_failures >= 2 {
        guidance.push(
            "Two or more consecutive failures. Run a diagnostic step or simplify the approach before trying again."
                .to_string(),
        );
        risk = risk.max(RiskLevel::High);
    }

    // (d) step > 15 or duration > 8 minutes → fatigue.
    let fatigue_minutes = cfg.fatigue_duration_minutes * 60;
    if ctx.step > cfg.fatigue_step_threshold || ctx.total_duration_secs > fatigue_minutes {
        guidance.push(
            "Fatigue threshold reached: finish within 2 more steps or report a concrete blocker."
                .to_string(),
        );
        warning_signals += 1;
    }

    // (e) last four tool names identical → loop detection, high risk.
    if ctx.recent_tool_names.len() >= 4 {
        let last_four = &ctx.recent_tool_names[ctx.recent_tool_names.len() - 4..];
        if last_four.windows(2).all(|w| w[0] == w[1]) {
            guidance.push(format!(
                "Loop detected: the last four tool calls were all \"{}\". Change strategy.",
                last_four[0]
            ));
            risk = risk.max(RiskLevel::High);
        }
    }

    // (f) zero messages after 5 steps → ghosting.
    if ctx.step > cfg.ghosting_step_threshold && ctx.messages_sent == 0 {
        guidance.push(
            "No status update has been sent to the user after several steps. Send one now."
                .to_string(),
        );
        warning_signals += 1;
    }

    // Two or more simultaneous warning-level signals (circling, fresh error,
    // fatigue, ghosting) compound into high risk even without an explicit
    // high-risk rule firing on its own.
    if warning_signals >= 2 {
        risk = risk.max(RiskLevel::High);
    } else if warning_signals == 1 {
        risk = risk.max(RiskLevel::Medium);
    }

    // Escalation triggers when risk is high or step >= escalate_step_threshold.
    let escalate = risk >= RiskLevel::High || ctx.step >= cfg.escalate_step_threshold;

    // Complexity score: starts at 10, capped at 100.
    let mut complexity: u32 = 10;
    complexity += 2 * ctx.step;
    if ctx.last_error.is_some() {
        complexity += 15;
    }
    if ctx.description_len > LONG_DESCRIPTION_CHARS {
        complexity += 10;
    }
    complexity += 10 * ctx.no_tool_steps;
    let complexity_score = complexity.min(100) as u8;

    // Incidents carrying errors nudge risk up even without a fresh ctx.last_error.
    let incident_errors = incidents.iter().filter(|i| i.error.is_some()).count();
    if incident_errors >= 3 {
        risk = risk.max(RiskLevel::Medium);
    }

    ConscienceResult {
        guidance,
        escalate,
        complexity_score,
        risk,
    }
}
