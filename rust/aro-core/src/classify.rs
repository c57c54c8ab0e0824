//! Reply-intent extraction
//!
//! The NLP classification itself runs in the Executor
//! (`integration.nlp.classify_reply`); this module reads the intent out of
//! the result event and falls back to a keyword heuristic when the runtime
//! output carries none. The fallback keeps the confirmation flow moving
//! when the agent returns free text.

use aro_state::ReplyIntent;

/// Pull the classified intent out of executor output
pub fn intent_from_output(output: &serde_json::Value) -> Option<ReplyIntent> {
    let intent = output
        .get("openclawOutput")
        .and_then(|o| o.get("intent"))
        .or_else(|| output.get("intent"))?
        .as_str()?;
    match intent {
        "confirm" => Some(ReplyIntent::Confirm),
        "reschedule" => Some(ReplyIntent::Reschedule),
        "cancel" => Some(ReplyIntent::Cancel),
        _ => Some(ReplyIntent::Unknown),
    }
}

/// Keyword fallback used when the runtime output has no intent field
pub fn heuristic_intent(text: &str) -> ReplyIntent {
    let text = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["reschedul", "re-schedul", "another time", "different time", "move my"]) {
        ReplyIntent::Reschedule
    } else if has(&["cancel", "can't make", "cannot make", "won't make"]) {
        ReplyIntent::Cancel
    } else if has(&["yes", "confirm", "i'll be there", "see you", "ok", "sure", "👍"]) {
        ReplyIntent::Confirm
    } else {
        ReplyIntent::Unknown
    }
}
