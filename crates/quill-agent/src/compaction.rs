//! Context compaction for long conversations
//!
//! When the transcript grows past a token threshold, older turns are
//! summarized by the model and replaced with a single rolling summary turn at
//! the front of the transcript. Each pass appends to the existing summary, so
//! earlier summarized material is never dropped.

use futures::StreamExt;
use quill_ai::{Role, SendOptions, Transport, Turn, stream::stream_text};
use tokio_util::sync::CancellationToken;

use crate::tokens::estimate_turns;
use crate::transport::cancellable;

/// Prefix that marks a system turn as the rolling summary
pub const SUMMARY_MARKER: &str = "[Conversation summary]\n";

/// Placed between successive summary bodies
const SUMMARY_SEPARATOR: &str = "\n\n";

const MIN_RATIO: f64 = 0.2;
const MAX_RATIO: f64 = 0.7;
const RATIO_SCALE: f64 = 5000.0;

/// Fewer old turns than this are not worth a summarization round-trip
const MIN_OLD_TURNS: usize = 2;

/// Configuration for context compaction
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Whether compaction is enabled
    pub enabled: bool,
    /// Estimated cost at which compaction is attempted
    pub threshold: u32,
    /// Number of most recent turns always kept verbatim
    pub keep_recent: usize,
    /// Model used for summarization; the chat model when unset
    pub summary_model: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3000,
            keep_recent: 6,
            summary_model: None,
        }
    }
}

/// Why a compaction check did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    BelowThreshold { tokens: u32 },
    TooFewTurns { turns: usize },
    NotEnoughHistory { old_turns: usize },
}

/// What a successful compaction did
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    /// Turns folded into the summary
    pub dropped_turns: usize,
    /// Estimated cost of the whole transcript before compaction
    pub tokens_before: u32,
    /// `old cost × ratio`, the reduction the summary was asked for
    pub estimated_tokens_saved: u32,
    /// Compression ratio used
    pub ratio: f64,
}

/// Result of a compaction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    /// Trigger conditions not met
    Skipped(SkipReason),
    /// Old turns were replaced by a rolling summary
    Compacted {
        turns: Vec<Turn>,
        report: CompactionReport,
    },
    /// The summarization round-trip failed; the transcript must stay as it was
    Failed { reason: String },
}

impl CompactionOutcome {
    /// The transcript to continue with
    pub fn into_turns(self, original: &[Turn]) -> Vec<Turn> {
        match self {
            CompactionOutcome::Compacted { turns, .. } => turns,
            _ => original.to_vec(),
        }
    }

    pub fn report(&self) -> Option<&CompactionReport> {
        match self {
            CompactionOutcome::Compacted { report, .. } => Some(report),
            _ => None,
        }
    }

    pub fn is_compacted(&self) -> bool {
        matches!(self, CompactionOutcome::Compacted { .. })
    }
}

/// Check whether a turn is the rolling summary
pub fn is_rolling_summary(turn: &Turn) -> bool {
    turn.role == Role::System && turn.content.starts_with(SUMMARY_MARKER)
}

/// The more there is to compress, the harder it is compressed.
pub fn compression_ratio(old_tokens: u32) -> f64 {
    (old_tokens as f64 / RATIO_SCALE * 0.5 + MIN_RATIO).clamp(MIN_RATIO, MAX_RATIO)
}

/// Requested summary length for `old_tokens` compressed at `ratio`
pub fn target_length(old_tokens: u32, ratio: f64) -> u32 {
    (old_tokens as f64 * (1.0 - ratio)).floor() as u32
}

/// A decided-upon compaction, before the summarization call
#[derive(Debug)]
struct Plan<'a> {
    previous_summary: Option<&'a str>,
    old: &'a [Turn],
    recent: &'a [Turn],
    tokens_before: u32,
    old_tokens: u32,
    ratio: f64,
}

fn plan<'a>(turns: &'a [Turn], config: &CompactionConfig) -> Result<Plan<'a>, SkipReason> {
    if !config.enabled {
        return Err(SkipReason::Disabled);
    }

    let tokens_before = estimate_turns(turns);
    if tokens_before < config.threshold {
        return Err(SkipReason::BelowThreshold {
            tokens: tokens_before,
        });
    }
    if turns.len() <= config.keep_recent + 2 {
        return Err(SkipReason::TooFewTurns { turns: turns.len() });
    }

    let previous_summary = turns
        .first()
        .filter(|t| is_rolling_summary(t))
        .map(|t| &t.content[SUMMARY_MARKER.len()..]);
    let start = usize::from(previous_summary.is_some());
    let split = turns.len() - config.keep_recent;

    let old = &turns[start..split];
    if old.len() < MIN_OLD_TURNS {
        return Err(SkipReason::NotEnoughHistory {
            old_turns: old.len(),
        });
    }

    let old_tokens = estimate_turns(old);
    Ok(Plan {
        previous_summary,
        old,
        recent: &turns[split..],
        tokens_before,
        old_tokens,
        ratio: compression_ratio(old_tokens),
    })
}

/// Render turns as `role: content` blocks separated by blank lines
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Two-message prompt asking for a summary of roughly `target` tokens
pub fn summary_prompt(old: &[Turn], target: u32) -> Vec<Turn> {
    vec![
        Turn::system(format!(
            "You are a summarization assistant. Compress the following conversation history \
             into a summary of about {target} tokens.\n\
             Keep key facts, decisions, and code snippets. Use a bulleted list. \
             Do not add any extra commentary."
        )),
        Turn::user(render_transcript(old)),
    ]
}

/// Build the rolling summary turn, appending `summary` to any previous body
pub fn merge_summary(previous: Option<&str>, summary: &str) -> Turn {
    let mut content = String::from(SUMMARY_MARKER);
    if let Some(previous) = previous {
        content.push_str(previous);
        content.push_str(SUMMARY_SEPARATOR);
    }
    content.push_str(summary);
    Turn::system(content)
}

/// Compact `turns` if the trigger conditions hold.
///
/// Never fails: summarization problems come back as
/// [`CompactionOutcome::Failed`] and the caller keeps the original turns.
pub async fn compact(
    turns: &[Turn],
    config: &CompactionConfig,
    transport: &dyn Transport,
    model: &str,
    cancel: &CancellationToken,
) -> CompactionOutcome {
    let plan = match plan(turns, config) {
        Ok(plan) => plan,
        Err(reason) => {
            tracing::trace!(?reason, "compaction skipped");
            return CompactionOutcome::Skipped(reason);
        }
    };

    let target = target_length(plan.old_tokens, plan.ratio);
    let prompt = summary_prompt(plan.old, target);
    let options = SendOptions::new(config.summary_model.as_deref().unwrap_or(model));

    tracing::debug!(
        old_turns = plan.old.len(),
        old_tokens = plan.old_tokens,
        ratio = plan.ratio,
        target,
        model = %options.model,
        "summarizing old turns"
    );

    let summary = match summarize(transport, &prompt, &options, cancel).await {
        Ok(summary) => summary,
        Err(reason) => {
            tracing::debug!(%reason, "compaction failed, keeping transcript");
            return CompactionOutcome::Failed { reason };
        }
    };

    let mut compacted = Vec::with_capacity(plan.recent.len() + 1);
    compacted.push(merge_summary(plan.previous_summary, &summary));
    compacted.extend_from_slice(plan.recent);

    let report = CompactionReport {
        dropped_turns: plan.old.len(),
        tokens_before: plan.tokens_before,
        estimated_tokens_saved: (plan.old_tokens as f64 * plan.ratio).floor() as u32,
        ratio: plan.ratio,
    };
    tracing::info!(
        dropped_turns = report.dropped_turns,
        tokens_saved = report.estimated_tokens_saved,
        "compacted conversation"
    );

    CompactionOutcome::Compacted {
        turns: compacted,
        report,
    }
}

/// Run the summarization request to completion; nothing partial is returned.
async fn summarize(
    transport: &dyn Transport,
    prompt: &[Turn],
    options: &SendOptions,
    cancel: &CancellationToken,
) -> Result<String, String> {
    let mut deltas = cancellable(cancel, stream_text(transport, prompt, options))
        .await
        .and_then(|r| r)
        .map_err(|e| format!("summarization request failed: {}", e))?;

    let mut summary = String::new();
    loop {
        let next = cancellable(cancel, deltas.next())
            .await
            .map_err(|e| format!("summarization interrupted: {}", e))?;
        match next {
            Some(Ok(delta)) => summary.push_str(&delta),
            Some(Err(e)) => return Err(format!("summarization stream failed: {}", e)),
            None => break,
        }
    }

    let summary = summary.trim();
    if summary.is_empty() {
        return Err("summarization returned empty response".to_string());
    }
    Ok(summary.to_string())
}
