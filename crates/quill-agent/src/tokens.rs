//! Heuristic token estimation
//!
//! CJK ideographs tokenize far denser than Latin script, so they are counted
//! at two units each while everything else is counted at four characters per
//! unit, rounded up.

use quill_ai::Turn;

const CJK_UNITS_PER_CHAR: u32 = 2;
const CHARS_PER_UNIT: u32 = 4;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Estimate the cost of a piece of text
pub fn estimate_text(text: &str) -> u32 {
    let (cjk, other) = text.chars().fold((0u32, 0u32), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    cjk * CJK_UNITS_PER_CHAR + other.div_ceil(CHARS_PER_UNIT)
}

/// Estimate the cost of a single turn (content only)
pub fn estimate_turn(turn: &Turn) -> u32 {
    estimate_text(&turn.content)
}

/// Estimate total cost for a slice of turns
pub fn estimate_turns(turns: &[Turn]) -> u32 {
    turns.iter().map(estimate_turn).sum()
}
