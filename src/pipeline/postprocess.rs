//! Post-processing: deterministic cleanup of model-generated descriptions.
//!
//! Even well-prompted models wrap answers in fences or quotes, open with
//! "Image of", or end with a full stop that screen readers announce as a
//! pause. These rules fix such quirks without touching content. Each rule
//! is a pure `&str → String` function and independently testable.
//!
//! ## Rule Order
//!
//! Fences come off before whitespace is collapsed (the fence regex needs the
//! newlines), quotes come off before lead-ins (a quoted "Image of …" would
//! otherwise survive), and capitalisation runs last.

use crate::model::Description;
use crate::prompts::{ARTIFACT_SENTINEL, DECORATIVE_SENTINEL};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw model reply.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Collapse all whitespace runs, including newlines, to one space
/// 4. Strip wrapping quotes
/// 5. Drop "Alt text:" style labels and "Image of" style lead-ins
/// 6. Drop trailing periods
/// 7. Capitalise the first letter
pub fn clean_description(input: &str) -> String {
    let s = strip_fences(input);
    let s = remove_invisible_chars(&s);
    let s = collapse_whitespace(&s);
    let s = strip_wrapping_quotes(&s);
    let s = strip_lead_ins(&s);
    let s = strip_trailing_periods(&s);
    capitalise_first(&s)
}

/// Map a raw figure-model reply to a [`Description`].
///
/// The sentinels are matched case-insensitively after quotes, fences and
/// punctuation are removed, so `"Artifact."` still reclassifies the node.
/// Only a blank reply or the decorative sentinel means empty text. A reply
/// that has characters but no content (a bare label, empty quotes) yields
/// `None`.
pub fn interpret_image_reply(raw: &str, clean: bool) -> Option<Description> {
    if raw.trim().is_empty() {
        return Some(Description::decorative());
    }
    let bare = strip_wrapping_quotes(&collapse_whitespace(&strip_fences(raw)));
    let bare = bare.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());

    if bare.eq_ignore_ascii_case(ARTIFACT_SENTINEL) {
        return Some(Description::Artifact);
    }
    if bare.eq_ignore_ascii_case(DECORATIVE_SENTINEL) {
        return Some(Description::decorative());
    }
    if bare.is_empty() {
        return None;
    }

    let text = if clean {
        clean_description(raw)
    } else {
        raw.trim().to_string()
    };
    (!text.is_empty()).then_some(Description::Text(text))
}

// ── Rule 1: Strip outer fences ───────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n?(.*?)\n?```$").unwrap());

fn strip_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").to_string()
}

// ── Rule 4: Strip wrapping quotes ────────────────────────────────────────────

fn strip_wrapping_quotes(input: &str) -> String {
    input
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’' | '`'))
        .trim()
        .to_string()
}

// ── Rule 5: Strip lead-ins ───────────────────────────────────────────────────

static RE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:alt(?:ernative)?[ -]?text|description|caption)\s*:\s*").unwrap()
});

static RE_LEAD_IN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:an?\s+|the\s+)?(?:image|picture|photo|photograph|illustration|graphic|icon)\s+(?:of|showing|depicting)\s+",
    )
    .unwrap()
});

fn strip_lead_ins(input: &str) -> String {
    let s = RE_LABEL.replace(input, "");
    let s = strip_wrapping_quotes(&s);
    RE_LEAD_IN.replace(&s, "").to_string()
}

// ── Rule 6: Strip trailing periods ───────────────────────────────────────────

fn strip_trailing_periods(input: &str) -> String {
    input.trim_end_matches('.').trim_end().to_string()
}

// ── Rule 7: Capitalise ───────────────────────────────────────────────────────

fn capitalise_first(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
