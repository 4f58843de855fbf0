//! Exact comparison of token sequences and first-divergence reports.

use std::fmt::Write as _;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tp_native::SectionFraming;
use tp_reference::ReferenceTokenizer;
use tp_types::{TokenId, TokenSequence};

/// Tokens decoded on each side of the divergence index.
pub const CONTEXT_RADIUS: usize = 10;

const INPUT_PREVIEW_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub index: usize,
    pub native_len: usize,
    pub reference_len: usize,
}

impl Divergence {
    #[must_use]
    pub fn is_length_mismatch(&self) -> bool {
        self.native_len != self.reference_len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Match,
    Mismatch(Divergence),
}

impl Comparison {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Structural equality: same length, same ids, same order.
#[must_use]
pub fn compare(native: &TokenSequence, reference: &TokenSequence) -> Comparison {
    if native == reference {
        return Comparison::Match;
    }
    Comparison::Mismatch(Divergence {
        index: first_divergence(native.as_slice(), reference.as_slice()),
        native_len: native.len(),
        reference_len: reference.len(),
    })
}

/// First index where the overlapping prefix differs, or the shorter length
/// when one sequence is a prefix of the other.
#[must_use]
pub fn first_divergence(native: &[TokenId], reference: &[TokenId]) -> usize {
    native
        .iter()
        .zip(reference)
        .position(|(n, r)| n != r)
        .unwrap_or_else(|| native.len().min(reference.len()))
}

/// `[max(0, i - 10), min(len, i + 10))`, clamped so the range is never
/// inverted.
#[must_use]
pub fn context_window(index: usize, reference_len: usize) -> Range<usize> {
    let end = index.saturating_add(CONTEXT_RADIUS).min(reference_len);
    let start = index.saturating_sub(CONTEXT_RADIUS).min(end);
    start..end
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum DecodeOutcome {
    Decoded(String),
    Failed(String),
}

impl DecodeOutcome {
    fn from_result<E: std::fmt::Display>(result: Result<String, E>) -> Self {
        match result {
            Ok(text) => Self::Decoded(text),
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenProbe {
    pub id: TokenId,
    pub text: DecodeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchReport {
    pub index: usize,
    pub native_len: usize,
    pub reference_len: usize,
    pub window_start: usize,
    pub window_end: usize,
    pub context_ids: Vec<TokenId>,
    pub context: DecodeOutcome,
    /// `None` when the native sequence ended before `index`.
    pub native_token: Option<TokenProbe>,
    /// `None` when the reference sequence ended before `index`.
    pub reference_token: Option<TokenProbe>,
    pub native_framing: Option<SectionFraming>,
    pub input_preview: String,
}

impl MismatchReport {
    #[must_use]
    pub fn is_length_mismatch(&self) -> bool {
        self.native_len != self.reference_len
    }

    #[must_use]
    pub fn with_framing(mut self, framing: SectionFraming) -> Self {
        self.native_framing = Some(framing);
        self
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let i = self.index;
        let _ = writeln!(out, "Input text: {}", self.input_preview);
        let _ = writeln!(out, "Mismatch detected at token index {i}:");
        match &self.context {
            DecodeOutcome::Decoded(text) => {
                let _ = writeln!(out, "Context string: {text:?}");
            }
            DecodeOutcome::Failed(err) => {
                let _ = writeln!(
                    out,
                    "Context string: <could not decode reference tokens [{}, {}): {err}>",
                    self.window_start, self.window_end
                );
            }
        }
        render_token_id(&mut out, "Native", self.native_token.as_ref(), i, self.native_len);
        render_token_id(
            &mut out,
            "Reference",
            self.reference_token.as_ref(),
            i,
            self.reference_len,
        );
        render_token_text(&mut out, "Native", self.native_token.as_ref());
        render_token_text(&mut out, "Reference", self.reference_token.as_ref());
        if self.is_length_mismatch() {
            let _ = writeln!(
                out,
                "Length mismatch: native={} reference={} (compared overlapping prefix of {})",
                self.native_len,
                self.reference_len,
                self.native_len.min(self.reference_len)
            );
        }
        match self.native_framing {
            Some(SectionFraming::Missing) => {
                let _ = writeln!(out, "Note: native output contained no token section");
            }
            Some(SectionFraming::Unterminated) => {
                let _ = writeln!(out, "Note: native token section was never terminated");
            }
            Some(SectionFraming::Complete) | None => {}
        }
        out
    }
}

fn render_token_id(
    out: &mut String,
    side: &str,
    probe: Option<&TokenProbe>,
    index: usize,
    len: usize,
) {
    let _ = match probe {
        Some(probe) => writeln!(out, "{side} Token: {} at position {index}", probe.id),
        None => writeln!(out, "{side} Token: <end of sequence, len={len}>"),
    };
}

fn render_token_text(out: &mut String, side: &str, probe: Option<&TokenProbe>) {
    let Some(probe) = probe else {
        return;
    };
    let _ = match &probe.text {
        DecodeOutcome::Decoded(text) => writeln!(out, "{side} Token text: {text:?}"),
        DecodeOutcome::Failed(err) => {
            writeln!(out, "Could not decode {side} token {}: {err}", probe.id)
        }
    };
}

/// Localize the first divergence and decode the surrounding reference
/// tokens. Every decode is best-effort: failures are recorded in the
/// report, never propagated.
pub fn explain<R: ReferenceTokenizer + ?Sized>(
    reference_tokenizer: &R,
    input_text: &str,
    native: &TokenSequence,
    reference: &TokenSequence,
) -> MismatchReport {
    let index = first_divergence(native.as_slice(), reference.as_slice());
    let window = context_window(index, reference.len());
    let context_ids = reference.as_slice()[window.clone()].to_vec();
    let context =
        DecodeOutcome::from_result(reference_tokenizer.decode(&context_ids, false));

    let probe = |id: TokenId| TokenProbe {
        id,
        text: DecodeOutcome::from_result(reference_tokenizer.decode_token(id)),
    };

    MismatchReport {
        index,
        native_len: native.len(),
        reference_len: reference.len(),
        window_start: window.start,
        window_end: window.end,
        context_ids,
        context,
        native_token: native.get(index).map(probe),
        reference_token: reference.get(index).map(probe),
        native_framing: None,
        input_preview: preview(input_text),
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(INPUT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head:?}... ({} bytes total)", text.len())
    } else {
        format!("{head:?}")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tp_native::SectionFraming;
    use tp_reference::{MockReference, ReferenceError, ReferenceTokenizer};
    use tp_types::{TokenId, TokenSequence};

    use super::{
        CONTEXT_RADIUS, Comparison, DecodeOutcome, Divergence, compare, context_window, explain,
    };

    fn seq(ids: &[TokenId]) -> TokenSequence {
        TokenSequence::from(ids)
    }

    fn pieces() -> MockReference {
        MockReference::new()
            .with_piece(1, "hel")
            .with_piece(2, "lo")
            .with_piece(3, " world")
            .with_piece(5, "l")
    }

    struct BrokenDecoder;

    impl ReferenceTokenizer for BrokenDecoder {
        fn name(&self) -> &str {
            "broken"
        }

        fn encode(&self, _text: &str) -> Result<TokenSequence, ReferenceError> {
            Ok(TokenSequence::new())
        }

        fn decode(&self, _ids: &[TokenId], _skip: bool) -> Result<String, ReferenceError> {
            Err(ReferenceError::Decode("vocabulary not loaded".to_owned()))
        }
    }

    #[test]
    fn equal_sequences_match() {
        assert_eq!(compare(&seq(&[1, 2]), &seq(&[1, 2])), Comparison::Match);
        assert!(compare(&seq(&[]), &seq(&[])).is_match());
    }

    #[test]
    fn substitution_is_located_at_first_differing_index() {
        assert_eq!(
            compare(&seq(&[1, 2, 3]), &seq(&[1, 5, 3])),
            Comparison::Mismatch(Divergence {
                index: 1,
                native_len: 3,
                reference_len: 3,
            })
        );
    }

    #[test]
    fn prefix_sequences_diverge_at_shorter_length() {
        let Comparison::Mismatch(divergence) = compare(&seq(&[]), &seq(&[4, 5])) else {
            panic!("expected mismatch");
        };
        assert_eq!(divergence.index, 0);
        assert!(divergence.is_length_mismatch());
    }

    #[test]
    fn explain_reports_substitution_with_decoded_tokens() {
        let report = explain(&pieces(), "hello world", &seq(&[1, 2, 3]), &seq(&[1, 5, 3]));
        assert_eq!(report.index, 1);
        assert_eq!((report.window_start, report.window_end), (0, 3));
        assert_eq!(report.context_ids, vec![1, 5, 3]);
        assert_eq!(report.context, DecodeOutcome::Decoded("hell world".to_owned()));
        let native = report.native_token.as_ref().expect("native token");
        let reference = report.reference_token.as_ref().expect("reference token");
        assert_eq!((native.id, reference.id), (2, 5));
        assert_eq!(native.text, DecodeOutcome::Decoded("lo".to_owned()));
        assert_eq!(reference.text, DecodeOutcome::Decoded("l".to_owned()));
        assert!(!report.is_length_mismatch());

        let text = report.render_plain();
        assert!(text.contains("Mismatch detected at token index 1:"), "{text}");
        assert!(text.contains("Native Token: 2 at position 1"), "{text}");
        assert!(text.contains("Reference Token: 5 at position 1"), "{text}");
        assert!(text.contains("Context string: \"hell world\""), "{text}");
    }

    #[test]
    fn explain_marks_undecodable_token_without_aborting() {
        let report = explain(&pieces(), "x", &seq(&[1, 77]), &seq(&[1, 2]));
        let native = report.native_token.expect("native token");
        assert!(matches!(native.text, DecodeOutcome::Failed(_)));
        let reference = report.reference_token.expect("reference token");
        assert_eq!(reference.text, DecodeOutcome::Decoded("lo".to_owned()));
    }

    #[test]
    fn explain_survives_when_every_decode_fails() {
        let report = explain(&BrokenDecoder, "x", &seq(&[1, 2, 3]), &seq(&[1, 5, 3]));
        assert!(matches!(report.context, DecodeOutcome::Failed(_)));
        let text = report.render_plain();
        assert!(text.contains("could not decode reference tokens [0, 3)"), "{text}");
        assert!(text.contains("Could not decode Native token 2"), "{text}");
        assert!(text.contains("Could not decode Reference token 5"), "{text}");
    }

    #[test]
    fn empty_native_output_is_reported_as_length_mismatch() {
        let report = explain(&pieces(), "hello", &seq(&[]), &seq(&[1, 2]))
            .with_framing(SectionFraming::Missing);
        assert_eq!(report.index, 0);
        assert!(report.native_token.is_none());
        assert_eq!(report.reference_token.as_ref().map(|p| p.id), Some(1));
        let text = report.render_plain();
        assert!(text.contains("Native Token: <end of sequence, len=0>"), "{text}");
        assert!(text.contains("Length mismatch: native=0 reference=2"), "{text}");
        assert!(text.contains("no token section"), "{text}");
    }

    #[test]
    fn window_is_clipped_at_both_ends() {
        assert_eq!(context_window(0, 3), 0..3);
        assert_eq!(context_window(15, 100), 5..25);
        assert_eq!(context_window(98, 100), 88..100);
        assert_eq!(context_window(4, 4), 0..4);
    }

    #[test]
    fn long_inputs_are_previewed() {
        let input = "a".repeat(2000);
        let report = explain(&pieces(), &input, &seq(&[1]), &seq(&[2]));
        assert!(report.input_preview.ends_with("(2000 bytes total)"));
    }

    proptest! {
        #[test]
        fn window_matches_closed_form(len in 0usize..200, offset in 0usize..200) {
            let index = offset.min(len);
            let window = context_window(index, len);
            prop_assert_eq!(window.start, index.saturating_sub(CONTEXT_RADIUS));
            prop_assert_eq!(window.end, (index + CONTEXT_RADIUS).min(len));
        }

        #[test]
        fn explain_never_panics_on_unequal_sequences(
            native in proptest::collection::vec(0u32..8, 0..40),
            reference in proptest::collection::vec(0u32..8, 0..40),
        ) {
            prop_assume!(native != reference);
            let native = TokenSequence::from(native);
            let reference = TokenSequence::from(reference);
            let report = explain(&BrokenDecoder, "input", &native, &reference);
            prop_assert!(report.window_start <= report.window_end);
            prop_assert!(report.window_end <= reference.len());
            prop_assert!(report.index <= native.len().min(reference.len()));
        }
    }
}
