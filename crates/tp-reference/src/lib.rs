#![forbid(unsafe_code)]

//! Trusted reference tokenizers.
//!
//! The harness treats the reference as ground truth: `encode` produces the
//! sequence the native implementation must match, `decode` turns ids back
//! into text for mismatch diagnostics. Decode failures are ordinary values
//! here; callers decide whether they matter.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tp_types::{TokenId, TokenSequence};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("failed to load reference tokenizer from {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
    #[error("reference encode failed: {0}")]
    Encode(String),
    #[error("reference decode failed: {0}")]
    Decode(String),
    #[error("token id {id} is not in the reference vocabulary")]
    UnknownTokenId { id: TokenId },
}

pub trait ReferenceTokenizer {
    /// Short label used in reports.
    fn name(&self) -> &str;

    fn encode(&self, text: &str) -> Result<TokenSequence, ReferenceError>;

    fn decode(&self, ids: &[TokenId], skip_special: bool) -> Result<String, ReferenceError>;

    /// Decode a single id with special tokens kept.
    fn decode_token(&self, id: TokenId) -> Result<String, ReferenceError> {
        self.decode(&[id], false)
    }
}

impl<T: ReferenceTokenizer + ?Sized> ReferenceTokenizer for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn encode(&self, text: &str) -> Result<TokenSequence, ReferenceError> {
        (**self).encode(text)
    }

    fn decode(&self, ids: &[TokenId], skip_special: bool) -> Result<String, ReferenceError> {
        (**self).decode(ids, skip_special)
    }
}

/// Hugging Face `tokenizer.json` loaded through the `tokenizers` crate.
pub struct HfReference {
    inner: tokenizers::Tokenizer,
    add_special_tokens: bool,
    source: PathBuf,
}

impl HfReference {
    pub fn from_file(path: &Path, add_special_tokens: bool) -> Result<Self, ReferenceError> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|err| ReferenceError::Load {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            inner,
            add_special_tokens,
            source: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl std::fmt::Debug for HfReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfReference")
            .field("source", &self.source)
            .field("add_special_tokens", &self.add_special_tokens)
            .finish_non_exhaustive()
    }
}

impl ReferenceTokenizer for HfReference {
    fn name(&self) -> &str {
        "hf_json"
    }

    fn encode(&self, text: &str) -> Result<TokenSequence, ReferenceError> {
        let encoding = self
            .inner
            .encode(text, self.add_special_tokens)
            .map_err(|err| ReferenceError::Encode(err.to_string()))?;
        Ok(encoding.get_ids().iter().copied().collect())
    }

    fn decode(&self, ids: &[TokenId], skip_special: bool) -> Result<String, ReferenceError> {
        // `tokenizers` silently drops ids it does not know; surface them instead.
        if let Some(&id) = ids.iter().find(|id| self.inner.id_to_token(**id).is_none()) {
            return Err(ReferenceError::UnknownTokenId { id });
        }
        self.inner
            .decode(ids, skip_special)
            .map_err(|err| ReferenceError::Decode(err.to_string()))
    }
}

/// Canned reference for tests and offline replays: encodings are looked up
/// by exact input text, decoding concatenates registered pieces.
#[derive(Debug, Clone, Default)]
pub struct MockReference {
    encodings: HashMap<String, Vec<TokenId>>,
    pieces: BTreeMap<TokenId, String>,
    special: BTreeSet<TokenId>,
}

impl MockReference {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encoding(mut self, text: impl Into<String>, ids: Vec<TokenId>) -> Self {
        self.encodings.insert(text.into(), ids);
        self
    }

    #[must_use]
    pub fn with_piece(mut self, id: TokenId, piece: impl Into<String>) -> Self {
        self.pieces.insert(id, piece.into());
        self
    }

    #[must_use]
    pub fn with_special(mut self, id: TokenId, piece: impl Into<String>) -> Self {
        self.special.insert(id);
        self.with_piece(id, piece)
    }
}

impl ReferenceTokenizer for MockReference {
    fn name(&self) -> &str {
        "mock"
    }

    fn encode(&self, text: &str) -> Result<TokenSequence, ReferenceError> {
        self.encodings
            .get(text)
            .map(|ids| TokenSequence::from(ids.clone()))
            .ok_or_else(|| ReferenceError::Encode(format!("no canned encoding for {text:?}")))
    }

    fn decode(&self, ids: &[TokenId], skip_special: bool) -> Result<String, ReferenceError> {
        let mut out = String::new();
        for id in ids {
            let piece = self
                .pieces
                .get(id)
                .ok_or(ReferenceError::UnknownTokenId { id: *id })?;
            if skip_special && self.special.contains(id) {
                continue;
            }
            out.push_str(piece);
        }
        Ok(out)
    }
}
