#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A vocabulary entry identifier emitted by a tokenizer.
pub type TokenId = u32;

/// Ordered token ids produced for one input. Order and length are part of
/// the value: two sequences are equal only if they agree pairwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSequence(Vec<TokenId>);

impl TokenSequence {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, id: TokenId) {
        self.0.push(id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<TokenId> {
        self.0.get(index).copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[TokenId] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<TokenId>> for TokenSequence {
    fn from(ids: Vec<TokenId>) -> Self {
        Self(ids)
    }
}

impl From<&[TokenId]> for TokenSequence {
    fn from(ids: &[TokenId]) -> Self {
        Self(ids.to_vec())
    }
}

impl FromIterator<TokenId> for TokenSequence {
    fn from_iter<I: IntoIterator<Item = TokenId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl AsRef<[TokenId]> for TokenSequence {
    fn as_ref(&self) -> &[TokenId] {
        &self.0
    }
}

impl fmt::Display for TokenSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Parse one already-trimmed line of a token section as a base-10 id.
pub fn parse_token_id(line: &str) -> Result<TokenId, TypeError> {
    line.parse::<TokenId>()
        .map_err(|err| TypeError::InvalidTokenId {
            line: line.to_owned(),
            reason: err.to_string(),
        })
}

/// Stable test identifier derived from a fixture's 1-based discovery index
/// and its file name, e.g. `test_file_3_emoji_txt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn for_fixture(index: usize, file_name: &str) -> Result<Self, TypeError> {
        if index == 0 {
            return Err(TypeError::ZeroCaseIndex {
                file_name: file_name.to_owned(),
            });
        }
        Ok(Self(format!(
            "test_file_{index}_{}",
            file_name.replace('.', "_")
        )))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fixture file materialized as a test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCase {
    pub id: CaseId,
    pub index: usize,
    pub file_name: String,
    pub text: String,
}

impl InputCase {
    /// Trailing whitespace of `raw_text` is stripped; everything else is
    /// passed through untouched.
    pub fn new(index: usize, file_name: &str, raw_text: &str) -> Result<Self, TypeError> {
        Ok(Self {
            id: CaseId::for_fixture(index, file_name)?,
            index,
            file_name: file_name.to_owned(),
            text: raw_text.trim_end().to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("invalid token id {line:?}: {reason}")]
    InvalidTokenId { line: String, reason: String },
    #[error("case index for {file_name} must be 1-based, got 0")]
    ZeroCaseIndex { file_name: String },
}
