//! Token-section framing emitted by the native tokenizer on stdout.
//!
//! ```text
//! <free-form log lines>
//! ===== TOKENS START=====
//! 15496
//! 995
//! ===== TOKENS END ======
//! <ignored>
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tp_types::{TokenSequence, TypeError, parse_token_id};

pub const TOKENS_START: &str = "===== TOKENS START=====";
pub const TOKENS_END: &str = "===== TOKENS END ======";

/// How the token section was delimited in the captured stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionFraming {
    /// Both sentinels were present.
    Complete,
    /// Start sentinel seen, stdout ended before the end sentinel.
    Unterminated,
    /// No start sentinel: the tool emitted no token section at all.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStream {
    pub tokens: TokenSequence,
    pub framing: SectionFraming,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed token section at stdout line {line_number}: {source}")]
pub struct ProtocolError {
    pub line_number: usize,
    #[source]
    pub source: TypeError,
}

/// Extract the token ids between the start and end sentinels.
///
/// Lines are trimmed before matching. A missing start sentinel yields an
/// empty sequence with [`SectionFraming::Missing`]; any non-integer line
/// inside the section is an error.
pub fn parse_token_section(stdout: &str) -> Result<TokenStream, ProtocolError> {
    let mut tokens = TokenSequence::new();
    let mut in_section = false;

    for (idx, raw) in stdout.lines().enumerate() {
        let line = raw.trim();
        if !in_section {
            in_section = line == TOKENS_START;
            continue;
        }
        if line == TOKENS_END {
            return Ok(TokenStream {
                tokens,
                framing: SectionFraming::Complete,
            });
        }
        let id = parse_token_id(line).map_err(|source| ProtocolError {
            line_number: idx + 1,
            source,
        })?;
        tokens.push(id);
    }

    Ok(TokenStream {
        tokens,
        framing: if in_section {
            SectionFraming::Unterminated
        } else {
            SectionFraming::Missing
        },
    })
}
