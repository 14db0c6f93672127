//! In-memory delta representation and replay.

use protocol::ProtocolError;
use signature::SignatureLayout;

use crate::{MatchError, TokenSink};

/// One instruction of a recorded delta.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeltaToken {
    /// Bytes to write as-is.
    Literal(Vec<u8>),
    /// Basis block to copy.
    Block(u32),
}

/// Matcher output captured in memory.
///
/// Adjacent literal chunks are merged into a single [`DeltaToken::Literal`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeltaScript {
    tokens: Vec<DeltaToken>,
    digest: Vec<u8>,
    finished: bool,
}

impl DeltaScript {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded tokens.
    #[must_use]
    pub fn tokens(&self) -> &[DeltaToken] {
        &self.tokens
    }

    /// Whole-file digest reported after the tokens.
    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Whether the end token was seen.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total literal bytes.
    #[must_use]
    pub fn literal_bytes(&self) -> usize {
        self.tokens
            .iter()
            .map(|token| match token {
                DeltaToken::Literal(data) => data.len(),
                DeltaToken::Block(_) => 0,
            })
            .sum()
    }

    /// Number of block references.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|token| matches!(token, DeltaToken::Block(_)))
            .count()
    }

    /// Rebuilds the new file from `basis`, whose signature had `layout`.
    pub fn apply(&self, basis: &[u8], layout: &SignatureLayout) -> Result<Vec<u8>, MatchError> {
        let mut out = Vec::with_capacity(basis.len() + self.literal_bytes());
        for token in &self.tokens {
            match token {
                DeltaToken::Literal(data) => out.extend_from_slice(data),
                DeltaToken::Block(index) => {
                    let index = *index;
                    let invalid = || MatchError::InvalidBlock {
                        index,
                        count: layout.block_count(),
                    };
                    if index >= layout.block_count() {
                        return Err(invalid());
                    }
                    let start =
                        usize::try_from(layout.block_offset(index)).map_err(|_| invalid())?;
                    let end = start + layout.block_len_at(index) as usize;
                    out.extend_from_slice(basis.get(start..end).ok_or_else(invalid)?);
                }
            }
        }
        Ok(out)
    }
}

impl TokenSink for DeltaScript {
    fn literal(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if let Some(DeltaToken::Literal(last)) = self.tokens.last_mut() {
            last.extend_from_slice(data);
        } else if !data.is_empty() {
            self.tokens.push(DeltaToken::Literal(data.to_vec()));
        }
        Ok(())
    }

    fn block(&mut self, index: u32) -> Result<(), ProtocolError> {
        self.tokens.push(DeltaToken::Block(index));
        Ok(())
    }

    fn end(&mut self) -> Result<(), ProtocolError> {
        self.finished = true;
        Ok(())
    }

    fn file_digest(&mut self, digest: &[u8]) -> Result<(), ProtocolError> {
        self.digest = digest.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::DigestConfig;
    use protocol::ProtocolVersion;
    use signature::{LayoutParams, generate_signature, sum_sizes_sqroot};
    use std::io::Cursor;

    #[test]
    fn literals_merge() {
        let mut script = DeltaScript::new();
        script.literal(b"ab").unwrap();
        script.literal(b"cd").unwrap();
        script.block(3).unwrap();
        script.literal(b"e").unwrap();
        assert_eq!(
            script.tokens(),
            [
                DeltaToken::Literal(b"abcd".to_vec()),
                DeltaToken::Block(3),
                DeltaToken::Literal(b"e".to_vec()),
            ]
        );
        assert_eq!(script.literal_bytes(), 5);
        assert_eq!(script.block_count(), 1);
    }

    #[test]
    fn apply_copies_blocks_including_short_tail() {
        let basis: Vec<u8> = (0..1_500u32).map(|i| (i % 200) as u8).collect();
        let layout = sum_sizes_sqroot(1_500, LayoutParams::new(ProtocolVersion::DEFAULT, 2)).unwrap();
        let mut script = DeltaScript::new();
        script.block(2).unwrap();
        script.literal(b"--").unwrap();
        script.block(0).unwrap();

        let out = script.apply(&basis, &layout).unwrap();
        let mut expected = basis[1_400..].to_vec();
        expected.extend_from_slice(b"--");
        expected.extend_from_slice(&basis[..700]);
        assert_eq!(out, expected);

        let set = generate_signature(Cursor::new(basis), layout, &DigestConfig::default()).unwrap();
        assert_eq!(set.blocks()[2].length(), 100);
    }

    #[test]
    fn out_of_range_block_is_an_error() {
        let layout = sum_sizes_sqroot(10, LayoutParams::new(ProtocolVersion::DEFAULT, 2)).unwrap();
        let mut script = DeltaScript::new();
        script.block(1).unwrap();
        assert!(matches!(
            script.apply(&[0; 10], &layout),
            Err(MatchError::InvalidBlock { index: 1, count: 1 })
        ));
    }
}
