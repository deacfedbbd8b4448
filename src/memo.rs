//! Memo-field byte layout
//!
//! The memo field rides inside the encrypted note plaintext. Its first 32
//! bytes are structured: output type, sender random, and an optional wallet
//! source tag. Any remaining bytes are length-prefixed UTF-8 memo text.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Sender-random value that hides the sender's identity
pub const MEMO_SENDER_RANDOM_NULL: [u8; 15] = [0xff; 15];

const WALLET_SOURCE_MAX: usize = 15;

/// What role an output note plays in its transaction
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum OutputType {
    Transfer,
    RelayerFee,
    Change,
}

impl OutputType {
    pub fn as_u8(&self) -> u8 {
        match self {
            OutputType::Transfer => 0,
            OutputType::RelayerFee => 1,
            OutputType::Change => 2,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OutputType::Transfer),
            1 => Some(OutputType::RelayerFee),
            2 => Some(OutputType::Change),
            _ => None,
        }
    }
}

/// Decoded memo field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoField {
    pub output_type: OutputType,
    pub sender_random: [u8; 15],
    pub wallet_source: Option<String>,
    pub text: Option<String>,
}

impl MemoField {
    /// Memo for an output whose sender stays hidden
    pub fn hidden_sender(output_type: OutputType) -> Self {
        Self {
            output_type,
            sender_random: MEMO_SENDER_RANDOM_NULL,
            wallet_source: None,
            text: None,
        }
    }

    pub fn hides_sender(&self) -> bool {
        self.sender_random == MEMO_SENDER_RANDOM_NULL
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 2 + self.text.as_ref().map_or(0, |t| t.len()));
        out.push(self.output_type.as_u8());
        out.extend_from_slice(&self.sender_random);

        let source = self.wallet_source.as_deref().unwrap_or("");
        let source_bytes = &source.as_bytes()[..source.len().min(WALLET_SOURCE_MAX)];
        out.push(source_bytes.len() as u8);
        out.extend_from_slice(source_bytes);
        out.resize(32, 0);

        let text = self.text.as_deref().unwrap_or("");
        out.extend_from_slice(&(text.len() as u16).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() < 34 {
            return Err(EngineError::InvalidNoteData("memo field too short".into()));
        }
        let output_type = OutputType::from_u8(bytes[0])
            .ok_or_else(|| EngineError::InvalidNoteData(format!("bad output type {}", bytes[0])))?;

        let mut sender_random = [0u8; 15];
        sender_random.copy_from_slice(&bytes[1..16]);

        let source_len = bytes[16] as usize;
        if source_len > WALLET_SOURCE_MAX {
            return Err(EngineError::InvalidNoteData("wallet source too long".into()));
        }
        let wallet_source = if source_len == 0 {
            None
        } else {
            let raw = &bytes[17..17 + source_len];
            Some(
                std::str::from_utf8(raw)
                    .map_err(|_| EngineError::InvalidNoteData("wallet source not utf-8".into()))?
                    .to_string(),
            )
        };

        let text_len = u16::from_be_bytes([bytes[32], bytes[33]]) as usize;
        if bytes.len() < 34 + text_len {
            return Err(EngineError::InvalidNoteData("memo text truncated".into()));
        }
        let text = if text_len == 0 {
            None
        } else {
            Some(
                std::str::from_utf8(&bytes[34..34 + text_len])
                    .map_err(|_| EngineError::InvalidNoteData("memo text not utf-8".into()))?
                    .to_string(),
            )
        };

        Ok(Self {
            output_type,
            sender_random,
            wallet_source,
            text,
        })
    }
}
