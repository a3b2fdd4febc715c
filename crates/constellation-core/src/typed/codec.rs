//! MessageCodec - Message とバイト列の相互変換
//!
//! # ワイヤフォーマット
//! `[opcode: u8][body: JSON]`
//!
//! body は serde_json でエンコードした `Message` 全体です。先頭の opcode
//! は body を読まずに制御系／データ系を振り分けるためのもので、
//! デコード時に body と一致するかを検査します。

use crate::domain::{Message, Opcode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("opcode header {header:?} does not match body {body:?}")]
    OpcodeMismatch { header: Opcode, body: Opcode },

    #[error("json: {0}")]
    Json(String),
}

pub struct MessageCodec;

impl MessageCodec {
    pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
        let body = serde_json::to_vec(message).map_err(|e| CodecError::Json(e.to_string()))?;
        let mut frame = Vec::with_capacity(body.len() + 1);
        frame.push(message.opcode().as_byte());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Opcode of a frame without decoding the body.
    pub fn peek_opcode(frame: &[u8]) -> Result<Opcode, CodecError> {
        let (&first, _) = frame.split_first().ok_or(CodecError::Empty)?;
        Opcode::from_byte(first).ok_or(CodecError::UnknownOpcode(first))
    }

    pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
        let header = Self::peek_opcode(frame)?;
        let message: Message =
            serde_json::from_slice(&frame[1..]).map_err(|e| CodecError::Json(e.to_string()))?;
        let body = message.opcode();
        if body != header {
            return Err(CodecError::OpcodeMismatch { header, body });
        }
        Ok(message)
    }
}
