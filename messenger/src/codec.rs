use bytes::Bytes;

use crate::error::CodecError;

/// Converts application messages to and from link payloads.
///
/// The messenger never looks inside a payload; it only calls the codec when a
/// message is handed to the send link or arrives on the receive link.
pub trait MessageCodec<M> {
    fn encode(&self, message: &M) -> Result<Bytes, CodecError>;
    fn decode(&self, payload: Bytes) -> Result<M, CodecError>;
}

/// Pass-through codec for messages that already are payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl MessageCodec<Bytes> for RawCodec {
    fn encode(&self, message: &Bytes) -> Result<Bytes, CodecError> {
        Ok(message.clone())
    }

    fn decode(&self, payload: Bytes) -> Result<Bytes, CodecError> {
        Ok(payload)
    }
}

/// UTF-8 text messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl MessageCodec<String> for Utf8Codec {
    fn encode(&self, message: &String) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }

    fn decode(&self, payload: Bytes) -> Result<String, CodecError> {
        String::from_utf8(payload.to_vec()).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
