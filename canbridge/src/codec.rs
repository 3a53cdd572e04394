//! Message serialization interface

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The output buffer can not hold the serialized message
    BufferTooSmall,
    /// The input bytes do not form a valid message
    Malformed,
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::BufferTooSmall => f.write_str("buffer too small"),
            CodecError::Malformed => f.write_str("malformed message"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Byte-level representation of a message type
pub trait Codec {
    type Message;

    /// Upper bound of the serialized size
    const EXTENT: usize;

    /// Writes the message to the buffer. Returns the number of bytes written.
    fn serialize(&self, message: &Self::Message, buffer: &mut [u8]) -> Result<usize, CodecError>;

    /// Parses a message. Trailing bytes beyond the message are ignored, so zero padding added
    /// by the bus is accepted.
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Message, CodecError>;
}
