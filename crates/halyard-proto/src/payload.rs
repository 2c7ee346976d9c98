//! Payload encodings.

use bytes::Bytes;

/// Payload encoding carried by the frame tag.
///
/// The framework never transcodes: UTF-16 data travels as the supplied
/// big-endian byte pairs, which is why its length must be even.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Binary,
    Utf8,
    Utf16,
}

/// An opaque payload tagged with its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub encoding: Encoding,
    pub data: Bytes,
}

impl Payload {
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            encoding: Encoding::Binary,
            data: data.into(),
        }
    }

    pub fn utf8(data: impl Into<Bytes>) -> Self {
        Self {
            encoding: Encoding::Utf8,
            data: data.into(),
        }
    }

    /// UTF-16 payload from big-endian byte pairs, as supplied.
    pub fn utf16(data: impl Into<Bytes>) -> Self {
        Self {
            encoding: Encoding::Utf16,
            data: data.into(),
        }
    }

    /// UTF-8 payload from a string.
    pub fn text(text: impl Into<String>) -> Self {
        Self::utf8(text.into().into_bytes())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::binary(Bytes::new())
    }
}
