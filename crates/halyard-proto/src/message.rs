//! Frame parsing.

use core::fmt;

use bytes::Bytes;

use crate::{Encoding, MessageKind, ParseError, Payload};

/// An 8-byte request correlation id.
///
/// Unique per connection among in-flight requests; values are reused once a
/// request terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId([u8; 8]);

impl RequestId {
    pub const ZERO: RequestId = RequestId([0; 8]);

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A decoded frame.
///
/// `ident` is present exactly for the id-bearing kinds, `name` only for
/// requests and signals that carry one. Payload-less kinds decode with an
/// empty binary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub ident: Option<RequestId>,
    pub name: Option<String>,
    pub payload: Payload,
}

impl Message {
    /// Parse one frame.
    ///
    /// Frame shapes by kind:
    ///
    /// ```text
    /// request         [kind][id:8][nameLen:1][name][payload…]
    /// signal          [kind][nameLen:1][name][payload…]
    /// reply (bin/u8)  [kind][id:8][payload…]
    /// reply (u16)     [kind][id:8][pad:1][payload…]
    /// error reply     [kind][id:8][json ReqErr]
    /// typed failure   [kind][id:8]
    /// restore session [kind][id:8][key…]
    /// close session   [kind][id:8]
    /// session created [kind][json Session]
    /// session closed  [kind]
    /// ```
    ///
    /// The UTF-16 reply pad byte keeps the payload word-aligned behind the
    /// 8-byte id; signals have no id, so their payload already sits at
    /// offset 2 when unnamed. Both offsets are wire facts.
    pub fn parse(raw: &[u8]) -> Result<Message, ParseError> {
        let first = *raw.first().ok_or(ParseError::Empty)?;
        let kind = MessageKind::from_u8(first).ok_or(ParseError::UnknownKind(first))?;

        match kind {
            MessageKind::ReplyBinary | MessageKind::ReplyUtf8 => {
                let ident = parse_ident(kind, raw)?;
                let encoding = match kind {
                    MessageKind::ReplyBinary => Encoding::Binary,
                    _ => Encoding::Utf8,
                };
                Ok(Message {
                    kind,
                    ident: Some(ident),
                    name: None,
                    payload: Payload {
                        encoding,
                        data: Bytes::copy_from_slice(&raw[9..]),
                    },
                })
            }
            MessageKind::ReplyUtf16 => {
                let ident = parse_ident(kind, raw)?;
                if raw.len() < 10 {
                    return Err(ParseError::Truncated {
                        kind,
                        ident: Some(ident),
                    });
                }
                let data = &raw[10..];
                check_utf16_parity(kind, Some(ident), data.len())?;
                Ok(Message {
                    kind,
                    ident: Some(ident),
                    name: None,
                    payload: Payload::utf16(Bytes::copy_from_slice(data)),
                })
            }
            MessageKind::ErrorReply => {
                let ident = parse_ident(kind, raw)?;
                Ok(Message {
                    kind,
                    ident: Some(ident),
                    name: None,
                    payload: Payload::utf8(Bytes::copy_from_slice(&raw[9..])),
                })
            }
            MessageKind::ReplyShutdown
            | MessageKind::ReplyInternalError
            | MessageKind::SessionNotFound
            | MessageKind::MaxSessConnsReached
            | MessageKind::SessionsDisabled
            | MessageKind::ReplyProtocolError
            | MessageKind::CloseSession => {
                let ident = parse_ident(kind, raw)?;
                Ok(Message {
                    kind,
                    ident: Some(ident),
                    name: None,
                    payload: Payload::default(),
                })
            }
            MessageKind::RestoreSession => {
                let ident = parse_ident(kind, raw)?;
                Ok(Message {
                    kind,
                    ident: Some(ident),
                    name: None,
                    payload: Payload::utf8(Bytes::copy_from_slice(&raw[9..])),
                })
            }
            MessageKind::SessionCreated => Ok(Message {
                kind,
                ident: None,
                name: None,
                payload: Payload::utf8(Bytes::copy_from_slice(&raw[1..])),
            }),
            MessageKind::SessionClosed => Ok(Message {
                kind,
                ident: None,
                name: None,
                payload: Payload::default(),
            }),
            MessageKind::SignalBinary | MessageKind::SignalUtf8 | MessageKind::SignalUtf16 => {
                let (name, payload_bytes) = parse_named_tail(kind, None, &raw[1..])?;
                let encoding = kind.encoding().unwrap_or(Encoding::Binary);
                if encoding == Encoding::Utf16 {
                    check_utf16_parity(kind, None, payload_bytes.len())?;
                }
                Ok(Message {
                    kind,
                    ident: None,
                    name,
                    payload: Payload {
                        encoding,
                        data: Bytes::copy_from_slice(payload_bytes),
                    },
                })
            }
            MessageKind::RequestBinary | MessageKind::RequestUtf8 | MessageKind::RequestUtf16 => {
                let ident = parse_ident(kind, raw)?;
                let (name, payload_bytes) = parse_named_tail(kind, Some(ident), &raw[9..])?;
                let encoding = kind.encoding().unwrap_or(Encoding::Binary);
                if encoding == Encoding::Utf16 {
                    check_utf16_parity(kind, Some(ident), payload_bytes.len())?;
                }
                Ok(Message {
                    kind,
                    ident: Some(ident),
                    name,
                    payload: Payload {
                        encoding,
                        data: Bytes::copy_from_slice(payload_bytes),
                    },
                })
            }
        }
    }
}

/// Extract the 8-byte id following the kind tag.
fn parse_ident(kind: MessageKind, raw: &[u8]) -> Result<RequestId, ParseError> {
    if raw.len() < 9 {
        return Err(ParseError::Truncated { kind, ident: None });
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[1..9]);
    Ok(RequestId::from_bytes(bytes))
}

/// Parse `[nameLen:1][name][payload…]` from the tail of a request or signal.
fn parse_named_tail<'a>(
    kind: MessageKind,
    ident: Option<RequestId>,
    tail: &'a [u8],
) -> Result<(Option<String>, &'a [u8]), ParseError> {
    let name_len = *tail.first().ok_or(ParseError::Truncated { kind, ident })? as usize;
    let rest = &tail[1..];
    if name_len > rest.len() {
        return Err(ParseError::NameOverrun { kind, ident });
    }
    let (name_bytes, payload) = rest.split_at(name_len);
    let name = if name_bytes.is_empty() {
        None
    } else {
        Some(
            String::from_utf8(name_bytes.to_vec())
                .map_err(|_| ParseError::BadName { kind, ident })?,
        )
    };
    Ok((name, payload))
}

fn check_utf16_parity(
    kind: MessageKind,
    ident: Option<RequestId>,
    len: usize,
) -> Result<(), ParseError> {
    if len % 2 != 0 {
        return Err(ParseError::OddUtf16 { kind, ident });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_reply_at_offset_nine() {
        let raw = [&[191u8][..], &[0, 0, 0, 0, 0, 0, 0, 7][..], b"abc"].concat();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.kind, MessageKind::ReplyBinary);
        assert_eq!(msg.ident, Some(RequestId::from_u64(7)));
        assert_eq!(msg.payload.encoding, Encoding::Binary);
        assert_eq!(&msg.payload.data[..], b"abc");
    }

    #[test]
    fn parses_utf16_reply_at_offset_ten() {
        // Pad byte at index 9 is not part of the payload.
        let raw = [
            &[193u8][..],
            &[0, 0, 0, 0, 0, 0, 0, 1][..],
            &[0][..],
            &[0x00, 0x68, 0x00, 0x69][..],
        ]
        .concat();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.payload.encoding, Encoding::Utf16);
        assert_eq!(&msg.payload.data[..], &[0x00, 0x68, 0x00, 0x69]);
    }

    #[test]
    fn rejects_odd_utf16_reply() {
        let raw = [
            &[193u8][..],
            &[0, 0, 0, 0, 0, 0, 0, 1][..],
            &[0][..],
            &[0x00, 0x68, 0x00][..],
        ]
        .concat();
        let err = Message::parse(&raw).unwrap_err();
        assert!(matches!(err, ParseError::OddUtf16 { .. }));
        assert_eq!(err.recoverable_ident(), Some(RequestId::from_u64(1)));
    }

    #[test]
    fn parses_unnamed_signal_payload_at_offset_two() {
        let raw = [&[63u8][..], &[0][..], b"ping"].concat();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.kind, MessageKind::SignalBinary);
        assert_eq!(msg.ident, None);
        assert_eq!(msg.name, None);
        assert_eq!(&msg.payload.data[..], b"ping");
    }

    #[test]
    fn parses_named_request() {
        let raw = [
            &[128u8][..],
            &[0, 0, 0, 0, 0, 0, 0, 9][..],
            &[5][..],
            b"login",
            b"credentials",
        ]
        .concat();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.kind, MessageKind::RequestUtf8);
        assert_eq!(msg.name.as_deref(), Some("login"));
        assert_eq!(&msg.payload.data[..], b"credentials");
    }

    #[test]
    fn name_overrun_keeps_recoverable_ident() {
        // Name length claims 3 bytes but only 1 follows.
        let raw = [&[127u8][..], &[0, 0, 0, 0, 0, 0, 0, 0][..], &[3, 0x41][..]].concat();
        let err = Message::parse(&raw).unwrap_err();
        assert!(matches!(err, ParseError::NameOverrun { .. }));
        assert_eq!(err.recoverable_ident(), Some(RequestId::ZERO));
    }

    #[test]
    fn unknown_tag_has_no_recoverable_ident() {
        let err = Message::parse(&[200u8, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap_err();
        assert_eq!(err, ParseError::UnknownKind(200));
        assert_eq!(err.recoverable_ident(), None);
    }

    #[test]
    fn truncated_request_without_full_ident_is_unrecoverable() {
        let err = Message::parse(&[127u8, 1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Truncated { ident: None, .. }
        ));
    }

    #[test]
    fn restore_session_carries_key_as_payload() {
        let raw = [&[32u8][..], &[0, 0, 0, 0, 0, 0, 0, 2][..], b"somekey"].concat();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.kind, MessageKind::RestoreSession);
        assert_eq!(&msg.payload.data[..], b"somekey");
    }

    #[test]
    fn session_closed_is_a_bare_tag() {
        let msg = Message::parse(&[22u8]).unwrap();
        assert_eq!(msg.kind, MessageKind::SessionClosed);
        assert!(msg.payload.is_empty());
    }
}
