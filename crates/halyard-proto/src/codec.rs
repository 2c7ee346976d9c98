//! Frame construction.
//!
//! Builders assemble complete frames as owned byte buffers; a frame maps
//! one-to-one onto a binary WebSocket message. Validation happens here so
//! every buffer these functions return is well-formed on the wire.

use bytes::Bytes;

use crate::{EncodeError, Encoding, MessageKind, Payload, ReqErr, RequestId, Session};

/// `[kind][id:8][nameLen:1][name][payload…]`
pub fn request(
    ident: RequestId,
    name: Option<&str>,
    payload: &Payload,
) -> Result<Bytes, EncodeError> {
    let name = validate_name(name)?;
    validate_payload(payload)?;
    let mut buf = Vec::with_capacity(10 + name.len() + payload.len());
    buf.push(kind_for(payload.encoding, Shape::Request) as u8);
    buf.extend_from_slice(&ident.to_bytes());
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.extend_from_slice(&payload.data);
    Ok(buf.into())
}

/// `[kind][nameLen:1][name][payload…]` — payload offset 2 when unnamed.
pub fn signal(name: Option<&str>, payload: &Payload) -> Result<Bytes, EncodeError> {
    let name = validate_name(name)?;
    validate_payload(payload)?;
    let mut buf = Vec::with_capacity(2 + name.len() + payload.len());
    buf.push(kind_for(payload.encoding, Shape::Signal) as u8);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.extend_from_slice(&payload.data);
    Ok(buf.into())
}

/// Success reply. Payload offset 9, except UTF-16 where a single pad byte
/// after the id aligns the payload at offset 10.
pub fn reply(ident: RequestId, payload: &Payload) -> Result<Bytes, EncodeError> {
    validate_payload(payload)?;
    let pad = usize::from(payload.encoding == Encoding::Utf16);
    let mut buf = Vec::with_capacity(9 + pad + payload.len());
    buf.push(kind_for(payload.encoding, Shape::Reply) as u8);
    buf.extend_from_slice(&ident.to_bytes());
    if pad == 1 {
        buf.push(0);
    }
    buf.extend_from_slice(&payload.data);
    Ok(buf.into())
}

/// `[ErrorReply][id:8][json ReqErr]`
pub fn error_reply(ident: RequestId, err: &ReqErr) -> Result<Bytes, EncodeError> {
    let body = serde_json::to_vec(err).map_err(|e| EncodeError::Json(e.to_string()))?;
    let mut buf = Vec::with_capacity(9 + body.len());
    buf.push(MessageKind::ErrorReply as u8);
    buf.extend_from_slice(&ident.to_bytes());
    buf.extend_from_slice(&body);
    Ok(buf.into())
}

/// A payload-less typed reply: shutdown, internal error, session not found,
/// max session connections reached, sessions disabled, or protocol error.
pub fn special_reply(kind: MessageKind, ident: RequestId) -> Bytes {
    debug_assert!(
        matches!(
            kind,
            MessageKind::ReplyShutdown
                | MessageKind::ReplyInternalError
                | MessageKind::SessionNotFound
                | MessageKind::MaxSessConnsReached
                | MessageKind::SessionsDisabled
                | MessageKind::ReplyProtocolError
        ),
        "{kind} is not a payload-less typed reply",
    );
    let mut buf = Vec::with_capacity(9);
    buf.push(kind as u8);
    buf.extend_from_slice(&ident.to_bytes());
    buf.into()
}

/// `[SessionCreated][json Session]`, server to client.
pub fn session_created(session: &Session) -> Result<Bytes, EncodeError> {
    let body = serde_json::to_vec(session).map_err(|e| EncodeError::Json(e.to_string()))?;
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(MessageKind::SessionCreated as u8);
    buf.extend_from_slice(&body);
    Ok(buf.into())
}

/// `[SessionClosed]`, server to client.
pub fn session_closed() -> Bytes {
    Bytes::from_static(&[MessageKind::SessionClosed as u8])
}

/// `[RestoreSession][id:8][key…]`, client to server.
pub fn restore_session(ident: RequestId, key: &str) -> Bytes {
    let mut buf = Vec::with_capacity(9 + key.len());
    buf.push(MessageKind::RestoreSession as u8);
    buf.extend_from_slice(&ident.to_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.into()
}

/// `[CloseSession][id:8]`, client to server.
pub fn close_session(ident: RequestId) -> Bytes {
    let mut buf = Vec::with_capacity(9);
    buf.push(MessageKind::CloseSession as u8);
    buf.extend_from_slice(&ident.to_bytes());
    buf.into()
}

enum Shape {
    Request,
    Signal,
    Reply,
}

fn kind_for(encoding: Encoding, shape: Shape) -> MessageKind {
    match (shape, encoding) {
        (Shape::Request, Encoding::Binary) => MessageKind::RequestBinary,
        (Shape::Request, Encoding::Utf8) => MessageKind::RequestUtf8,
        (Shape::Request, Encoding::Utf16) => MessageKind::RequestUtf16,
        (Shape::Signal, Encoding::Binary) => MessageKind::SignalBinary,
        (Shape::Signal, Encoding::Utf8) => MessageKind::SignalUtf8,
        (Shape::Signal, Encoding::Utf16) => MessageKind::SignalUtf16,
        (Shape::Reply, Encoding::Binary) => MessageKind::ReplyBinary,
        (Shape::Reply, Encoding::Utf8) => MessageKind::ReplyUtf8,
        (Shape::Reply, Encoding::Utf16) => MessageKind::ReplyUtf16,
    }
}

fn validate_name(name: Option<&str>) -> Result<&[u8], EncodeError> {
    let bytes = name.unwrap_or_default().as_bytes();
    if bytes.len() > u8::MAX as usize {
        return Err(EncodeError::NameTooLong(bytes.len()));
    }
    Ok(bytes)
}

fn validate_payload(payload: &Payload) -> Result<(), EncodeError> {
    if payload.encoding == Encoding::Utf16 && payload.len() % 2 != 0 {
        return Err(EncodeError::OddUtf16(payload.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn request_round_trips_through_parse() {
        let payload = Payload::utf16(vec![0x00, 0x73, 0x00, 0x61]);
        let raw = request(RequestId::from_u64(42), Some("echo"), &payload).unwrap();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.kind, MessageKind::RequestUtf16);
        assert_eq!(msg.ident, Some(RequestId::from_u64(42)));
        assert_eq!(msg.name.as_deref(), Some("echo"));
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn utf16_reply_inserts_alignment_pad() {
        let raw = reply(RequestId::from_u64(1), &Payload::utf16(vec![0, 1])).unwrap();
        assert_eq!(raw.len(), 12);
        assert_eq!(raw[0], MessageKind::ReplyUtf16 as u8);
        assert_eq!(raw[9], 0);
        assert_eq!(&raw[10..], &[0, 1]);
    }

    #[test]
    fn binary_reply_has_no_pad() {
        let raw = reply(RequestId::from_u64(1), &Payload::binary(vec![9])).unwrap();
        assert_eq!(raw.len(), 10);
        assert_eq!(&raw[9..], &[9]);
    }

    #[test]
    fn odd_utf16_payload_is_refused() {
        let err = signal(None, &Payload::utf16(vec![0, 1, 2])).unwrap_err();
        assert_eq!(err, EncodeError::OddUtf16(3));
    }

    #[test]
    fn oversized_name_is_refused() {
        let name = "n".repeat(256);
        let err = request(RequestId::ZERO, Some(&name), &Payload::default()).unwrap_err();
        assert_eq!(err, EncodeError::NameTooLong(256));
    }

    #[test]
    fn error_reply_body_is_json() {
        let raw = error_reply(RequestId::from_u64(5), &ReqErr::new("denied", "no access")).unwrap();
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.kind, MessageKind::ErrorReply);
        let decoded: ReqErr = serde_json::from_slice(&msg.payload.data).unwrap();
        assert_eq!(decoded, ReqErr::new("denied", "no access"));
    }

    #[test]
    fn unnamed_signal_payload_sits_at_offset_two() {
        let raw = signal(None, &Payload::utf16(vec![0x00, 0x68])).unwrap();
        assert_eq!(raw[1], 0);
        assert_eq!(&raw[2..], &[0x00, 0x68]);
    }
}
