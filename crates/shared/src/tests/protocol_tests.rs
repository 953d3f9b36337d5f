use super::*;

#[test]
fn decodes_connected_frame() {
    let frame = decode_server_frame(r#"{"type":"connected","session_id":"ab12cd34"}"#)
        .expect("connected");
    assert_eq!(
        frame,
        ServerFrame::Connected {
            session_id: "ab12cd34".into()
        }
    );
}

#[test]
fn message_frame_keeps_explicit_fields() {
    let frame = decode_server_frame(
        r#"{"type":"message","role":"user","content":"hey","timestamp":"2025-01-02T03:04:05+00:00"}"#,
    )
    .expect("message");
    assert_eq!(
        frame,
        ServerFrame::Message {
            role: ChatRole::User,
            content: "hey".into(),
            timestamp: "2025-01-02T03:04:05+00:00".into(),
        }
    );
}

#[test]
fn message_frame_defaults_missing_fields() {
    let frame = decode_server_frame(r#"{"type":"message"}"#).expect("message");
    let ServerFrame::Message {
        role,
        content,
        timestamp,
    } = frame
    else {
        panic!("expected message frame");
    };
    assert_eq!(role, ChatRole::Assistant);
    assert_eq!(content, "");
    assert!(
        chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok(),
        "default timestamp should be RFC 3339: {timestamp}"
    );
}

#[test]
fn typing_status_follows_json_truthiness() {
    let cases = [
        (r#"{"type":"typing","status":true}"#, true),
        (r#"{"type":"typing","status":false}"#, false),
        (r#"{"type":"typing","status":1}"#, true),
        (r#"{"type":"typing","status":0}"#, false),
        (r#"{"type":"typing","status":"yes"}"#, true),
        (r#"{"type":"typing"}"#, false),
    ];
    for (raw, expected) in cases {
        assert_eq!(
            decode_server_frame(raw).expect("typing"),
            ServerFrame::Typing { status: expected },
            "{raw}"
        );
    }
}

#[test]
fn error_frame_without_content_uses_placeholder() {
    assert_eq!(
        decode_server_frame(r#"{"type":"error"}"#).expect("error"),
        ServerFrame::Error {
            content: "Unknown error".into()
        }
    );
    assert_eq!(
        decode_server_frame(r#"{"type":"error","content":"Error: boom"}"#).expect("error"),
        ServerFrame::Error {
            content: "Error: boom".into()
        }
    );
}

#[test]
fn pong_frame_decodes() {
    assert_eq!(
        decode_server_frame(r#"{"type":"pong"}"#).expect("pong"),
        ServerFrame::Pong
    );
}

#[test]
fn rejects_malformed_and_unknown_frames() {
    assert!(matches!(
        decode_server_frame("not json"),
        Err(DecodeError::Malformed(_))
    ));
    assert!(matches!(
        decode_server_frame("[1,2,3]"),
        Err(DecodeError::MissingType)
    ));
    assert!(matches!(
        decode_server_frame(r#"{"content":"no type"}"#),
        Err(DecodeError::MissingType)
    ));
    assert!(matches!(
        decode_server_frame(r#"{"type":"presence"}"#),
        Err(DecodeError::UnknownType(kind)) if kind == "presence"
    ));
    assert!(matches!(
        decode_server_frame(r#"{"type":"connected"}"#),
        Err(DecodeError::InvalidField { field: "session_id", .. })
    ));
}

#[test]
fn encodes_exactly_the_two_client_frames() {
    let message: serde_json::Value =
        serde_json::from_str(&ClientFrame::message("hello").encode()).expect("json");
    assert_eq!(
        message,
        serde_json::json!({ "type": "message", "content": "hello" })
    );

    let ping: serde_json::Value =
        serde_json::from_str(&ClientFrame::Ping.encode()).expect("json");
    assert_eq!(ping, serde_json::json!({ "type": "ping" }));
}

#[test]
fn encoded_frames_match_serde_representation() {
    let frame = ClientFrame::message("quote \" and\nnewline");
    let parsed: ClientFrame = serde_json::from_str(&frame.encode()).expect("parse");
    assert_eq!(parsed, frame);
}

#[test]
fn server_echo_of_outbound_message_preserves_content() {
    let encoded = ClientFrame::message("hello").encode();
    match decode_server_frame(&encoded).expect("echo") {
        ServerFrame::Message { content, role, .. } => {
            assert_eq!(content, "hello");
            assert_eq!(role, ChatRole::Assistant);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}
