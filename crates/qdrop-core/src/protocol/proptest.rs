//! Property-based tests for the protocol codec.
//!
//! These tests use proptest to verify:
//! - Codec roundtrip for arbitrary messages
//! - Codec never panics on arbitrary input
//! - Length prefix correctness
//! - Share code shape under generation

#![cfg(test)]

use bytes::BytesMut;
use proptest::prelude::*;

use crate::protocol::{
    Codec, FileEntry, FileId, FileListUpdatePayload, JoinAckPayload, JoinPayload,
    JoinRejectReason, JoinRejectedPayload, Message, ParticipantUpdatePayload, ProgressUpdate,
    Role, SessionCreatedPayload, SessionId, ShareCode, SignalKind, SignalPayload,
    TransferDirection, TransferFrame,
};

// =============================================================================
// Arbitrary Generators
// =============================================================================

fn arb_share_code() -> impl Strategy<Value = ShareCode> {
    "[A-Z0-9]{6}".prop_map(|s| ShareCode::parse(&s).unwrap())
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Creator), Just(Role::Participant)]
}

fn arb_signal_kind() -> impl Strategy<Value = SignalKind> {
    prop_oneof![
        Just(SignalKind::Offer),
        Just(SignalKind::Answer),
        Just(SignalKind::Candidate),
    ]
}

prop_compose! {
    fn arb_join()(
        share_code in arb_share_code(),
        user_id in "[a-z0-9-]{1,24}",
        display_name in ".{0,32}",
        desired_role in arb_role(),
    ) -> JoinPayload {
        JoinPayload { share_code, user_id, display_name, desired_role }
    }
}

prop_compose! {
    fn arb_file_entry()(
        id in any::<[u8; 16]>(),
        name in ".{1,64}",
        size in any::<u64>(),
        mime_type in "[a-z]{2,12}/[a-z0-9.+-]{2,24}",
        uploaded_at in any::<u64>(),
    ) -> FileEntry {
        FileEntry { id: FileId(id), name, size, mime_type, uploaded_at }
    }
}

prop_compose! {
    fn arb_progress()(
        file_name in ".{1,64}",
        progress in 0.0f32..=100.0,
        speed_bps in 0.0f64..1e9,
        eta_secs in any::<Option<u64>>(),
        direction in prop_oneof![Just(TransferDirection::Upload), Just(TransferDirection::Download)],
    ) -> ProgressUpdate {
        ProgressUpdate { file_name, progress, speed_bps, eta_secs, direction }
    }
}

fn arb_transfer_frame() -> impl Strategy<Value = TransferFrame> {
    prop_oneof![
        (".{1,64}", any::<u64>(), "[a-z]{2,8}/[a-z]{2,12}", 1u32..100_000).prop_map(
            |(name, size, mime_type, total_chunks)| TransferFrame::Start {
                name,
                size,
                mime_type,
                total_chunks,
            }
        ),
        (any::<u32>(), prop::collection::vec(any::<u8>(), 0..4096))
            .prop_map(|(index, payload)| TransferFrame::Chunk { index, payload }),
        ".{1,64}".prop_map(|name| TransferFrame::End { name }),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        arb_join().prop_map(Message::Join),
        (arb_share_code(), arb_role(), any::<usize>(), any::<usize>()).prop_map(
            |(share_code, role, participant_count, file_count)| {
                Message::JoinAck(JoinAckPayload {
                    share_code,
                    role,
                    participant_count,
                    file_count,
                })
            }
        ),
        (
            arb_share_code(),
            prop_oneof![
                Just(JoinRejectReason::SessionNotFound),
                Just(JoinRejectReason::SessionFull),
                Just(JoinRejectReason::NotAuthorized),
            ]
        )
            .prop_map(|(share_code, reason)| Message::JoinRejected(JoinRejectedPayload {
                share_code,
                reason,
            })),
        (arb_share_code(), any::<[u8; 16]>()).prop_map(|(share_code, id)| {
            Message::SessionCreated(SessionCreatedPayload {
                share_code,
                session_id: SessionId::from_bytes(id),
            })
        }),
        any::<usize>().prop_map(|participant_count| Message::ParticipantUpdate(
            ParticipantUpdatePayload { participant_count }
        )),
        prop::collection::vec(arb_file_entry(), 0..8)
            .prop_map(|files| Message::FileListUpdate(FileListUpdatePayload { files })),
        (
            arb_share_code(),
            arb_signal_kind(),
            prop::collection::vec(any::<u8>(), 0..2048)
        )
            .prop_map(|(share_code, kind, payload)| Message::Signal(SignalPayload {
                share_code,
                kind,
                payload,
            })),
        arb_transfer_frame().prop_map(Message::Transfer),
        arb_progress().prop_map(Message::Progress),
        Just(Message::Leave),
        Just(Message::TransferRequest),
    ]
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn roundtrip_arbitrary_message(msg in arb_message()) {
        let encoded = Codec::encode(&msg).unwrap();
        let decoded = Codec::decode_slice(&encoded).unwrap().unwrap();
        prop_assert_eq!(msg, decoded);
    }

    #[test]
    fn signal_payload_forwarded_verbatim(
        share_code in arb_share_code(),
        kind in arb_signal_kind(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let msg = Message::Signal(SignalPayload { share_code, kind, payload: payload.clone() });
        let encoded = Codec::encode(&msg).unwrap();
        match Codec::decode_slice(&encoded).unwrap().unwrap() {
            Message::Signal(sig) => prop_assert_eq!(sig.payload, payload),
            other => prop_assert!(false, "unexpected message: {:?}", other),
        }
    }

    #[test]
    fn codec_never_panics_on_arbitrary_input(data in prop::collection::vec(any::<u8>(), 0..10000)) {
        let mut buf = BytesMut::from(&data[..]);
        // Should not panic, may return Ok(None) or Err
        let _ = Codec::decode(&mut buf);
    }

    #[test]
    fn encoded_length_prefix_matches_payload(msg in arb_message()) {
        let encoded = Codec::encode(&msg).unwrap();
        let len = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        prop_assert_eq!(len, encoded.len() - 4);
    }

    #[test]
    fn partial_buffer_returns_none(msg in arb_message(), cut_at in 0usize..=3) {
        let encoded = Codec::encode(&msg).unwrap();
        if cut_at < encoded.len() {
            let partial = &encoded[..cut_at];
            let result = Codec::decode_slice(partial);
            prop_assert!(result.is_ok());
            prop_assert!(result.unwrap().is_none());
        }
    }

    #[test]
    fn generated_share_codes_always_uppercase_alphanumeric(_seed in any::<u8>()) {
        let code = ShareCode::generate();
        prop_assert!(code
            .as_str()
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
