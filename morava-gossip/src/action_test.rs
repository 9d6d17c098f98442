#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::action::{Action, ActionType};
    use crate::errors::GossipError;

    #[test]
    fn round_trip_set() {
        let action = Action::set("lock/demo", Bytes::from_static(b"payload"), 1_700_000_000_123);
        let decoded = Action::decode(&action.encode()).unwrap();
        assert_eq!(decoded, action);
    }

    #[test]
    fn round_trip_delete_with_empty_value() {
        let action = Action::delete("lock/demo", 42);
        let decoded = Action::decode(&action.encode()).unwrap();
        assert_eq!(decoded.typ, ActionType::Delete);
        assert_eq!(decoded.key, "lock/demo");
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn round_trip_arbitrary_value_bytes() {
        let value = Bytes::from((0u8..=255).collect::<Vec<u8>>());
        let action = Action::set("k", value.clone(), 7);
        let decoded = Action::decode(&action.encode()).unwrap();
        assert_eq!(decoded.value, value);
    }

    #[test]
    fn wire_layout_is_stable() {
        let action = Action::set("ab", Bytes::from_static(b"v"), 0x0102);
        let encoded = action.encode();
        // [typ][u64 LE time][key][NUL][value]
        assert_eq!(
            encoded.as_ref(),
            &[1, 0x02, 0x01, 0, 0, 0, 0, 0, 0, b'a', b'b', 0, b'v']
        );
    }

    #[test]
    fn empty_buffer_decodes_to_empty_action() {
        let decoded = Action::decode(&[]).unwrap();
        assert_eq!(decoded, Action::default());
        assert_eq!(decoded.typ, ActionType::Unknown);
    }

    #[test]
    fn truncated_header_is_malformed() {
        for len in 1..9 {
            let buf = vec![1u8; len];
            let err = Action::decode(&buf).unwrap_err();
            assert!(matches!(err, GossipError::MalformedFrame(_)), "len {len}");
        }
    }

    #[test]
    fn missing_key_terminator_is_malformed() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&7u64.to_le_bytes());
        buf.extend_from_slice(b"no-terminator");
        let err = Action::decode(&buf).unwrap_err();
        assert!(matches!(err, GossipError::MalformedFrame(_)));
    }

    #[test]
    fn unknown_type_byte_is_preserved_as_unknown() {
        let mut buf = vec![9u8];
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(b"k\0v");
        let decoded = Action::decode(&buf).unwrap();
        assert_eq!(decoded.typ, ActionType::Unknown);
    }
}
