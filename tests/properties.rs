use commitlog::buffer::op;
use commitlog::varint;
use commitlog::{Buffer, Chunk, Reader};
use proptest::prelude::*;

fn arb_index() -> impl Strategy<Value = u32> {
    0u32..(1u32 << 31)
}

proptest! {
    /// Invariant 1: round-trip, typed — writing (op, i, v) into an empty
    /// buffer and reading it back yields the same type, index, and op.
    #[test]
    fn round_trip_typed_i64(index in arb_index(), value in any::<i64>()) {
        let mut buf = Buffer::new("col");
        buf.put_i64(op::PUT, index, value);

        let mut reader = Reader::seek(&mut buf);
        prop_assert!(reader.next());
        prop_assert_eq!(reader.op_type(), op::PUT);
        prop_assert_eq!(reader.index(), index);
        prop_assert_eq!(reader.int64(), value);
        prop_assert!(!reader.next());
    }

    #[test]
    fn round_trip_typed_string(index in arb_index(), value in "\\PC{0,64}") {
        let mut buf = Buffer::new("col");
        buf.put_string(op::PUT, index, &value).unwrap();

        let mut reader = Reader::seek(&mut buf);
        prop_assert!(reader.next());
        prop_assert_eq!(reader.index(), index);
        prop_assert_eq!(reader.string().unwrap(), value.as_str());
    }

    #[test]
    fn round_trip_typed_bool(index in arb_index(), value in any::<bool>()) {
        let mut buf = Buffer::new("col");
        buf.put_bool(index, value);

        let mut reader = Reader::seek(&mut buf);
        prop_assert!(reader.next());
        prop_assert_eq!(reader.index(), index);
        prop_assert_eq!(reader.bool(), value);
    }

    /// Invariant 2: round-trip, codec — ReadFrom(WriteTo(b)) reproduces b
    /// structurally for any sequence of non-decreasing writes.
    #[test]
    fn codec_round_trip_arbitrary_writes(
        deltas in prop::collection::vec(0u32..2000, 1..30)
    ) {
        let mut buf = Buffer::new("col");
        let mut index = 0u32;
        for (n, delta) in deltas.iter().enumerate() {
            index += delta;
            buf.put_i32(op::PUT, index, n as i32);
        }

        let mut wire = Vec::new();
        buf.write_to(&mut wire).unwrap();
        let decoded = Buffer::read_from(&mut wire.as_slice()).unwrap();

        prop_assert_eq!(decoded.column(), buf.column());
        prop_assert_eq!(decoded.last(), buf.last());
        prop_assert_eq!(decoded.chunk_headers(), buf.chunk_headers());
        prop_assert_eq!(decoded.bytes(), buf.bytes());
    }

    /// Invariant 8: LEB128 deltas round-trip in at most 5 bytes for any
    /// value in [0, 2^28).
    #[test]
    fn leb128_round_trips_within_five_bytes(delta in 0u32..(1u32 << 28)) {
        let mut encoded = Vec::new();
        varint::encode_u32(delta, &mut encoded);
        prop_assert!(encoded.len() <= 5);
        let (decoded, rest) = varint::decode_u32(&encoded).unwrap();
        prop_assert_eq!(decoded, delta);
        prop_assert!(rest.is_empty());
    }

    /// Invariant 9: MaxOffset equals the largest Index() observed during a
    /// full Range scan, for any set of writes confined to one chunk.
    #[test]
    fn max_offset_matches_largest_scanned_index(
        indices in prop::collection::vec(0u32..commitlog::CHUNK_SIZE, 1..40)
    ) {
        let mut buf = Buffer::new("col");
        for &i in &indices {
            buf.put_operation(op::INSERT, i);
        }

        let observed = *indices.iter().max().unwrap();
        prop_assert_eq!(commitlog::reader::max_offset(&mut buf, Chunk(0)), observed);
    }
}
