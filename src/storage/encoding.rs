//! Stream-vbyte style encoding for sorted `(Hash, DocId)` postings (§4.1).
//!
//! Postings within a segment are sorted by `(Hash, DocId)`, so we split
//! each posting into two delta streams and pack each stream separately:
//!
//! - **hash gaps**: `hash[i] - hash[i-1]`, zero when repeated, packed with
//!   the `{0,1,2,4}`-byte length class (gap can be absent entirely).
//! - **doc-id deltas**: `doc_id[i] - doc_id[i-1]` *within a run of equal
//!   hash*, reset to the raw `doc_id` at the start of each run, packed
//!   with the `{1,2,3,4}`-byte length class (a doc id is never absent).
//!
//! Four consecutive values share one control byte: two bits per lane
//! select the byte length of that lane from the class's table. The
//! control byte mechanically determines each lane's length and thus the
//! length of the whole group, matching the table-generation scheme used
//! upstream by this format (`generate_shuffle_tables.py`) without the
//! accompanying SIMD shuffle — lanes are copied with plain scalar loops,
//! trading a few cycles per block for portability and no `unsafe`.

use crate::error::{IndexError, Result};
use crate::storage::types::{DocId, Hash, Posting};

/// Byte-length choices for the "gap, possibly absent" lane class.
const CLASS_0124: [u8; 4] = [0, 1, 2, 4];

/// Byte-length choices for the "always present" lane class.
const CLASS_1234: [u8; 4] = [1, 2, 3, 4];

/// Lane length for 2-bit `code` (0..=3) under the given length class.
fn lane_len(class: &[u8; 4], code: u8) -> u8 {
    class[(code & 0b11) as usize]
}

/// Smallest 2-bit code in `class` whose length can hold `value`.
fn code_for(class: &[u8; 4], value: u32) -> u8 {
    let needed = if value == 0 {
        0
    } else if value <= 0xFF {
        1
    } else if value <= 0xFFFF {
        2
    } else {
        4
    };
    class
        .iter()
        .position(|&len| len as u32 >= needed)
        .expect("CLASS tables cover 0..=4 bytes") as u8
}

fn write_lane(out: &mut Vec<u8>, value: u32, len: u8) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..len as usize]);
}

fn read_lane(buf: &[u8], pos: &mut usize, len: u8) -> Result<u32> {
    let len = len as usize;
    if *pos + len > buf.len() {
        return Err(IndexError::CorruptSegment(
            "postings".into(),
            "truncated posting lane".into(),
        ));
    }
    let mut raw = [0u8; 4];
    raw[..len].copy_from_slice(&buf[*pos..*pos + len]);
    *pos += len;
    Ok(u32::from_le_bytes(raw))
}

/// Encode a group of up to 4 values, appending the control byte then the
/// packed lane bytes to `out`.
fn encode_group(out: &mut Vec<u8>, values: &[u32], class: &[u8; 4]) {
    debug_assert!(values.len() <= 4);
    let mut control = 0u8;
    let mut codes = [0u8; 4];
    for (i, &v) in values.iter().enumerate() {
        codes[i] = code_for(class, v);
        control |= codes[i] << (i * 2);
    }
    out.push(control);
    for (i, &v) in values.iter().enumerate() {
        write_lane(out, v, lane_len(class, codes[i]));
    }
}

/// Decode exactly `count` values (0 < count <= 4) from a group at `pos`.
fn decode_group(buf: &[u8], pos: &mut usize, count: usize, class: &[u8; 4]) -> Result<[u32; 4]> {
    if *pos >= buf.len() {
        return Err(IndexError::CorruptSegment(
            "postings".into(),
            "missing control byte".into(),
        ));
    }
    let control = buf[*pos];
    *pos += 1;
    let mut out = [0u32; 4];
    for (i, slot) in out.iter_mut().enumerate().take(count) {
        let code = (control >> (i * 2)) & 0b11;
        *slot = read_lane(buf, pos, lane_len(class, code))?;
    }
    Ok(out)
}

fn encode_stream(values: &[u32], class: &[u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len());
    for chunk in values.chunks(4) {
        encode_group(&mut out, chunk, class);
    }
    out
}

fn decode_stream(buf: &[u8], pos: &mut usize, count: usize, class: &[u8; 4]) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(count);
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(4);
        let group = decode_group(buf, pos, take, class)?;
        out.extend_from_slice(&group[..take]);
        remaining -= take;
    }
    Ok(out)
}

/// Encode a sorted, deduplicated slice of postings into the two delta
/// streams, concatenated as `[hash_gaps][doc_id_deltas]`. The caller
/// (segment writer) records `postings.len()` separately so the decoder
/// knows when to stop.
pub fn encode_postings(postings: &[Posting]) -> Vec<u8> {
    let mut hash_gaps = Vec::with_capacity(postings.len());
    let mut doc_deltas = Vec::with_capacity(postings.len());

    let mut prev_hash: Option<Hash> = None;
    let mut prev_doc: DocId = 0;
    for &(hash, doc_id) in postings {
        let gap = match prev_hash {
            Some(p) => hash.wrapping_sub(p),
            None => hash,
        };
        hash_gaps.push(gap);

        let delta = if prev_hash == Some(hash) {
            doc_id.wrapping_sub(prev_doc)
        } else {
            doc_id
        };
        doc_deltas.push(delta);

        prev_hash = Some(hash);
        prev_doc = doc_id;
    }

    let mut out = encode_stream(&hash_gaps, &CLASS_0124);
    out.extend(encode_stream(&doc_deltas, &CLASS_1234));
    out
}

/// Decode `count` postings previously produced by [`encode_postings`].
pub fn decode_postings(buf: &[u8], count: usize) -> Result<Vec<Posting>> {
    let mut pos = 0usize;
    let hash_gaps = decode_stream(buf, &mut pos, count, &CLASS_0124)?;
    let doc_deltas = decode_stream(buf, &mut pos, count, &CLASS_1234)?;

    let mut out = Vec::with_capacity(count);
    let mut hash: Hash = 0;
    let mut prev_hash: Option<Hash> = None;
    let mut doc: DocId = 0;
    for i in 0..count {
        hash = match prev_hash {
            Some(p) => p.wrapping_add(hash_gaps[i]),
            None => hash_gaps[i],
        };
        doc = if prev_hash == Some(hash) {
            doc.wrapping_add(doc_deltas[i])
        } else {
            doc_deltas[i]
        };
        out.push((hash, doc));
        prev_hash = Some(hash);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty() {
        let postings: Vec<Posting> = vec![];
        let encoded = encode_postings(&postings);
        let decoded = decode_postings(&encoded, 0).unwrap();
        assert_eq!(decoded, postings);
    }

    #[test]
    fn roundtrip_single() {
        let postings = vec![(42, 7)];
        let encoded = encode_postings(&postings);
        assert_eq!(decode_postings(&encoded, 1).unwrap(), postings);
    }

    #[test]
    fn roundtrip_small_multigroup() {
        let postings: Vec<Posting> = vec![
            (1, 0), (1, 1), (1, 5), (3, 0), (3, 2), (3, 9), (3, 100), (1000, 4),
        ];
        let encoded = encode_postings(&postings);
        assert_eq!(decode_postings(&encoded, postings.len()).unwrap(), postings);
    }

    #[test]
    fn roundtrip_large_values() {
        let postings: Vec<Posting> = vec![(0, 0), (u32::MAX, u32::MAX), (u32::MAX, u32::MAX - 1)];
        let encoded = encode_postings(&postings);
        assert_eq!(decode_postings(&encoded, postings.len()).unwrap(), postings);
    }

    #[test]
    fn truncated_buffer_is_corrupt_segment_error() {
        let postings = vec![(1, 1), (2, 2), (3, 3)];
        let mut encoded = encode_postings(&postings);
        encoded.truncate(encoded.len() - 1);
        let err = decode_postings(&encoded, postings.len()).unwrap_err();
        assert!(matches!(err, IndexError::CorruptSegment(_, _)));
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_arbitrary_sorted_postings(
            mut raw in proptest::collection::vec((0u32..5000, 0u32..5000), 0..200)
        ) {
            raw.sort_unstable();
            raw.dedup();
            let encoded = encode_postings(&raw);
            let decoded = decode_postings(&encoded, raw.len()).unwrap();
            proptest::prop_assert_eq!(decoded, raw);
        }
    }
}
