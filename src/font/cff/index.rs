//! CFF INDEX reading and writing.
//!
//! An INDEX is a count-prefixed offset array followed by a contiguous data
//! blob. Reading and writing round-trip: `parse ∘ write` is the identity on
//! the item list (modulo the chosen offset size).

use crate::parser::Stream;
use crate::writer::Writer;

/// Reads an INDEX, returning one byte span per item.
///
/// The stream is left positioned after the INDEX.
pub fn parse_index<'a>(s: &mut Stream<'a>) -> Option<Vec<&'a [u8]>> {
    let count: u16 = s.read()?;
    if count == 0 {
        return Some(Vec::new());
    }

    let off_size: u8 = s.read()?;
    if !(1..=4).contains(&off_size) {
        return None;
    }

    let mut offsets = Vec::with_capacity(usize::from(count) + 1);
    for _ in 0..=count {
        offsets.push(read_offset(s, off_size)?);
    }

    // Offsets are 1-based from the byte preceding the data.
    let data_len = offsets.last()?.checked_sub(1)?;
    let data = s.read_bytes(data_len)?;

    let mut items = Vec::with_capacity(usize::from(count));
    for pair in offsets.windows(2) {
        let (start, end) = (pair[0] - 1, pair[1] - 1);
        if start > end {
            return None;
        }
        items.push(data.get(start..end)?);
    }

    Some(items)
}

fn read_offset(s: &mut Stream, off_size: u8) -> Option<usize> {
    let mut n = 0usize;
    for _ in 0..off_size {
        n = n << 8 | usize::from(s.read::<u8>()?);
    }
    Some(n)
}

/// Writes an INDEX, choosing the smallest sufficient offset size.
pub fn write_index(items: &[&[u8]], w: &mut Writer) {
    w.write_u16(items.len() as u16);
    if items.is_empty() {
        return;
    }

    let data_len: usize = items.iter().map(|i| i.len()).sum();
    let off_size = offset_size(data_len + 1);
    w.write_u8(off_size);

    let mut offset = 1usize;
    write_offset(w, off_size, offset);
    for item in items {
        offset += item.len();
        write_offset(w, off_size, offset);
    }

    for item in items {
        w.write_bytes(item);
    }
}

/// The serialized size of an INDEX, without writing it.
pub fn index_size(items: &[&[u8]]) -> usize {
    if items.is_empty() {
        return 2;
    }

    let data_len: usize = items.iter().map(|i| i.len()).sum();
    let off_size = usize::from(offset_size(data_len + 1));
    2 + 1 + (items.len() + 1) * off_size + data_len
}

fn offset_size(max_offset: usize) -> u8 {
    if max_offset < 0x100 {
        1
    } else if max_offset < 0x1_0000 {
        2
    } else if max_offset < 0x100_0000 {
        3
    } else {
        4
    }
}

fn write_offset(w: &mut Writer, off_size: u8, offset: usize) {
    for shift in (0..off_size).rev() {
        w.write_u8((offset >> (8 * shift)) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(items: &[&[u8]]) {
        let mut w = Writer::new();
        write_index(items, &mut w);
        assert_eq!(w.len(), index_size(items));

        let data = w.finish();
        let mut s = Stream::new(&data);
        let parsed = parse_index(&mut s).unwrap();
        assert_eq!(parsed, items);
        assert!(s.at_end());
    }

    #[test]
    fn empty() {
        round_trip(&[]);
    }

    #[test]
    fn zero_length_items_survive() {
        round_trip(&[b"abc", b"", b"d", b""]);
    }

    #[test]
    fn large_offsets() {
        let big = vec![0xAB; 300];
        round_trip(&[&big, b"x"]);
    }

    #[test]
    fn malformed_offset_order() {
        // offsets [1, 3, 2] are not monotonic
        let data = [0x00, 0x02, 0x01, 0x01, 0x03, 0x02, 0xAA, 0xBB];
        assert!(parse_index(&mut Stream::new(&data)).is_none());
    }
}
