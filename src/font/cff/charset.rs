//! CFF charset parsing and subset-charset emission.
//!
//! A charset assigns every glyph a SID (name-keyed fonts) or a CID
//! (CID-keyed fonts). Glyph 0 is always `.notdef` and is implicit.

use crate::parser::Stream;
use crate::writer::Writer;

mod predefined {
    pub const ISO_ADOBE: usize = 0;
    pub const EXPERT: usize = 1;
    pub const EXPERT_SUBSET: usize = 2;
}

/// Per-glyph SIDs/CIDs, with the implicit 0 for `.notdef` at index 0.
pub fn parse(offset: usize, data: &[u8], number_of_glyphs: u16) -> Option<Vec<u16>> {
    match offset {
        predefined::ISO_ADOBE => {
            // Sequential SIDs; valid while the font stays within the
            // ISOAdobe range.
            return Some((0..number_of_glyphs).collect());
        }
        predefined::EXPERT | predefined::EXPERT_SUBSET => {
            // Expert charsets never occur in OTF-embedded CFF in practice.
            log::warn!("predefined Expert charset is not supported");
            return None;
        }
        _ => {}
    }

    let mut s = Stream::new_at(data, offset)?;
    let format: u8 = s.read()?;
    let mut ids = Vec::with_capacity(usize::from(number_of_glyphs));
    ids.push(0);

    match format {
        0 => {
            while ids.len() < usize::from(number_of_glyphs) {
                ids.push(s.read::<u16>()?);
            }
        }
        1 | 2 => {
            while ids.len() < usize::from(number_of_glyphs) {
                let first: u16 = s.read()?;
                let left = if format == 1 {
                    u16::from(s.read::<u8>()?)
                } else {
                    s.read::<u16>()?
                };

                for i in 0..=left {
                    if ids.len() == usize::from(number_of_glyphs) {
                        break;
                    }
                    ids.push(first.checked_add(i)?);
                }
            }
        }
        _ => return None,
    }

    Some(ids)
}

/// Writes a format-0 charset listing the id of every non-notdef glyph.
pub fn write_format0(ids: &[u16], w: &mut Writer) {
    w.write_u8(0);
    for &id in ids.iter().skip(1) {
        w.write_u16(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Charset offsets 0..=2 denote predefined charsets, so real data needs
    // a prefix to sit behind a non-trivial offset.
    fn at_offset(payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 3];
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn format0() {
        let data = at_offset(&[0x00, 0x00, 0x05, 0x00, 0x21, 0x01, 0x00]);
        let ids = parse(3, &data, 4).unwrap();
        assert_eq!(ids, [0, 5, 33, 256]);
    }

    #[test]
    fn format1_ranges() {
        // first=10 nLeft=2 covers sids 10,11,12
        let data = at_offset(&[0x01, 0x00, 0x0A, 0x02]);
        let ids = parse(3, &data, 4).unwrap();
        assert_eq!(ids, [0, 10, 11, 12]);
    }

    #[test]
    fn format2_ranges() {
        let data = at_offset(&[0x02, 0x01, 0x00, 0x00, 0x01]);
        let ids = parse(3, &data, 3).unwrap();
        assert_eq!(ids, [0, 256, 257]);
    }

    #[test]
    fn iso_adobe_is_sequential() {
        assert_eq!(parse(0, &[], 3).unwrap(), [0, 1, 2]);
    }

    #[test]
    fn round_trip_through_format0() {
        let ids = vec![0u16, 7, 9, 300];
        let mut w = Writer::new();
        write_format0(&ids, &mut w);
        let data = w.finish();
        // Not a predefined id, so point past a fake 3-byte prefix.
        let mut full = vec![0u8; 3];
        full.extend_from_slice(&data);
        assert_eq!(parse(3, &full, 4).unwrap(), ids);
    }
}
