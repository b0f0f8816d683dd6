//! AAT lookup tables: glyph → value maps in six wire formats.

use std::collections::HashMap;

use crate::parser::Stream;
use crate::GlyphId;

/// A fully decoded AAT lookup.
///
/// Values wider than 16 bits do not occur in the tables we consume
/// (class tables and non-contextual substitutions); such lookups are
/// rejected by the parser.
#[derive(Clone, Default, Debug)]
pub struct AatLookup {
    map: HashMap<u16, u16>,
}

impl AatLookup {
    pub fn value(&self, glyph: GlyphId) -> Option<u16> {
        self.map.get(&glyph.to_u16()).copied()
    }

    pub fn parse(data: &[u8], number_of_glyphs: u16) -> Option<Self> {
        let mut s = Stream::new(data);
        let format: u16 = s.read()?;
        let mut map = HashMap::new();
        match format {
            0 => {
                for gid in 0..number_of_glyphs {
                    map.insert(gid, s.read::<u16>()?);
                }
            }
            2 => {
                let (count, value_size) = binsearch_header(&mut s, 4)?;
                for _ in 0..count {
                    let last: u16 = s.read()?;
                    let first: u16 = s.read()?;
                    let value = read_value(&mut s, value_size)?;
                    if last == 0xFFFF {
                        continue; // terminating segment
                    }
                    for gid in first..=last {
                        map.insert(gid, value);
                    }
                }
            }
            4 => {
                let (count, value_size) = binsearch_header(&mut s, 4)?;
                if value_size != 2 {
                    return None;
                }
                for _ in 0..count {
                    let last: u16 = s.read()?;
                    let first: u16 = s.read()?;
                    let offset: u16 = s.read()?;
                    if last == 0xFFFF {
                        continue;
                    }
                    // The offset points at per-glyph values from the start
                    // of the whole lookup table.
                    for (i, gid) in (first..=last).enumerate() {
                        let value =
                            Stream::read_at::<u16>(data, usize::from(offset) + i * 2)?;
                        map.insert(gid, value);
                    }
                }
            }
            6 => {
                let (count, value_size) = binsearch_header(&mut s, 2)?;
                for _ in 0..count {
                    let gid: u16 = s.read()?;
                    let value = read_value(&mut s, value_size)?;
                    if gid != 0xFFFF {
                        map.insert(gid, value);
                    }
                }
            }
            8 => {
                let first: u16 = s.read()?;
                let count: u16 = s.read()?;
                for i in 0..count {
                    map.insert(first.checked_add(i)?, s.read::<u16>()?);
                }
            }
            10 => {
                let value_size: u16 = s.read()?;
                if value_size != 2 {
                    return None;
                }
                let first: u16 = s.read()?;
                let count: u16 = s.read()?;
                for i in 0..count {
                    map.insert(first.checked_add(i)?, s.read::<u16>()?);
                }
            }
            _ => return None,
        }

        Some(AatLookup { map })
    }
}

// unitSize, nUnits followed by searchRange/entrySelector/rangeShift.
fn binsearch_header(s: &mut Stream, key_bytes: u16) -> Option<(u16, u16)> {
    let unit_size: u16 = s.read()?;
    let count: u16 = s.read()?;
    s.advance(6);
    let value_size = unit_size.checked_sub(key_bytes)?;
    if value_size != 2 {
        // Wider values exist in the wild only for morx features we skip.
        return None;
    }
    Some((count, value_size))
}

fn read_value(s: &mut Stream, value_size: u16) -> Option<u16> {
    match value_size {
        2 => s.read::<u16>(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    #[test]
    fn format0_dense() {
        let mut w = Writer::new();
        w.write_u16(0);
        for v in [5u16, 6, 7] {
            w.write_u16(v);
        }
        let lookup = AatLookup::parse(w.data(), 3).unwrap();
        assert_eq!(lookup.value(GlyphId(1)), Some(6));
        assert_eq!(lookup.value(GlyphId(3)), None);
    }

    #[test]
    fn format2_segments() {
        let mut w = Writer::new();
        w.write_u16(2);
        w.write_u16(6); // unitSize
        w.write_u16(2); // nUnits
        w.write_zeros(6);
        w.write_u16(12); // last
        w.write_u16(10); // first
        w.write_u16(9); // value
        w.write_u16(0xFFFF);
        w.write_u16(0xFFFF);
        w.write_u16(0);
        let lookup = AatLookup::parse(w.data(), 20).unwrap();
        assert_eq!(lookup.value(GlyphId(10)), Some(9));
        assert_eq!(lookup.value(GlyphId(12)), Some(9));
        assert_eq!(lookup.value(GlyphId(13)), None);
    }

    #[test]
    fn format6_singles() {
        let mut w = Writer::new();
        w.write_u16(6);
        w.write_u16(4); // unitSize
        w.write_u16(2); // nUnits
        w.write_zeros(6);
        w.write_u16(4);
        w.write_u16(40);
        w.write_u16(9);
        w.write_u16(90);
        let lookup = AatLookup::parse(w.data(), 20).unwrap();
        assert_eq!(lookup.value(GlyphId(4)), Some(40));
        assert_eq!(lookup.value(GlyphId(9)), Some(90));
        assert_eq!(lookup.value(GlyphId(5)), None);
    }

    #[test]
    fn format8_trimmed() {
        let mut w = Writer::new();
        w.write_u16(8);
        w.write_u16(7); // first glyph
        w.write_u16(2); // count
        w.write_u16(1);
        w.write_u16(2);
        let lookup = AatLookup::parse(w.data(), 20).unwrap();
        assert_eq!(lookup.value(GlyphId(7)), Some(1));
        assert_eq!(lookup.value(GlyphId(8)), Some(2));
        assert_eq!(lookup.value(GlyphId(6)), None);
    }
}
