// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap

use std::collections::BTreeMap;

use crate::parser::{FromData, Offset, Offset32, Stream};
use crate::GlyphId;

mod format0;
mod format10;
mod format12;
mod format13;
mod format4;
mod format6;

/// A bidirectional codepoint ↔ glyph map.
///
/// Missing codepoints map to `.notdef`. When two codepoints map to the same
/// glyph the reverse direction keeps the first one; the rest are reported
/// once as a warning since ToUnicode can only carry one of them.
#[derive(Clone, Default, Debug)]
pub struct CharacterMapping {
    forward: BTreeMap<u32, GlyphId>,
    reverse: BTreeMap<GlyphId, u32>,
}

impl CharacterMapping {
    pub fn glyph_for(&self, codepoint: u32) -> GlyphId {
        self.forward.get(&codepoint).copied().unwrap_or(GlyphId::NOTDEF)
    }

    pub fn lookup(&self, codepoint: u32) -> Option<GlyphId> {
        self.forward.get(&codepoint).copied()
    }

    pub fn codepoint_for(&self, glyph: GlyphId) -> Option<u32> {
        self.reverse.get(&glyph).copied()
    }

    pub fn contains_glyph(&self, glyph: GlyphId) -> bool {
        self.reverse.contains_key(&glyph)
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, GlyphId)> + '_ {
        self.forward.iter().map(|(&cp, &gid)| (cp, gid))
    }

    fn insert(&mut self, codepoint: u32, glyph: GlyphId, conflicts: &mut u32) {
        if glyph.is_notdef() {
            return;
        }

        self.forward.insert(codepoint, glyph);
        if self.reverse.insert(glyph, codepoint).is_some() {
            *conflicts += 1;
            // Keep the later codepoint; fonts usually order their
            // preferred mapping last in compatibility ranges.
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct EncodingRecord {
    platform_id: u16,
    encoding_id: u16,
    offset: Offset32,
}

impl FromData for EncodingRecord {
    const SIZE: usize = 8;

    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        Some(EncodingRecord {
            platform_id: s.read::<u16>()?,
            encoding_id: s.read::<u16>()?,
            offset: s.read::<Offset32>()?,
        })
    }
}

// Most-preferred first.
const PREFERENCE_ORDER: &[(u16, u16)] = &[(0, 6), (0, 4), (0, 3), (3, 10), (3, 1), (1, 0)];

/// Parses `cmap`, picking the best supported subtable.
pub fn parse(data: &[u8]) -> Option<CharacterMapping> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // version
    let count = s.read::<u16>()?;
    let records = s.read_array16::<EncodingRecord>(count)?;

    let mut mapping = CharacterMapping::default();
    let mut conflicts = 0u32;
    for &(platform_id, encoding_id) in PREFERENCE_ORDER {
        let record = records
            .into_iter()
            .find(|r| r.platform_id == platform_id && r.encoding_id == encoding_id);
        let Some(record) = record else { continue };
        let Some(subtable) = data.get(record.offset.to_usize()..) else {
            continue;
        };

        let format = Stream::new(subtable).read::<u16>().unwrap_or(u16::MAX);
        let collect = |cp: u32, gid: GlyphId| mapping.insert(cp, gid, &mut conflicts);
        let ok = match format {
            0 => format0::mappings(subtable, collect),
            4 => format4::mappings(subtable, collect),
            6 => format6::mappings(subtable, collect),
            10 => format10::mappings(subtable, collect),
            12 => format12::mappings(subtable, collect),
            13 => format13::mappings(subtable, collect),
            _ => {
                log::warn!(
                    "unsupported cmap subtable format {} for ({}, {})",
                    format,
                    platform_id,
                    encoding_id
                );
                None
            }
        };

        if ok.is_some() && !mapping.is_empty() {
            if conflicts > 0 {
                log::warn!("{} codepoints map to already-mapped glyphs", conflicts);
            }
            return Some(mapping);
        }
    }

    log::warn!("no usable cmap subtable; all codepoints will map to .notdef");
    Some(CharacterMapping::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn single_subtable(platform: u16, encoding: u16, subtable: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(0); // version
        w.write_u16(1); // numTables
        w.write_u16(platform);
        w.write_u16(encoding);
        w.write_u32(12); // offset
        w.write_bytes(subtable);
        w.finish()
    }

    fn format6(first: u16, glyphs: &[u16]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(6); // format
        w.write_u16(10 + glyphs.len() as u16 * 2);
        w.write_u16(0); // language
        w.write_u16(first);
        w.write_u16(glyphs.len() as u16);
        for &g in glyphs {
            w.write_u16(g);
        }
        w.finish()
    }

    #[test]
    fn bidirectional() {
        let data = single_subtable(0, 4, &format6(0x41, &[10, 0, 12]));
        let mapping = parse(&data).unwrap();
        assert_eq!(mapping.glyph_for(0x41), GlyphId(10));
        assert_eq!(mapping.glyph_for(0x42), GlyphId::NOTDEF);
        assert_eq!(mapping.glyph_for(0x43), GlyphId(12));
        assert_eq!(mapping.codepoint_for(GlyphId(12)), Some(0x43));
        assert_eq!(mapping.codepoint_for(GlyphId(99)), None);
    }

    #[test]
    fn unsupported_format_yields_empty_mapping() {
        let mut sub = Writer::new();
        sub.write_u16(8); // mixed coverage, unsupported
        sub.write_zeros(10);
        let data = single_subtable(0, 4, sub.data());
        let mapping = parse(&data).unwrap();
        assert!(mapping.is_empty());
    }
}
