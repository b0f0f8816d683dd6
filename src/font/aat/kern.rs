//! The `kern` table.
//!
//! Both the OpenType (u16 version 0) and the AAT (u32 version 1) headers
//! are accepted. Formats 0, 2 and 3 contribute pair adjustments; the
//! state-machine format 1 is recognized but skipped.

use std::collections::BTreeMap;

use crate::font::layout::GlyphAdjustment;
use crate::parser::{FromData, Stream};
use crate::GlyphId;

#[derive(Clone, Copy, Debug)]
struct Coverage {
    horizontal: bool,
    cross_stream: bool,
}

/// One kern subtable. `data` spans the whole subtable including its
/// header, since format 2 measures offsets from there.
#[derive(Clone, Debug)]
pub struct Subtable<'a> {
    format: u8,
    coverage: Coverage,
    header_len: usize,
    data: &'a [u8],
}

/// The parsed `kern` table.
#[derive(Clone, Debug)]
pub struct KernTable<'a> {
    subtables: Vec<Subtable<'a>>,
}

impl<'a> KernTable<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        let version: u16 = s.read()?;

        let (count, is_aat) = if version == 0 {
            (u32::from(s.read::<u16>()?), false)
        } else {
            // AAT header: the u32 version 0x00010000.
            let low: u16 = s.read()?;
            if version != 1 || low != 0 {
                return None;
            }
            (s.read::<u32>()?, true)
        };

        let mut subtables = Vec::new();
        let mut skipped_format1 = false;
        for _ in 0..count {
            let subtable_start = s.offset();
            let (length, format, coverage, header_len) = if is_aat {
                let length = usize::try_from(s.read::<u32>()?).ok()?;
                let coverage_byte: u8 = s.read()?;
                let format: u8 = s.read()?;
                s.skip::<u16>(); // tupleIndex
                let coverage = Coverage {
                    // AAT: bit 7 of coverage set means vertical.
                    horizontal: coverage_byte & 0x80 == 0,
                    cross_stream: coverage_byte & 0x40 != 0,
                };
                (length, format, coverage, 8)
            } else {
                s.skip::<u16>(); // subtable version
                let length = usize::from(s.read::<u16>()?);
                let format: u8 = s.read()?;
                let coverage_byte: u8 = s.read()?;
                let coverage = Coverage {
                    // OT: bit 0 set means horizontal.
                    horizontal: coverage_byte & 0x01 != 0,
                    cross_stream: coverage_byte & 0x04 != 0,
                };
                (length, format, coverage, 6)
            };

            let end = subtable_start.checked_add(length)?;
            let subtable_data = data.get(subtable_start..end)?;
            if format == 1 {
                if !skipped_format1 {
                    log::warn!("state-machine kern subtable (format 1) is not applied");
                    skipped_format1 = true;
                }
            } else {
                subtables.push(Subtable {
                    format,
                    coverage,
                    header_len,
                    data: subtable_data,
                });
            }

            s = Stream::new_at(data, end)?;
        }

        Some(KernTable { subtables })
    }

    /// Sums the horizontal pair adjustments for consecutive glyph pairs.
    pub fn adjustments(&self, glyphs: &[GlyphId]) -> BTreeMap<usize, GlyphAdjustment> {
        let mut out = BTreeMap::new();
        for subtable in &self.subtables {
            if !subtable.coverage.horizontal || subtable.coverage.cross_stream {
                continue;
            }

            let payload = &subtable.data[subtable.header_len.min(subtable.data.len())..];
            for i in 0..glyphs.len().saturating_sub(1) {
                let value = match subtable.format {
                    0 => format0(payload, glyphs[i], glyphs[i + 1]),
                    2 => format2(subtable.data, subtable.header_len, glyphs[i], glyphs[i + 1]),
                    3 => format3(payload, glyphs[i], glyphs[i + 1]),
                    _ => None,
                };

                if let Some(value) = value {
                    if value != 0 {
                        out.entry(i)
                            .or_insert_with(GlyphAdjustment::default)
                            .horz_advance += value;
                    }
                }
            }
        }

        out
    }
}

#[derive(Clone, Copy, Debug)]
struct KerningPair {
    pair: u32,
    value: i16,
}

impl FromData for KerningPair {
    const SIZE: usize = 6;

    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        Some(KerningPair {
            pair: s.read::<u32>()?,
            value: s.read::<i16>()?,
        })
    }
}

fn format0(payload: &[u8], left: GlyphId, right: GlyphId) -> Option<i16> {
    let mut s = Stream::new(payload);
    let count: u16 = s.read()?;
    s.advance(6); // searchRange + entrySelector + rangeShift
    let pairs = s.read_array16::<KerningPair>(count)?;

    let needle = u32::from(left.to_u16()) << 16 | u32::from(right.to_u16());
    pairs
        .binary_search_by(|p| p.pair.cmp(&needle))
        .map(|(_, p)| p.value)
}

// Class-keyed two-dimensional array. The class values are pre-multiplied
// byte offsets; their sum addresses the kerning value from the start of
// the subtable header.
fn format2(subtable: &[u8], header_len: usize, left: GlyphId, right: GlyphId) -> Option<i16> {
    let mut s = Stream::new_at(subtable, header_len)?;
    s.skip::<u16>(); // rowWidth
    let left_class_offset: u16 = s.read()?;
    let right_class_offset: u16 = s.read()?;
    s.skip::<u16>(); // kerning array offset, folded into the class values

    let left_class = format2_class(subtable, left_class_offset, left)?;
    let right_class = format2_class(subtable, right_class_offset, right)?;
    Stream::read_at::<i16>(subtable, usize::from(left_class) + usize::from(right_class))
}

fn format2_class(subtable: &[u8], offset: u16, glyph: GlyphId) -> Option<u16> {
    let mut s = Stream::new_at(subtable, usize::from(offset))?;
    let first: u16 = s.read()?;
    let count: u16 = s.read()?;
    let classes = s.read_array16::<u16>(count)?;
    classes.get(glyph.to_u16().checked_sub(first)?)
}

// Compressed index tables.
fn format3(payload: &[u8], left: GlyphId, right: GlyphId) -> Option<i16> {
    let mut s = Stream::new(payload);
    let glyph_count: u16 = s.read()?;
    let kern_value_count: u8 = s.read()?;
    let left_class_count: u8 = s.read()?;
    let right_class_count: u8 = s.read()?;
    s.skip::<u8>(); // flags

    let values = s.read_array16::<i16>(u16::from(kern_value_count))?;
    let left_classes = s.read_array16::<u8>(glyph_count)?;
    let right_classes = s.read_array16::<u8>(glyph_count)?;
    let indices =
        s.read_array16::<u8>(u16::from(left_class_count) * u16::from(right_class_count))?;

    let left_class = left_classes.get(left.to_u16())?;
    let right_class = right_classes.get(right.to_u16())?;
    if left_class >= left_class_count || right_class >= right_class_count {
        return None;
    }

    let index = u16::from(left_class) * u16::from(right_class_count) + u16::from(right_class);
    let value_index = indices.get(index)?;
    values.get(u16::from(value_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn ot_kern_format0(pairs: &[(u16, u16, i16)]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(0); // version
        w.write_u16(1); // one subtable
        w.write_u16(0); // subtable version
        w.write_u16(6 + 8 + pairs.len() as u16 * 6); // length
        w.write_u8(0); // format
        w.write_u8(0x01); // coverage: horizontal
        w.write_u16(pairs.len() as u16);
        w.write_zeros(6);
        for &(l, r, v) in pairs {
            w.write_u16(l);
            w.write_u16(r);
            w.write_i16(v);
        }
        w.finish()
    }

    #[test]
    fn format0_pairs() {
        let data = ot_kern_format0(&[(1, 2, -40), (2, 3, 15)]);
        let kern = KernTable::parse(&data).unwrap();
        let adjustments = kern.adjustments(&[GlyphId(1), GlyphId(2), GlyphId(3)]);
        assert_eq!(adjustments.get(&0).map(|a| a.horz_advance), Some(-40));
        assert_eq!(adjustments.get(&1).map(|a| a.horz_advance), Some(15));
    }

    #[test]
    fn format1_is_skipped() {
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(0);
        w.write_u16(6 + 2);
        w.write_u8(1); // format 1: state machine
        w.write_u8(0x01);
        w.write_u16(0);
        let kern = KernTable::parse(&w.finish()).unwrap();
        assert!(kern.subtables.is_empty());
    }

    #[test]
    fn format2_class_matrix() {
        // Layout (offsets from subtable start):
        //   6..14   format-2 header
        //   14..22  left class table  (glyph 1 -> row offset)
        //   22..30  right class table (glyph 2 -> column offset)
        //   30..    kerning rows
        let kerning_offset = 30u16;
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(0); // subtable version
        w.write_u16(34); // length
        w.write_u8(2); // format
        w.write_u8(0x01); // horizontal
        // format-2 header
        w.write_u16(2); // rowWidth
        w.write_u16(14); // left class table offset
        w.write_u16(22); // right class table offset
        w.write_u16(kerning_offset);
        // left classes: first=1, count=1, value = kerning_offset + row 0
        w.write_u16(1);
        w.write_u16(1);
        w.write_u16(kerning_offset);
        w.write_u16(0); // padding
        // right classes: first=2, count=1, value = column 1 (bytes)
        w.write_u16(2);
        w.write_u16(1);
        w.write_u16(2);
        w.write_u16(0); // padding
        // kerning row: [0, -9]
        w.write_i16(0);
        w.write_i16(-9);
        let data = w.finish();

        let kern = KernTable::parse(&data).unwrap();
        let adjustments = kern.adjustments(&[GlyphId(1), GlyphId(2)]);
        assert_eq!(adjustments.get(&0).map(|a| a.horz_advance), Some(-9));
    }

    #[test]
    fn format3_lookup() {
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(0);
        let len_pos = w.len();
        w.write_u16(0); // patched below
        w.write_u8(3);
        w.write_u8(0x01);
        // payload
        w.write_u16(4); // glyph count
        w.write_u8(2); // kern values
        w.write_u8(2); // left classes
        w.write_u8(2); // right classes
        w.write_u8(0); // flags
        w.write_i16(0); // value 0
        w.write_i16(-77); // value 1
        w.write_bytes(&[0, 1, 0, 0]); // left classes per glyph
        w.write_bytes(&[0, 0, 1, 0]); // right classes per glyph
        w.write_bytes(&[0, 0, 0, 1]); // index matrix
        let total = w.len();
        w.patch_u16(len_pos, (total - 4) as u16);
        let data = w.finish();

        let kern = KernTable::parse(&data).unwrap();
        let adjustments = kern.adjustments(&[GlyphId(1), GlyphId(2)]);
        assert_eq!(adjustments.get(&0).map(|a| a.horz_advance), Some(-77));
    }
}
