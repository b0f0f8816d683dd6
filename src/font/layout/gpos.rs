//! GPOS lookup application.

use std::collections::BTreeMap;

use super::common::{self, LookupTable};
use super::LayoutTable;
use crate::parser::{Offset, Offset16, Stream};
use crate::GlyphId;

pub const LOOKUP_SINGLE: u16 = 1;
pub const LOOKUP_PAIR: u16 = 2;
pub const LOOKUP_CURSIVE: u16 = 3;
pub const LOOKUP_MARK_TO_BASE: u16 = 4;
pub const LOOKUP_MARK_TO_LIGATURE: u16 = 5;
pub const LOOKUP_MARK_TO_MARK: u16 = 6;
pub const LOOKUP_CONTEXTUAL: u16 = 7;
pub const LOOKUP_CHAINING_CONTEXT: u16 = 8;
pub const LOOKUP_EXTENSION: u16 = 9;

/// A positioning adjustment in font units.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct GlyphAdjustment {
    pub horz_placement: i16,
    pub vert_placement: i16,
    pub horz_advance: i16,
    pub vert_advance: i16,
}

impl GlyphAdjustment {
    pub fn combine(&mut self, other: GlyphAdjustment) {
        self.horz_placement += other.horz_placement;
        self.vert_placement += other.vert_placement;
        self.horz_advance += other.horz_advance;
        self.vert_advance += other.vert_advance;
    }

    pub fn is_zero(&self) -> bool {
        *self == GlyphAdjustment::default()
    }
}

pub(super) fn apply_lookups(
    table: &LayoutTable,
    lookup_indices: &[u16],
    glyphs: &[GlyphId],
) -> BTreeMap<usize, GlyphAdjustment> {
    let mut adjustments = BTreeMap::new();
    for &index in lookup_indices {
        let Some(lookup) = table.lookups.get(usize::from(index)) else {
            continue;
        };

        let mut pos = 0;
        while pos < glyphs.len() {
            let consumed = apply_at(table, lookup, glyphs, pos, &mut adjustments);
            pos += consumed.max(1);
        }
    }

    adjustments.retain(|_, adj| !adj.is_zero());
    adjustments
}

fn combine_at(adjustments: &mut BTreeMap<usize, GlyphAdjustment>, pos: usize, adj: GlyphAdjustment) {
    adjustments.entry(pos).or_default().combine(adj);
}

fn apply_at(
    table: &LayoutTable,
    lookup: &LookupTable,
    glyphs: &[GlyphId],
    pos: usize,
    adjustments: &mut BTreeMap<usize, GlyphAdjustment>,
) -> usize {
    match lookup.kind {
        LOOKUP_SINGLE => {
            let Some(adj) = single_adjustment(lookup, glyphs[pos]) else {
                return 0;
            };
            combine_at(adjustments, pos, adj);
            1
        }
        LOOKUP_PAIR => {
            if pos + 1 >= glyphs.len() {
                return 0;
            }
            let Some((first, second)) = pair_adjustment(lookup, glyphs[pos], glyphs[pos + 1])
            else {
                return 0;
            };
            if let Some(first) = first {
                combine_at(adjustments, pos, first);
            }
            match second {
                Some(second) => {
                    combine_at(adjustments, pos + 1, second);
                    2
                }
                // A null second value record leaves the second glyph as
                // the first of the next pair.
                None => 1,
            }
        }
        LOOKUP_CURSIVE => {
            if pos + 1 >= glyphs.len() {
                return 0;
            }
            let Some(adj) = cursive_adjustment(lookup, glyphs[pos], glyphs[pos + 1]) else {
                return 0;
            };
            combine_at(adjustments, pos + 1, adj);
            1
        }
        LOOKUP_MARK_TO_BASE | LOOKUP_MARK_TO_MARK => {
            if pos == 0 {
                return 0;
            }
            let Some(adj) = mark_adjustment(lookup, glyphs[pos - 1], glyphs[pos]) else {
                return 0;
            };
            combine_at(adjustments, pos, adj);
            1
        }
        LOOKUP_MARK_TO_LIGATURE => {
            if pos == 0 {
                return 0;
            }
            let Some(adj) = mark_to_ligature_adjustment(lookup, glyphs[pos - 1], glyphs[pos])
            else {
                return 0;
            };
            combine_at(adjustments, pos, adj);
            1
        }
        LOOKUP_CONTEXTUAL | LOOKUP_CHAINING_CONTEXT => {
            for subtable in &lookup.subtables {
                let matched = if lookup.kind == LOOKUP_CONTEXTUAL {
                    common::match_context(subtable, glyphs, pos)
                } else {
                    common::match_chained_context(subtable, glyphs, pos)
                };
                let Some(matched) = matched else { continue };

                for record in &matched.records {
                    let at = pos + usize::from(record.glyph_index);
                    if at < glyphs.len() {
                        if let Some(nested) = table.lookups.get(usize::from(record.lookup_index))
                        {
                            apply_at(table, nested, glyphs, at, adjustments);
                        }
                    }
                }

                return matched.input_consumed;
            }
            0
        }
        _ => 0,
    }
}

mod value_format {
    pub const X_PLACEMENT: u16 = 0x0001;
    pub const Y_PLACEMENT: u16 = 0x0002;
    pub const X_ADVANCE: u16 = 0x0004;
    pub const Y_ADVANCE: u16 = 0x0008;
    pub const DEVICE_MASK: u16 = 0x00F0;
}

fn value_record_size(format: u16) -> usize {
    usize::from((format & 0x00FF).count_ones() as u16) * 2
}

// Returns None for a null (format 0) record.
fn parse_value_record(s: &mut Stream, format: u16) -> Option<Option<GlyphAdjustment>> {
    if format == 0 {
        return Some(None);
    }

    let mut adj = GlyphAdjustment::default();
    if format & value_format::X_PLACEMENT != 0 {
        adj.horz_placement = s.read::<i16>()?;
    }
    if format & value_format::Y_PLACEMENT != 0 {
        adj.vert_placement = s.read::<i16>()?;
    }
    if format & value_format::X_ADVANCE != 0 {
        adj.horz_advance = s.read::<i16>()?;
    }
    if format & value_format::Y_ADVANCE != 0 {
        adj.vert_advance = s.read::<i16>()?;
    }
    for bit in 0..4 {
        if format & (value_format::DEVICE_MASK & (0x10 << bit)) != 0 {
            s.skip::<u16>();
        }
    }

    Some(Some(adj))
}

fn single_adjustment(lookup: &LookupTable, gid: GlyphId) -> Option<GlyphAdjustment> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        let cov_offset = s.read::<Offset16>()?;
        let value_format = s.read::<u16>()?;
        let Some(index) = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, gid)
        else {
            continue;
        };

        match format {
            1 => return parse_value_record(&mut s, value_format)?,
            2 => {
                let count = s.read::<u16>()?;
                if index >= count {
                    continue;
                }
                s.advance(usize::from(index) * value_record_size(value_format));
                return parse_value_record(&mut s, value_format)?;
            }
            _ => {
                log::warn!("unknown GPOS/Single subtable format {}", format);
            }
        }
    }

    None
}

type PairAdjustments = (Option<GlyphAdjustment>, Option<GlyphAdjustment>);

fn pair_adjustment(lookup: &LookupTable, first: GlyphId, second: GlyphId) -> Option<PairAdjustments> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        let cov_offset = s.read::<Offset16>()?;
        let value_format1 = s.read::<u16>()?;
        let value_format2 = s.read::<u16>()?;

        // The coverage table lists only the first glyph of each pair.
        let Some(index) = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, first)
        else {
            continue;
        };

        match format {
            1 => {
                let set_count = s.read::<u16>()?;
                if index >= set_count {
                    continue;
                }
                s.advance(usize::from(index) * 2);
                let set_offset = s.read::<Offset16>()?;
                let set_data = subtable.get(set_offset.to_usize()..)?;

                let record_size =
                    2 + value_record_size(value_format1) + value_record_size(value_format2);
                let mut set = Stream::new(set_data);
                let pair_count = usize::from(set.read::<u16>()?);

                // Binary search on the second glyph id.
                let mut low = 0usize;
                let mut high = pair_count;
                while low < high {
                    let mid = (low + high) / 2;
                    let record_offset = 2 + mid * record_size;
                    let glyph: GlyphId = Stream::read_at(set_data, record_offset)?;
                    if glyph == second {
                        let mut rs = Stream::new_at(set_data, record_offset + 2)?;
                        let a1 = parse_value_record(&mut rs, value_format1)?;
                        let a2 = parse_value_record(&mut rs, value_format2)?;
                        return Some((a1, a2));
                    } else if glyph < second {
                        low = mid + 1;
                    } else {
                        high = mid;
                    }
                }
            }
            2 => {
                let class_def1 = subtable.get(s.read::<Offset16>()?.to_usize()..)?;
                let class_def2 = subtable.get(s.read::<Offset16>()?.to_usize()..)?;
                let class1_count = s.read::<u16>()?;
                let class2_count = s.read::<u16>()?;

                let class1 = common::glyph_class(class_def1, first);
                let class2 = common::glyph_class(class_def2, second);
                if class1 >= class1_count || class2 >= class2_count {
                    continue;
                }

                let record_size =
                    value_record_size(value_format1) + value_record_size(value_format2);
                let offset = (usize::from(class1) * usize::from(class2_count)
                    + usize::from(class2))
                    * record_size;
                s.advance(offset);
                let a1 = parse_value_record(&mut s, value_format1)?;
                let a2 = parse_value_record(&mut s, value_format2)?;
                return Some((a1, a2));
            }
            _ => {
                log::warn!("unknown GPOS/Pair subtable format {}", format);
            }
        }
    }

    None
}

// Anchor tables: only the design-unit coordinates matter here.
fn parse_anchor(data: &[u8]) -> Option<(i16, i16)> {
    let mut s = Stream::new(data);
    let _format = s.read::<u16>()?;
    let x = s.read::<i16>()?;
    let y = s.read::<i16>()?;
    Some((x, y))
}

// Positions `second` so its entry anchor meets `first`'s exit anchor.
fn cursive_adjustment(
    lookup: &LookupTable,
    first: GlyphId,
    second: GlyphId,
) -> Option<GlyphAdjustment> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        if format != 1 {
            log::warn!("unknown GPOS/Cursive subtable format {}", format);
            continue;
        }

        let cov_offset = s.read::<Offset16>()?;
        let coverage = subtable.get(cov_offset.to_usize()..)?;
        let first_index = match common::coverage_index(coverage, first) {
            Some(index) => index,
            None => continue,
        };
        let second_index = match common::coverage_index(coverage, second) {
            Some(index) => index,
            None => continue,
        };

        let count = s.read::<u16>()?;
        if first_index >= count || second_index >= count {
            continue;
        }

        let records = s.read_bytes(usize::from(count) * 4)?;
        let exit_offset: Option<Offset16> =
            Stream::read_at(records, usize::from(first_index) * 4 + 2)?;
        let entry_offset: Option<Offset16> =
            Stream::read_at(records, usize::from(second_index) * 4)?;
        let (Some(exit_offset), Some(entry_offset)) = (exit_offset, entry_offset) else {
            continue;
        };

        let (exit_x, exit_y) = parse_anchor(subtable.get(exit_offset.to_usize()..)?)?;
        let (entry_x, entry_y) = parse_anchor(subtable.get(entry_offset.to_usize()..)?)?;
        return Some(GlyphAdjustment {
            horz_placement: exit_x - entry_x,
            vert_placement: exit_y - entry_y,
            ..GlyphAdjustment::default()
        });
    }

    None
}

// MarkToBase and MarkToMark share their layout: a MarkArray for the mark
// and a matrix of anchors for the preceding glyph.
fn mark_adjustment(lookup: &LookupTable, base: GlyphId, mark: GlyphId) -> Option<GlyphAdjustment> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        if format != 1 {
            log::warn!("unknown GPOS/MarkAttachment subtable format {}", format);
            continue;
        }

        let mark_cov_offset = s.read::<Offset16>()?;
        let base_cov_offset = s.read::<Offset16>()?;
        let mark_class_count = s.read::<u16>()?;
        let mark_array_offset = s.read::<Offset16>()?;
        let base_array_offset = s.read::<Offset16>()?;

        let Some(mark_index) =
            common::coverage_index(subtable.get(mark_cov_offset.to_usize()..)?, mark)
        else {
            continue;
        };
        let Some(base_index) =
            common::coverage_index(subtable.get(base_cov_offset.to_usize()..)?, base)
        else {
            continue;
        };

        let mark_array = subtable.get(mark_array_offset.to_usize()..)?;
        let (mark_class, mark_anchor) = mark_array_entry(mark_array, mark_index)?;
        if mark_class >= mark_class_count {
            continue;
        }

        let base_array = subtable.get(base_array_offset.to_usize()..)?;
        let mut bs = Stream::new(base_array);
        let base_count = bs.read::<u16>()?;
        if base_index >= base_count {
            continue;
        }
        let row = usize::from(base_index) * usize::from(mark_class_count);
        let anchor_offset: Option<Offset16> =
            Stream::read_at(base_array, 2 + (row + usize::from(mark_class)) * 2)?;
        let Some(anchor_offset) = anchor_offset else {
            continue;
        };

        let (base_x, base_y) = parse_anchor(base_array.get(anchor_offset.to_usize()..)?)?;
        return Some(GlyphAdjustment {
            horz_placement: base_x - mark_anchor.0,
            vert_placement: base_y - mark_anchor.1,
            ..GlyphAdjustment::default()
        });
    }

    None
}

fn mark_to_ligature_adjustment(
    lookup: &LookupTable,
    ligature: GlyphId,
    mark: GlyphId,
) -> Option<GlyphAdjustment> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        if format != 1 {
            log::warn!("unknown GPOS/MarkToLigature subtable format {}", format);
            continue;
        }

        let mark_cov_offset = s.read::<Offset16>()?;
        let lig_cov_offset = s.read::<Offset16>()?;
        let mark_class_count = s.read::<u16>()?;
        let mark_array_offset = s.read::<Offset16>()?;
        let lig_array_offset = s.read::<Offset16>()?;

        let Some(mark_index) =
            common::coverage_index(subtable.get(mark_cov_offset.to_usize()..)?, mark)
        else {
            continue;
        };
        let Some(lig_index) =
            common::coverage_index(subtable.get(lig_cov_offset.to_usize()..)?, ligature)
        else {
            continue;
        };

        let mark_array = subtable.get(mark_array_offset.to_usize()..)?;
        let (mark_class, mark_anchor) = mark_array_entry(mark_array, mark_index)?;
        if mark_class >= mark_class_count {
            continue;
        }

        let lig_array = subtable.get(lig_array_offset.to_usize()..)?;
        let mut ls = Stream::new(lig_array);
        let lig_count = ls.read::<u16>()?;
        if lig_index >= lig_count {
            continue;
        }
        ls.advance(usize::from(lig_index) * 2);
        let attach_offset = ls.read::<Offset16>()?;
        let attach = lig_array.get(attach_offset.to_usize()..)?;

        // Attach the mark to the ligature's first component.
        let mut as_ = Stream::new(attach);
        let component_count = as_.read::<u16>()?;
        if component_count == 0 {
            continue;
        }
        let anchor_offset: Option<Offset16> = as_.read()?;
        let Some(anchor_offset) = anchor_offset else {
            continue;
        };

        let (lig_x, lig_y) = parse_anchor(attach.get(anchor_offset.to_usize()..)?)?;
        return Some(GlyphAdjustment {
            horz_placement: lig_x - mark_anchor.0,
            vert_placement: lig_y - mark_anchor.1,
            ..GlyphAdjustment::default()
        });
    }

    None
}

fn mark_array_entry(mark_array: &[u8], mark_index: u16) -> Option<(u16, (i16, i16))> {
    let mut s = Stream::new(mark_array);
    let count = s.read::<u16>()?;
    if mark_index >= count {
        return None;
    }
    s.advance(usize::from(mark_index) * 4);
    let class = s.read::<u16>()?;
    let anchor_offset = s.read::<Offset16>()?;
    let anchor = parse_anchor(mark_array.get(anchor_offset.to_usize()..)?)?;
    Some((class, anchor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::layout::{position, LayoutKind, LayoutTable};
    use crate::writer::Writer;
    use std::collections::BTreeSet;

    fn coverage(glyphs: &[u16]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(1);
        w.write_u16(glyphs.len() as u16);
        for &g in glyphs {
            w.write_u16(g);
        }
        w.finish()
    }

    // A GPOS with one `kern` feature: pair (1, 2) -> first x_advance -50.
    fn kern_gpos(second_format: u16, second_value: i16) -> Vec<u8> {
        let cov = coverage(&[1]);
        let mut sub = Writer::new();
        sub.write_u16(1); // format
        let cov_patch = sub.len();
        sub.write_u16(0);
        sub.write_u16(value_format::X_ADVANCE); // valueFormat1
        sub.write_u16(second_format); // valueFormat2
        sub.write_u16(1); // pairSetCount
        let set_patch = sub.len();
        sub.write_u16(0);
        let set_offset = sub.len();
        sub.write_u16(1); // pairValueCount
        sub.write_u16(2); // second glyph
        sub.write_i16(-50); // value1.xAdvance
        if second_format != 0 {
            sub.write_i16(second_value);
        }
        let cov_offset = sub.len();
        sub.write_bytes(&cov);
        let mut sub = sub.finish();
        sub[cov_patch..cov_patch + 2].copy_from_slice(&(cov_offset as u16).to_be_bytes());
        sub[set_patch..set_patch + 2].copy_from_slice(&(set_offset as u16).to_be_bytes());

        let mut lookups = Writer::new();
        lookups.write_u16(1);
        lookups.write_u16(4);
        lookups.write_u16(LOOKUP_PAIR);
        lookups.write_u16(0);
        lookups.write_u16(1);
        lookups.write_u16(10);
        lookups.write_bytes(&sub);

        let mut features = Writer::new();
        features.write_u16(1);
        features.write_bytes(b"kern");
        features.write_u16(8);
        features.write_u16(0);
        features.write_u16(1);
        features.write_u16(0);

        let mut scripts = Writer::new();
        scripts.write_u16(1);
        scripts.write_bytes(b"DFLT");
        scripts.write_u16(8);
        scripts.write_u16(4);
        scripts.write_u16(0);
        scripts.write_u16(0);
        scripts.write_u16(0xFFFF);
        scripts.write_u16(1);
        scripts.write_u16(0);

        let mut w = Writer::new();
        w.write_u32(0x00010000);
        let script_offset = 10;
        let feature_offset = script_offset + scripts.len();
        let lookup_offset = feature_offset + features.len();
        w.write_u16(script_offset as u16);
        w.write_u16(feature_offset as u16);
        w.write_u16(lookup_offset as u16);
        w.write_bytes(scripts.data());
        w.write_bytes(features.data());
        w.write_bytes(lookups.data());
        w.finish()
    }

    fn selected(table: &LayoutTable) -> Vec<u16> {
        let mut enabled = BTreeSet::new();
        enabled.insert(crate::Tag::from_bytes(b"kern"));
        table.select_lookups(crate::Tag::from_bytes(b"DFLT"), None, &enabled)
    }

    #[test]
    fn pair_kerning_with_null_second_record() {
        let data = kern_gpos(0, 0);
        let table = LayoutTable::parse(LayoutKind::Positioning, &data).unwrap();
        let lookups = selected(&table);

        let glyphs = [GlyphId(1), GlyphId(2), GlyphId(1), GlyphId(2)];
        let adjustments = position(&table, &lookups, &glyphs);

        // With a null second record the second glyph starts the next pair,
        // so both pairs fire.
        assert_eq!(adjustments.get(&0).map(|a| a.horz_advance), Some(-50));
        assert_eq!(adjustments.get(&2).map(|a| a.horz_advance), Some(-50));
    }

    #[test]
    fn pair_kerning_consumes_second_when_present() {
        let data = kern_gpos(value_format::X_ADVANCE, 25);
        let table = LayoutTable::parse(LayoutKind::Positioning, &data).unwrap();
        let lookups = selected(&table);

        // With a non-null second record the pair (1, 2) consumes both
        // glyphs, so the overlapping pair at index 1 never forms.
        let glyphs = [GlyphId(1), GlyphId(2), GlyphId(2)];
        let adjustments = position(&table, &lookups, &glyphs);
        assert_eq!(adjustments.get(&0).map(|a| a.horz_advance), Some(-50));
        assert_eq!(adjustments.get(&1).map(|a| a.horz_advance), Some(25));
        assert_eq!(adjustments.get(&2), None);
    }
}
