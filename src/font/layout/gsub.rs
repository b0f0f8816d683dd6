//! GSUB lookup application.

use super::common::{self, LookupTable};
use super::{LayoutTable, ShapedGlyph};
use crate::parser::{Offset, Offset16, Stream};
use crate::GlyphId;

pub const LOOKUP_SINGLE: u16 = 1;
pub const LOOKUP_MULTIPLE: u16 = 2;
pub const LOOKUP_ALTERNATE: u16 = 3;
pub const LOOKUP_LIGATURE: u16 = 4;
pub const LOOKUP_CONTEXTUAL: u16 = 5;
pub const LOOKUP_CHAINING_CONTEXT: u16 = 6;
pub const LOOKUP_EXTENSION: u16 = 7;
pub const LOOKUP_REVERSE_CHAIN: u16 = 8;

pub(super) fn apply_lookups(
    table: &LayoutTable,
    lookup_indices: &[u16],
    glyphs: &mut Vec<ShapedGlyph>,
) {
    for &index in lookup_indices {
        apply_lookup(table, index, glyphs);
    }
}

fn apply_lookup(table: &LayoutTable, index: u16, glyphs: &mut Vec<ShapedGlyph>) {
    let Some(lookup) = table.lookups.get(usize::from(index)) else {
        return;
    };

    if lookup.kind == LOOKUP_REVERSE_CHAIN {
        apply_reverse_chain(lookup, glyphs);
        return;
    }

    let mut pos = 0;
    while pos < glyphs.len() {
        let consumed = apply_at(table, lookup, glyphs, pos);
        pos += consumed.max(1);
    }
}

// Applies one lookup at one position; returns how many output glyphs the
// outer loop must skip (0 = no match).
fn apply_at(
    table: &LayoutTable,
    lookup: &LookupTable,
    glyphs: &mut Vec<ShapedGlyph>,
    pos: usize,
) -> usize {
    match lookup.kind {
        LOOKUP_SINGLE => {
            let Some(new_gid) = single_substitute(lookup, glyphs[pos].gid) else {
                return 0;
            };
            glyphs[pos].gid = new_gid;
            1
        }
        LOOKUP_MULTIPLE => {
            let Some(sequence) = multiple_substitute(lookup, glyphs[pos].gid) else {
                return 0;
            };
            let codepoints = core::mem::take(&mut glyphs[pos].codepoints);
            let count = sequence.len();
            let replacement = sequence.into_iter().enumerate().map(|(i, gid)| ShapedGlyph {
                gid,
                // The original codepoints stay with the first output glyph.
                codepoints: if i == 0 { codepoints.clone() } else { Vec::new() },
            });
            glyphs.splice(pos..pos + 1, replacement);
            count
        }
        LOOKUP_ALTERNATE => {
            let Some(new_gid) = alternate_substitute(lookup, glyphs[pos].gid) else {
                return 0;
            };
            glyphs[pos].gid = new_gid;
            1
        }
        LOOKUP_LIGATURE => {
            let ids: Vec<GlyphId> = glyphs[pos..].iter().map(|g| g.gid).collect();
            let Some((ligature, component_count)) = ligature_substitute(lookup, &ids) else {
                return 0;
            };
            let codepoints = glyphs[pos..pos + component_count]
                .iter()
                .flat_map(|g| g.codepoints.iter().copied())
                .collect();
            glyphs.splice(
                pos..pos + component_count,
                core::iter::once(ShapedGlyph {
                    gid: ligature,
                    codepoints,
                }),
            );
            1
        }
        LOOKUP_CONTEXTUAL | LOOKUP_CHAINING_CONTEXT => {
            let ids: Vec<GlyphId> = glyphs.iter().map(|g| g.gid).collect();
            for subtable in &lookup.subtables {
                let matched = if lookup.kind == LOOKUP_CONTEXTUAL {
                    common::match_context(subtable, &ids, pos)
                } else {
                    common::match_chained_context(subtable, &ids, pos)
                };
                let Some(matched) = matched else { continue };

                for record in &matched.records {
                    let at = pos + usize::from(record.glyph_index);
                    if at < glyphs.len() {
                        if let Some(nested) =
                            table.lookups.get(usize::from(record.lookup_index))
                        {
                            apply_at(table, nested, glyphs, at);
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

fn single_substitute(lookup: &LookupTable, gid: GlyphId) -> Option<GlyphId> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        let cov_offset = s.read::<Offset16>()?;
        let Some(index) = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, gid)
        else {
            continue;
        };

        match format {
            1 => {
                let delta = s.read::<i16>()?;
                return Some(GlyphId::from(gid.to_u16().wrapping_add(delta as u16)));
            }
            2 => {
                let count = s.read::<u16>()?;
                let substitutes = s.read_array16::<GlyphId>(count)?;
                return substitutes.get(index);
            }
            _ => {
                log::warn!("unknown GSUB/Single subtable format {}", format);
            }
        }
    }

    None
}

fn multiple_substitute(lookup: &LookupTable, gid: GlyphId) -> Option<Vec<GlyphId>> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        if format != 1 {
            log::warn!("unknown GSUB/Multiple subtable format {}", format);
            continue;
        }

        let cov_offset = s.read::<Offset16>()?;
        let Some(index) = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, gid)
        else {
            continue;
        };

        let count = s.read::<u16>()?;
        if index >= count {
            continue;
        }
        s.advance(usize::from(index) * 2);
        let seq_offset = s.read::<Offset16>()?;
        let mut seq = Stream::new(subtable.get(seq_offset.to_usize()..)?);

        // OpenType prohibits glyph deletion via an empty sequence.
        let glyph_count = seq.read::<u16>()?;
        if glyph_count == 0 {
            continue;
        }

        let mut out = Vec::with_capacity(usize::from(glyph_count));
        for _ in 0..glyph_count {
            out.push(seq.read::<GlyphId>()?);
        }
        return Some(out);
    }

    None
}

fn alternate_substitute(lookup: &LookupTable, gid: GlyphId) -> Option<GlyphId> {
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        if format != 1 {
            log::warn!("unknown GSUB/Alternate subtable format {}", format);
            continue;
        }

        let cov_offset = s.read::<Offset16>()?;
        let Some(index) = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, gid)
        else {
            continue;
        };

        let count = s.read::<u16>()?;
        if index >= count {
            continue;
        }
        s.advance(usize::from(index) * 2);
        let set_offset = s.read::<Offset16>()?;
        let mut set = Stream::new(subtable.get(set_offset.to_usize()..)?);

        // Without user input there is nothing to pick an alternate by;
        // take the first one.
        let alt_count = set.read::<u16>()?;
        if alt_count == 0 {
            continue;
        }
        return set.read::<GlyphId>();
    }

    None
}

// Returns the ligature glyph and how many input glyphs it replaces.
fn ligature_substitute(lookup: &LookupTable, glyphs: &[GlyphId]) -> Option<(GlyphId, usize)> {
    let first = *glyphs.first()?;
    for subtable in &lookup.subtables {
        let mut s = Stream::new(subtable);
        let format = s.read::<u16>()?;
        if format != 1 {
            log::warn!("unknown GSUB/Ligature subtable format {}", format);
            continue;
        }

        let cov_offset = s.read::<Offset16>()?;
        let Some(index) = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, first)
        else {
            continue;
        };

        let set_count = s.read::<u16>()?;
        if index >= set_count {
            continue;
        }
        s.advance(usize::from(index) * 2);
        let set_offset = s.read::<Offset16>()?;
        let set_data = subtable.get(set_offset.to_usize()..)?;

        let mut set = Stream::new(set_data);
        let ligature_count = set.read::<u16>()?;
        'ligatures: for _ in 0..ligature_count {
            let lig_offset = set.read::<Offset16>()?;
            let mut lig = Stream::new(set_data.get(lig_offset.to_usize()..)?);
            let ligature_glyph = lig.read::<GlyphId>()?;
            let component_count = usize::from(lig.read::<u16>()?);
            if component_count == 0 || glyphs.len() < component_count {
                continue;
            }

            // The first component is implied by the coverage table.
            for k in 1..component_count {
                if glyphs[k] != lig.read::<GlyphId>()? {
                    continue 'ligatures;
                }
            }

            return Some((ligature_glyph, component_count));
        }
    }

    None
}

// Reverse chaining single substitution runs backwards over the string and
// never fires nested lookups.
fn apply_reverse_chain(lookup: &LookupTable, glyphs: &mut [ShapedGlyph]) {
    for pos in (0..glyphs.len()).rev() {
        let ids: Vec<GlyphId> = glyphs.iter().map(|g| g.gid).collect();
        for subtable in &lookup.subtables {
            if let Some(new_gid) = reverse_chain_substitute(subtable, &ids, pos) {
                glyphs[pos].gid = new_gid;
                break;
            }
        }
    }
}

fn reverse_chain_substitute(subtable: &[u8], glyphs: &[GlyphId], pos: usize) -> Option<GlyphId> {
    let mut s = Stream::new(subtable);
    let format = s.read::<u16>()?;
    if format != 1 {
        return None;
    }

    let cov_offset = s.read::<Offset16>()?;
    let index = common::coverage_index(subtable.get(cov_offset.to_usize()..)?, glyphs[pos])?;

    let backtrack_count = s.read::<u16>()?;
    let backtrack_offsets = s.read_array16::<Offset16>(backtrack_count)?;
    let lookahead_count = s.read::<u16>()?;
    let lookahead_offsets = s.read_array16::<Offset16>(lookahead_count)?;

    if pos < usize::from(backtrack_count)
        || glyphs.len() - pos <= usize::from(lookahead_count)
    {
        return None;
    }

    for (i, offset) in backtrack_offsets.into_iter().enumerate() {
        common::coverage_index(subtable.get(offset.to_usize()..)?, glyphs[pos - 1 - i])?;
    }
    for (i, offset) in lookahead_offsets.into_iter().enumerate() {
        common::coverage_index(subtable.get(offset.to_usize()..)?, glyphs[pos + 1 + i])?;
    }

    let glyph_count = s.read::<u16>()?;
    let substitutes = s.read_array16::<GlyphId>(glyph_count)?;
    substitutes.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::layout::LayoutKind;
    use crate::writer::Writer;

    fn coverage(glyphs: &[u16]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(1);
        w.write_u16(glyphs.len() as u16);
        for &g in glyphs {
            w.write_u16(g);
        }
        w.finish()
    }

    // A GSUB table with one `liga` feature for DFLT mapping f+i -> fi.
    // Glyphs: f=1, i=2, fi=3, t=4.
    pub fn liga_gsub() -> Vec<u8> {
        // Ligature subtable.
        let cov = coverage(&[1]);
        let mut sub = Writer::new();
        sub.write_u16(1); // format
        sub.write_u16(0); // coverage offset, patched
        sub.write_u16(1); // ligature set count
        sub.write_u16(0); // set offset, patched
        let set_offset = sub.len();
        sub.write_u16(1); // ligature count
        sub.write_u16(4); // ligature offset within set
        sub.write_u16(3); // ligature glyph: fi
        sub.write_u16(2); // component count
        sub.write_u16(2); // second component: i
        let cov_offset = sub.len();
        sub.write_bytes(&cov);
        let mut sub = sub.finish();
        sub[2..4].copy_from_slice(&(cov_offset as u16).to_be_bytes());
        sub[6..8].copy_from_slice(&(set_offset as u16).to_be_bytes());

        // Lookup list with a single ligature lookup.
        let mut lookups = Writer::new();
        lookups.write_u16(1); // lookup count
        lookups.write_u16(4); // offset to lookup 0
        lookups.write_u16(LOOKUP_LIGATURE);
        lookups.write_u16(0); // flags
        lookups.write_u16(1); // subtable count
        lookups.write_u16(10); // subtable offset (from lookup start)
        lookups.write_bytes(&sub);

        // Feature list: one `liga` feature using lookup 0.
        let mut features = Writer::new();
        features.write_u16(1);
        features.write_bytes(b"liga");
        features.write_u16(8); // offset
        features.write_u16(0); // featureParams
        features.write_u16(1); // lookup count
        features.write_u16(0); // lookup index 0

        // Script list: DFLT with a default LangSys using feature 0.
        let mut scripts = Writer::new();
        scripts.write_u16(1);
        scripts.write_bytes(b"DFLT");
        scripts.write_u16(8); // script offset
        scripts.write_u16(4); // defaultLangSys offset (within script)
        scripts.write_u16(0); // langSysCount
        scripts.write_u16(0); // lookupOrder
        scripts.write_u16(0xFFFF); // no required feature
        scripts.write_u16(1); // feature count
        scripts.write_u16(0); // feature index 0

        let mut w = Writer::new();
        w.write_u32(0x00010000);
        let header_size = 4 + 3 * 2;
        let script_offset = header_size;
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

    #[test]
    fn ligature_replaces_f_i() {
        use crate::font::layout::{substitute, LayoutTable};
        use std::collections::BTreeSet;

        let data = liga_gsub();
        let table = LayoutTable::parse(LayoutKind::Substitution, &data).unwrap();

        let mut enabled = BTreeSet::new();
        enabled.insert(crate::Tag::from_bytes(b"liga"));
        let lookups = table.select_lookups(crate::Tag::from_bytes(b"latn"), None, &enabled);
        assert_eq!(lookups, [0]);

        // "fit": f i t
        let glyphs = vec![
            ShapedGlyph::new(GlyphId(1), 'f' as u32),
            ShapedGlyph::new(GlyphId(2), 'i' as u32),
            ShapedGlyph::new(GlyphId(4), 't' as u32),
        ];
        let result = substitute(&table, &lookups, glyphs, |_| false);

        assert_eq!(result.glyphs.len(), 2);
        assert_eq!(result.glyphs[0].gid, GlyphId(3));
        assert_eq!(result.glyphs[0].codepoints, ['f' as u32, 'i' as u32]);
        assert_eq!(result.glyphs[1].gid, GlyphId(4));

        // ToUnicode bookkeeping: the ligature glyph maps to "fi".
        assert_eq!(
            result.maps.contractions.get(&GlyphId(3)),
            Some(&vec!['f' as u32, 'i' as u32])
        );
    }

    #[test]
    fn no_feature_enabled_means_no_substitution() {
        use crate::font::layout::{substitute, LayoutTable};
        use std::collections::BTreeSet;

        let data = liga_gsub();
        let table = LayoutTable::parse(LayoutKind::Substitution, &data).unwrap();
        let lookups =
            table.select_lookups(crate::Tag::from_bytes(b"latn"), None, &BTreeSet::new());
        assert!(lookups.is_empty());

        let glyphs = vec![
            ShapedGlyph::new(GlyphId(1), 'f' as u32),
            ShapedGlyph::new(GlyphId(2), 'i' as u32),
        ];
        let result = substitute(&table, &lookups, glyphs, |_| true);
        assert_eq!(result.glyphs.len(), 2);
        assert!(result.maps.contractions.is_empty());
    }
}
