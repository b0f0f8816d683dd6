//! Structures shared by GSUB and GPOS: script/feature/lookup lists,
//! coverage and class-definition tables, and contextual-rule matching.

use crate::parser::{FromData, Offset, Offset16, Stream};
use crate::{GlyphId, Tag};

bitflags::bitflags! {
    /// Lookup qualifiers from the LookupList.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct LookupFlags: u16 {
        const RIGHT_TO_LEFT = 0x0001;
        const IGNORE_BASE_GLYPHS = 0x0002;
        const IGNORE_LIGATURES = 0x0004;
        const IGNORE_MARKS = 0x0008;
        const USE_MARK_FILTERING_SET = 0x0010;
        const MARK_ATTACHMENT_TYPE_MASK = 0xFF00;
    }
}

/// A language system: its required feature plus the features it names.
#[derive(Clone, Default, Debug)]
pub struct LangSys {
    pub required_feature: Option<u16>,
    pub feature_indices: Vec<u16>,
}

/// One script with its language systems.
#[derive(Clone, Debug)]
pub struct Script {
    pub tag: Tag,
    pub default_lang_sys: Option<LangSys>,
    pub lang_sys: Vec<(Tag, LangSys)>,
}

/// One feature: its tag and the lookups it references.
#[derive(Clone, Debug)]
pub struct Feature {
    pub tag: Tag,
    pub lookup_indices: Vec<u16>,
}

/// A single lookup; subtable byte spans are preserved verbatim for
/// interpretation at application time.
#[derive(Clone, Debug)]
pub struct LookupTable<'a> {
    pub kind: u16,
    pub flags: LookupFlags,
    pub subtables: Vec<&'a [u8]>,
}

/// A nested-lookup instruction inside contextual rules: apply lookup
/// `lookup_index` at sequence position `glyph_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextualLookupRecord {
    pub glyph_index: u16,
    pub lookup_index: u16,
}

impl FromData for ContextualLookupRecord {
    const SIZE: usize = 4;

    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        Some(ContextualLookupRecord {
            glyph_index: s.read::<u16>()?,
            lookup_index: s.read::<u16>()?,
        })
    }
}

/// A matched contextual rule: how many input glyphs it consumed and the
/// nested lookups to fire.
#[derive(Clone, Debug)]
pub struct ContextMatch {
    pub input_consumed: usize,
    pub records: Vec<ContextualLookupRecord>,
}

pub fn parse_lang_sys(data: &[u8]) -> Option<LangSys> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // lookupOrderOffset, reserved
    let required = s.read::<u16>()?;
    let count = s.read::<u16>()?;
    let mut feature_indices = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        feature_indices.push(s.read::<u16>()?);
    }

    Some(LangSys {
        required_feature: (required != 0xFFFF).then_some(required),
        feature_indices,
    })
}

pub fn parse_script_list(data: &[u8]) -> Option<Vec<Script>> {
    let mut s = Stream::new(data);
    let count = s.read::<u16>()?;
    let mut scripts = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let tag = s.read::<Tag>()?;
        let offset = s.read::<Offset16>()?;
        let script_data = data.get(offset.to_usize()..)?;

        let mut ss = Stream::new(script_data);
        let default_offset = s_read_optional_offset(&mut ss)?;
        let default_lang_sys = match default_offset {
            Some(ofs) => parse_lang_sys(script_data.get(ofs..)?),
            None => None,
        };

        let lang_count = ss.read::<u16>()?;
        let mut lang_sys = Vec::with_capacity(usize::from(lang_count));
        for _ in 0..lang_count {
            let lang_tag = ss.read::<Tag>()?;
            let lang_offset = ss.read::<Offset16>()?;
            if let Some(sys) = parse_lang_sys(script_data.get(lang_offset.to_usize()..)?) {
                lang_sys.push((lang_tag, sys));
            }
        }

        scripts.push(Script {
            tag,
            default_lang_sys,
            lang_sys,
        });
    }

    Some(scripts)
}

fn s_read_optional_offset(s: &mut Stream) -> Option<Option<usize>> {
    let raw = s.read::<u16>()?;
    Some((raw != 0).then_some(usize::from(raw)))
}

pub fn parse_feature_list(data: &[u8]) -> Option<Vec<Feature>> {
    let mut s = Stream::new(data);
    let count = s.read::<u16>()?;
    let mut features = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let tag = s.read::<Tag>()?;
        let offset = s.read::<Offset16>()?;
        let feature_data = data.get(offset.to_usize()..)?;

        let mut fs = Stream::new(feature_data);
        fs.skip::<u16>(); // featureParamsOffset
        let lookup_count = fs.read::<u16>()?;
        let mut lookup_indices = Vec::with_capacity(usize::from(lookup_count));
        for _ in 0..lookup_count {
            lookup_indices.push(fs.read::<u16>()?);
        }

        features.push(Feature {
            tag,
            lookup_indices,
        });
    }

    Some(features)
}

/// `extension_kind` names the lookup type that wraps other lookups
/// (GSUB 7 / GPOS 9); its subtables are resolved in place.
pub fn parse_lookup_list<'a>(data: &'a [u8], extension_kind: u16) -> Option<Vec<LookupTable<'a>>> {
    let mut s = Stream::new(data);
    let count = s.read::<u16>()?;
    let mut lookups = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let offset = s.read::<Offset16>()?;
        let lookup_data = data.get(offset.to_usize()..)?;

        let mut ls = Stream::new(lookup_data);
        let mut kind = ls.read::<u16>()?;
        let flags = LookupFlags::from_bits_truncate(ls.read::<u16>()?);
        let subtable_count = ls.read::<u16>()?;
        let mut subtables = Vec::with_capacity(usize::from(subtable_count));
        for _ in 0..subtable_count {
            let sub_offset = ls.read::<Offset16>()?;
            let mut subtable = lookup_data.get(sub_offset.to_usize()..)?;

            if kind == extension_kind {
                let mut es = Stream::new(subtable);
                let format = es.read::<u16>()?;
                if format != 1 {
                    return None;
                }
                kind = es.read::<u16>()?;
                let ext_offset = es.read::<u32>()?;
                subtable = subtable.get(usize::try_from(ext_offset).ok()?..)?;
            }

            subtables.push(subtable);
        }

        lookups.push(LookupTable {
            kind,
            flags,
            subtables,
        });
    }

    Some(lookups)
}

/// Binary-searches a coverage table for the glyph's coverage index.
pub fn coverage_index(data: &[u8], glyph: GlyphId) -> Option<u16> {
    let mut s = Stream::new(data);
    let format = s.read::<u16>()?;
    let gid = glyph.to_u16();
    match format {
        1 => {
            let count = s.read::<u16>()?;
            let glyphs = s.read_array16::<u16>(count)?;
            glyphs.binary_search(&gid).map(|(index, _)| index)
        }
        2 => {
            let count = s.read::<u16>()?;
            let ranges = s.read_array16::<RangeRecord>(count)?;
            let (_, range) = ranges.binary_search_by(|r| {
                if gid < r.start {
                    core::cmp::Ordering::Greater
                } else if gid > r.end {
                    core::cmp::Ordering::Less
                } else {
                    core::cmp::Ordering::Equal
                }
            })?;
            Some(range.value + (gid - range.start))
        }
        _ => None,
    }
}

/// Looks up a glyph's class; glyphs outside every range get class 0.
pub fn glyph_class(data: &[u8], glyph: GlyphId) -> u16 {
    glyph_class_impl(data, glyph).unwrap_or(0)
}

fn glyph_class_impl(data: &[u8], glyph: GlyphId) -> Option<u16> {
    let mut s = Stream::new(data);
    let format = s.read::<u16>()?;
    let gid = glyph.to_u16();
    match format {
        1 => {
            let start = s.read::<u16>()?;
            let count = s.read::<u16>()?;
            let classes = s.read_array16::<u16>(count)?;
            classes.get(gid.checked_sub(start)?)
        }
        2 => {
            let count = s.read::<u16>()?;
            let ranges = s.read_array16::<RangeRecord>(count)?;
            ranges
                .binary_search_by(|r| {
                    if gid < r.start {
                        core::cmp::Ordering::Greater
                    } else if gid > r.end {
                        core::cmp::Ordering::Less
                    } else {
                        core::cmp::Ordering::Equal
                    }
                })
                .map(|(_, r)| r.value)
        }
        _ => None,
    }
}

// Serves both coverage ranges (value = startCoverageIndex) and class
// ranges (value = class).
#[derive(Clone, Copy, Debug)]
struct RangeRecord {
    start: u16,
    end: u16,
    value: u16,
}

impl FromData for RangeRecord {
    const SIZE: usize = 6;

    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        Some(RangeRecord {
            start: s.read::<u16>()?,
            end: s.read::<u16>()?,
            value: s.read::<u16>()?,
        })
    }
}

/// Matches a contextual subtable (GSUB 5 / GPOS 7) at `glyphs[pos]`.
pub fn match_context(subtable: &[u8], glyphs: &[GlyphId], pos: usize) -> Option<ContextMatch> {
    let mut s = Stream::new(subtable);
    let format = s.read::<u16>()?;
    match format {
        1 => {
            let cov_offset = s.read::<Offset16>()?;
            let index = coverage_index(subtable.get(cov_offset.to_usize()..)?, glyphs[pos])?;
            let set_count = s.read::<u16>()?;
            if index >= set_count {
                return None;
            }
            s.advance(usize::from(index) * 2);
            let set_offset = s.read::<Offset16>()?;
            let set_data = subtable.get(set_offset.to_usize()..)?;
            match_rule_set(set_data, glyphs, pos, &mut |seq, glyph| {
                glyph.to_u16() == seq
            })
        }
        2 => {
            let cov_offset = s.read::<Offset16>()?;
            coverage_index(subtable.get(cov_offset.to_usize()..)?, glyphs[pos])?;
            let class_def_offset = s.read::<Offset16>()?;
            let class_def = subtable.get(class_def_offset.to_usize()..)?;
            let class = glyph_class(class_def, glyphs[pos]);
            let set_count = s.read::<u16>()?;
            if class >= set_count {
                return None;
            }
            s.advance(usize::from(class) * 2);
            let set_offset = s.read::<Option<Offset16>>()??;
            let set_data = subtable.get(set_offset.to_usize()..)?;
            match_rule_set(set_data, glyphs, pos, &mut |seq, glyph| {
                glyph_class(class_def, glyph) == seq
            })
        }
        3 => {
            let glyph_count = s.read::<u16>()?;
            let record_count = s.read::<u16>()?;
            if glyph_count == 0 || glyphs.len() - pos < usize::from(glyph_count) {
                return None;
            }
            for i in 0..glyph_count {
                let cov_offset = s.read::<Offset16>()?;
                coverage_index(
                    subtable.get(cov_offset.to_usize()..)?,
                    glyphs[pos + usize::from(i)],
                )?;
            }
            let records = s.read_array16::<ContextualLookupRecord>(record_count)?;
            Some(ContextMatch {
                input_consumed: usize::from(glyph_count),
                records: records.into_iter().collect(),
            })
        }
        _ => None,
    }
}

// Rule sets for contextual formats 1 and 2: each rule is
// glyphCount, seqLookupCount, input[glyphCount-1], seqLookupRecords.
fn match_rule_set(
    set_data: &[u8],
    glyphs: &[GlyphId],
    pos: usize,
    matches: &mut dyn FnMut(u16, GlyphId) -> bool,
) -> Option<ContextMatch> {
    let mut s = Stream::new(set_data);
    let rule_count = s.read::<u16>()?;
    'rules: for _ in 0..rule_count {
        let rule_offset = s.read::<Offset16>()?;
        let mut rs = Stream::new(set_data.get(rule_offset.to_usize()..)?);
        let glyph_count = rs.read::<u16>()?;
        let record_count = rs.read::<u16>()?;
        if glyph_count == 0 || glyphs.len() - pos < usize::from(glyph_count) {
            continue;
        }

        for i in 1..glyph_count {
            let expected = rs.read::<u16>()?;
            if !matches(expected, glyphs[pos + usize::from(i)]) {
                continue 'rules;
            }
        }

        let records = rs.read_array16::<ContextualLookupRecord>(record_count)?;
        return Some(ContextMatch {
            input_consumed: usize::from(glyph_count),
            records: records.into_iter().collect(),
        });
    }

    None
}

/// Matches a chained-context subtable (GSUB 6 / GPOS 8) at `glyphs[pos]`,
/// with the glyphs before `pos` available as backtrack.
pub fn match_chained_context(
    subtable: &[u8],
    glyphs: &[GlyphId],
    pos: usize,
) -> Option<ContextMatch> {
    let mut s = Stream::new(subtable);
    let format = s.read::<u16>()?;
    match format {
        1 => {
            let cov_offset = s.read::<Offset16>()?;
            let index = coverage_index(subtable.get(cov_offset.to_usize()..)?, glyphs[pos])?;
            let set_count = s.read::<u16>()?;
            if index >= set_count {
                return None;
            }
            s.advance(usize::from(index) * 2);
            let set_offset = s.read::<Offset16>()?;
            let set_data = subtable.get(set_offset.to_usize()..)?;
            match_chained_rule_set(set_data, glyphs, pos, &mut |seq, glyph| {
                glyph.to_u16() == seq
            })
        }
        2 => {
            let cov_offset = s.read::<Offset16>()?;
            coverage_index(subtable.get(cov_offset.to_usize()..)?, glyphs[pos])?;
            let backtrack_def = subtable.get(s.read::<Offset16>()?.to_usize()..)?;
            let input_def = subtable.get(s.read::<Offset16>()?.to_usize()..)?;
            let lookahead_def = subtable.get(s.read::<Offset16>()?.to_usize()..)?;
            let class = glyph_class(input_def, glyphs[pos]);
            let set_count = s.read::<u16>()?;
            if class >= set_count {
                return None;
            }
            s.advance(usize::from(class) * 2);
            let set_offset = s.read::<Option<Offset16>>()??;
            let set_data = subtable.get(set_offset.to_usize()..)?;

            // Each position list is matched against its own class table.
            let mut backtrack = |seq: u16, glyph: GlyphId| glyph_class(backtrack_def, glyph) == seq;
            let mut input = |seq: u16, glyph: GlyphId| glyph_class(input_def, glyph) == seq;
            let mut lookahead = |seq: u16, glyph: GlyphId| glyph_class(lookahead_def, glyph) == seq;
            match_chained_rules(set_data, glyphs, pos, &mut backtrack, &mut input, &mut lookahead)
        }
        3 => {
            let backtrack_count = s.read::<u16>()?;
            let backtrack_offsets = s.read_array16::<Offset16>(backtrack_count)?;
            let input_count = s.read::<u16>()?;
            let input_offsets = s.read_array16::<Offset16>(input_count)?;
            let lookahead_count = s.read::<u16>()?;
            let lookahead_offsets = s.read_array16::<Offset16>(lookahead_count)?;
            let record_count = s.read::<u16>()?;

            if input_count == 0
                || pos < usize::from(backtrack_count)
                || glyphs.len() - pos < usize::from(input_count) + usize::from(lookahead_count)
            {
                return None;
            }

            // Backtrack coverages run backwards from the glyph before pos.
            for (i, offset) in backtrack_offsets.into_iter().enumerate() {
                let glyph = glyphs[pos - 1 - i];
                coverage_index(subtable.get(offset.to_usize()..)?, glyph)?;
            }
            for (i, offset) in input_offsets.into_iter().enumerate() {
                coverage_index(subtable.get(offset.to_usize()..)?, glyphs[pos + i])?;
            }
            for (i, offset) in lookahead_offsets.into_iter().enumerate() {
                let glyph = glyphs[pos + usize::from(input_count) + i];
                coverage_index(subtable.get(offset.to_usize()..)?, glyph)?;
            }

            let records = s.read_array16::<ContextualLookupRecord>(record_count)?;
            Some(ContextMatch {
                input_consumed: usize::from(input_count),
                records: records.into_iter().collect(),
            })
        }
        _ => None,
    }
}

fn match_chained_rule_set(
    set_data: &[u8],
    glyphs: &[GlyphId],
    pos: usize,
    matches: &mut dyn FnMut(u16, GlyphId) -> bool,
) -> Option<ContextMatch> {
    let mut by_glyph_back = |seq: u16, glyph: GlyphId| matches(seq, glyph);
    let mut by_glyph_input = |seq: u16, glyph: GlyphId| glyph.to_u16() == seq;
    let mut by_glyph_ahead = |seq: u16, glyph: GlyphId| glyph.to_u16() == seq;
    match_chained_rules(
        set_data,
        glyphs,
        pos,
        &mut by_glyph_back,
        &mut by_glyph_input,
        &mut by_glyph_ahead,
    )
}

fn match_chained_rules(
    set_data: &[u8],
    glyphs: &[GlyphId],
    pos: usize,
    backtrack_matches: &mut dyn FnMut(u16, GlyphId) -> bool,
    input_matches: &mut dyn FnMut(u16, GlyphId) -> bool,
    lookahead_matches: &mut dyn FnMut(u16, GlyphId) -> bool,
) -> Option<ContextMatch> {
    let mut s = Stream::new(set_data);
    let rule_count = s.read::<u16>()?;
    'rules: for _ in 0..rule_count {
        let rule_offset = s.read::<Offset16>()?;
        let mut rs = Stream::new(set_data.get(rule_offset.to_usize()..)?);

        let backtrack_count = rs.read::<u16>()?;
        if pos < usize::from(backtrack_count) {
            continue;
        }
        for i in 0..backtrack_count {
            let expected = rs.read::<u16>()?;
            if !backtrack_matches(expected, glyphs[pos - 1 - usize::from(i)]) {
                continue 'rules;
            }
        }

        let input_count = rs.read::<u16>()?;
        if input_count == 0 || glyphs.len() - pos < usize::from(input_count) {
            continue;
        }
        for i in 1..input_count {
            let expected = rs.read::<u16>()?;
            if !input_matches(expected, glyphs[pos + usize::from(i)]) {
                continue 'rules;
            }
        }

        let lookahead_count = rs.read::<u16>()?;
        if glyphs.len() - pos < usize::from(input_count) + usize::from(lookahead_count) {
            continue;
        }
        for i in 0..lookahead_count {
            let expected = rs.read::<u16>()?;
            if !lookahead_matches(expected, glyphs[pos + usize::from(input_count) + usize::from(i)])
            {
                continue 'rules;
            }
        }

        let record_count = rs.read::<u16>()?;
        let records = rs.read_array16::<ContextualLookupRecord>(record_count)?;
        return Some(ContextMatch {
            input_consumed: usize::from(input_count),
            records: records.into_iter().collect(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    pub fn coverage_format1(glyphs: &[u16]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(1);
        w.write_u16(glyphs.len() as u16);
        for &g in glyphs {
            w.write_u16(g);
        }
        w.finish()
    }

    #[test]
    fn coverage_format1_search() {
        let data = coverage_format1(&[3, 7, 9]);
        assert_eq!(coverage_index(&data, GlyphId(3)), Some(0));
        assert_eq!(coverage_index(&data, GlyphId(9)), Some(2));
        assert_eq!(coverage_index(&data, GlyphId(8)), None);
    }

    #[test]
    fn coverage_format2_search() {
        let mut w = Writer::new();
        w.write_u16(2);
        w.write_u16(2); // two ranges
        w.write_u16(10);
        w.write_u16(12);
        w.write_u16(0);
        w.write_u16(20);
        w.write_u16(20);
        w.write_u16(3);
        let data = w.finish();
        assert_eq!(coverage_index(&data, GlyphId(11)), Some(1));
        assert_eq!(coverage_index(&data, GlyphId(20)), Some(3));
        assert_eq!(coverage_index(&data, GlyphId(13)), None);
    }

    #[test]
    fn class_def_defaults_to_zero() {
        let mut w = Writer::new();
        w.write_u16(2);
        w.write_u16(1);
        w.write_u16(5);
        w.write_u16(6);
        w.write_u16(2);
        let data = w.finish();
        assert_eq!(glyph_class(&data, GlyphId(5)), 2);
        assert_eq!(glyph_class(&data, GlyphId(7)), 0);
    }
}
