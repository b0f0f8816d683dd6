//! CFF subsetting.
//!
//! The subset is always emitted CID-keyed under Adobe/Identity/0, which
//! avoids a per-glyph SID table in the String INDEX. GID numbering is
//! preserved: unused glyphs keep their slot with a zero-length charstring,
//! exactly like unused subroutines keep theirs. Stream compression removes
//! the repetition.

use std::collections::BTreeSet;

use super::charset;
use super::charstring::CharStringError;
use super::dict::{private_dict, top_dict, Dict, Operand};
use super::index;
use super::CffFont;
use crate::writer::Writer;
use crate::GlyphId;

const HEADER_SIZE: usize = 4;

// SIDs of the two strings we place in the subset's String INDEX.
const REGISTRY_SID: i32 = 391;
const ORDERING_SID: i32 = 392;

/// Serializes a CID-keyed subset containing the used glyphs.
pub fn subset(
    font: &CffFont,
    used: &BTreeSet<GlyphId>,
    subset_name: &str,
) -> Result<Vec<u8>, CharStringError> {
    let mut used = used.clone();
    used.insert(GlyphId::NOTDEF);
    used.retain(|gid| (gid.0 as usize) < font.glyphs.len());

    let subr_usage = font.mark_used_subroutines(&used)?;

    // Drop Font DICTs no used glyph references and renumber the rest.
    let mut fd_map = vec![None; font.font_dicts.len()];
    let mut kept_fds = Vec::new();
    for &gid in &used {
        let fd = usize::from(font.glyphs[gid.0 as usize].font_dict_index);
        if fd_map[fd].is_none() {
            fd_map[fd] = Some(kept_fds.len() as u8);
            kept_fds.push(fd);
        }
    }

    // Per-glyph rows; unused glyphs become zero-length charstrings on FD 0.
    let number_of_glyphs = font.glyphs.len();
    let mut charstrings: Vec<&[u8]> = Vec::with_capacity(number_of_glyphs);
    let mut fd_select_rows: Vec<u8> = Vec::with_capacity(number_of_glyphs);
    let mut cids: Vec<u16> = Vec::with_capacity(number_of_glyphs);
    for glyph in &font.glyphs {
        let keep = used.contains(&glyph.gid);
        charstrings.push(if keep { glyph.charstring } else { &[] });
        fd_select_rows.push(if keep {
            fd_map[usize::from(glyph.font_dict_index)].unwrap_or(0)
        } else {
            0
        });
        cids.push(if font.is_cid {
            glyph.id
        } else {
            glyph.gid.to_u16()
        });
    }

    // Subroutine slots are preserved; unused ones are blanked.
    let global_subrs: Vec<&[u8]> = blank_unused(&font.global_subrs, &subr_usage.global);
    let local_subrs: Vec<Vec<&[u8]>> = kept_fds
        .iter()
        .map(|&fd| blank_unused(&font.font_dicts[fd].local_subrs, &subr_usage.local[fd]))
        .collect();

    // Private DICTs are rebuilt with a stable size so the FDArray can be
    // serialized before their final offsets are known.
    let mut private_dicts = Vec::with_capacity(kept_fds.len());
    for (i, &fd) in kept_fds.iter().enumerate() {
        let mut private = font.font_dicts[fd].private.clone();
        private.remove(private_dict::SUBRS);
        if !local_subrs[i].is_empty() {
            // The Subrs INDEX sits directly after its Private DICT.
            let placeholder_size = {
                let mut p = private.clone();
                p.set(private_dict::SUBRS, vec![Operand::Int(0)]);
                p.serialized_size()
            };
            private.set(private_dict::SUBRS, vec![Operand::Int(placeholder_size as i32)]);
        }
        private_dicts.push(private);
    }

    let max_cid = cids.iter().copied().max().unwrap_or(0);
    let mut top = Dict::default();
    top.set(
        top_dict::ROS,
        vec![
            Operand::Int(REGISTRY_SID),
            Operand::Int(ORDERING_SID),
            Operand::Int(0),
        ],
    );
    if let Some(matrix) = font.top_dict.get(top_dict::FONT_MATRIX) {
        top.set(top_dict::FONT_MATRIX, matrix.to_vec());
    }
    if let Some(bbox) = font.top_dict.get(top_dict::FONT_BBOX) {
        top.set(top_dict::FONT_BBOX, bbox.to_vec());
    }
    top.set(top_dict::CID_COUNT, vec![Operand::Int(i32::from(max_cid) + 1)]);
    // Offset-carrying keys; patched below, size-stable by construction.
    top.set(top_dict::CHARSET, vec![Operand::Int(0)]);
    top.set(top_dict::CHAR_STRINGS, vec![Operand::Int(0)]);
    top.set(top_dict::FD_ARRAY, vec![Operand::Int(0)]);
    top.set(top_dict::FD_SELECT, vec![Operand::Int(0)]);

    // Fixed-size prefix: header, Name, Top DICT, String, Global Subrs.
    let name_items: Vec<&[u8]> = vec![subset_name.as_bytes()];
    let string_items: Vec<&[u8]> = vec![b"Adobe", b"Identity"];
    let top_dict_size = top.serialized_size();
    let top_index_size = {
        let dummy = vec![0u8; top_dict_size];
        index::index_size(&[dummy.as_slice()])
    };
    let prefix_size = HEADER_SIZE
        + index::index_size(&name_items)
        + top_index_size
        + index::index_size(&string_items)
        + index::index_size(&global_subrs);

    // Lay out the floating pieces and patch the Top DICT.
    let charset_data = {
        let mut w = Writer::new();
        charset::write_format0(&cids, &mut w);
        w.finish()
    };
    let fd_select_data = if font.is_cid {
        let mut w = Writer::new();
        w.write_u8(0);
        for &fd in &fd_select_rows {
            w.write_u8(fd);
        }
        w.finish()
    } else {
        // One range covering every glyph.
        let mut w = Writer::new();
        w.write_u8(3);
        w.write_u16(1);
        w.write_u16(0);
        w.write_u8(0);
        w.write_u16(number_of_glyphs as u16);
        w.finish()
    };

    let charset_offset = prefix_size;
    let fd_select_offset = charset_offset + charset_data.len();
    let charstrings_offset = fd_select_offset + fd_select_data.len();
    let fd_array_offset = charstrings_offset + index::index_size(&charstrings);

    let fd_array_items: Vec<Vec<u8>> = private_dicts
        .iter()
        .map(|private| {
            let mut fd = Dict::default();
            // Patched once private offsets are known; size-stable.
            fd.set(
                top_dict::PRIVATE,
                vec![
                    Operand::Int(private.serialized_size() as i32),
                    Operand::Int(0),
                ],
            );
            let mut w = Writer::new();
            fd.write(&mut w);
            w.finish()
        })
        .collect();
    let fd_array_refs: Vec<&[u8]> = fd_array_items.iter().map(|i| i.as_slice()).collect();
    let mut private_offset = fd_array_offset + index::index_size(&fd_array_refs);

    let mut private_blobs = Vec::with_capacity(private_dicts.len());
    let mut private_offsets = Vec::with_capacity(private_dicts.len());
    for (i, private) in private_dicts.iter().enumerate() {
        let mut w = Writer::new();
        private.write(&mut w);
        if !local_subrs[i].is_empty() {
            index::write_index(&local_subrs[i], &mut w);
        }
        private_offsets.push((private.serialized_size(), private_offset));
        private_offset += w.len();
        private_blobs.push(w.finish());
    }

    top.set(top_dict::CHARSET, vec![Operand::Int(charset_offset as i32)]);
    top.set(top_dict::FD_SELECT, vec![Operand::Int(fd_select_offset as i32)]);
    top.set(
        top_dict::CHAR_STRINGS,
        vec![Operand::Int(charstrings_offset as i32)],
    );
    top.set(top_dict::FD_ARRAY, vec![Operand::Int(fd_array_offset as i32)]);

    let fd_array_items: Vec<Vec<u8>> = private_offsets
        .iter()
        .map(|&(size, offset)| {
            let mut fd = Dict::default();
            fd.set(
                top_dict::PRIVATE,
                vec![Operand::Int(size as i32), Operand::Int(offset as i32)],
            );
            let mut w = Writer::new();
            fd.write(&mut w);
            w.finish()
        })
        .collect();
    let fd_array_refs: Vec<&[u8]> = fd_array_items.iter().map(|i| i.as_slice()).collect();

    // Final assembly.
    let mut w = Writer::new();
    w.write_u8(1); // major
    w.write_u8(0); // minor
    w.write_u8(HEADER_SIZE as u8);
    w.write_u8(4); // absolute offset size
    index::write_index(&name_items, &mut w);

    let top_data = {
        let mut tw = Writer::new();
        top.write(&mut tw);
        tw.finish()
    };
    debug_assert_eq!(top_data.len(), top_dict_size);
    index::write_index(&[top_data.as_slice()], &mut w);
    index::write_index(&string_items, &mut w);
    index::write_index(&global_subrs, &mut w);
    debug_assert_eq!(w.len(), prefix_size);

    w.write_bytes(&charset_data);
    w.write_bytes(&fd_select_data);
    index::write_index(&charstrings, &mut w);
    index::write_index(&fd_array_refs, &mut w);
    for blob in &private_blobs {
        w.write_bytes(blob);
    }

    Ok(w.finish())
}

/// Synthesizes a format-4 `cmap` table mapping each used GID to its CID.
///
/// The subset is CID-keyed, so a consumer that re-parses it can recover the
/// GID→CID assignment without walking the charset.
pub fn subset_cmap(cids: &[(GlyphId, u16)]) -> Vec<u8> {
    // One segment per glyph: start = gid, end = gid + 1, delta = cid - gid.
    let mut segments: Vec<(u16, u16, i16)> = Vec::with_capacity(cids.len() + 1);
    for &(gid, cid) in cids {
        let gid = gid.to_u16();
        segments.push((gid, gid.wrapping_add(1), cid.wrapping_sub(gid) as i16));
    }
    segments.push((0xFFFF, 0xFFFF, 1)); // sentinel

    let seg_count = segments.len() as u16;
    let mut sub = Writer::new();
    sub.write_u16(4); // format
    sub.write_u16(16 + seg_count * 8); // length
    sub.write_u16(0); // language
    sub.write_u16(seg_count * 2);
    let floor_log2 = 31 - u32::from(seg_count).leading_zeros();
    let search_range = 2 * (1u32 << floor_log2);
    sub.write_u16(search_range as u16);
    sub.write_u16(floor_log2 as u16);
    sub.write_u16(seg_count * 2 - search_range as u16);
    for &(_, end, _) in &segments {
        sub.write_u16(end);
    }
    sub.write_u16(0); // reservedPad
    for &(start, _, _) in &segments {
        sub.write_u16(start);
    }
    for &(_, _, delta) in &segments {
        sub.write_i16(delta);
    }
    for _ in &segments {
        sub.write_u16(0); // idRangeOffset
    }

    // Two encoding records, (0, 4) and (3, 1), sharing the one subtable,
    // so both Unicode-preferring and Windows-preferring consumers find it.
    let subtable_offset = (2 + 2) + 2 * (2 + 2 + 4);
    let mut w = Writer::new();
    w.write_u16(0); // version
    w.write_u16(2); // numTables
    w.write_u16(0); // platform: Unicode
    w.write_u16(4);
    w.write_u32(subtable_offset);
    w.write_u16(3); // platform: Windows
    w.write_u16(1); // encoding: Unicode BMP
    w.write_u32(subtable_offset);
    w.write_bytes(sub.data());
    w.finish()
}

fn blank_unused<'a>(subrs: &[&'a [u8]], used: &BTreeSet<usize>) -> Vec<&'a [u8]> {
    subrs
        .iter()
        .enumerate()
        .map(|(i, &data)| if used.contains(&i) { data } else { &[][..] })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::cff::index::write_index;

    // A minimal name-keyed CFF font with four glyphs (.notdef, A, B, C)
    // where A's charstring calls local subroutine 1 of 2.
    fn build_test_font() -> Vec<u8> {
        let name = b"TestFont";

        // Private DICT: Subrs at offset <priv len>; built below.
        let subr0: &[u8] = &[11]; // return
        let subr1: &[u8] = &[139, 21, 11]; // rmoveto-ish, return
        let mut subr_index = Writer::new();
        write_index(&[subr0, subr1], &mut subr_index);

        let mut private = Dict::default();
        private.set(private_dict::DEFAULT_WIDTH_X, vec![Operand::Int(500)]);
        private.set(private_dict::SUBRS, vec![Operand::Int(0)]);
        let private_len = private.serialized_size();
        private.set(private_dict::SUBRS, vec![Operand::Int(private_len as i32)]);

        let notdef: &[u8] = &[14];
        let a: &[u8] = &[139 - 107, 10, 14]; // callsubr 0, endchar
        let b: &[u8] = &[140, 21, 14];
        let c: &[u8] = &[141, 22, 14];
        let charstrings = [notdef, a, b, c];

        // charset format 0: SIDs for A, B, C (standard sids 34, 35, 36).
        let mut charset_data = Writer::new();
        charset_data.write_u8(0);
        for sid in [34u16, 35, 36] {
            charset_data.write_u16(sid);
        }

        let mut top = Dict::default();
        top.set(top_dict::CHARSET, vec![Operand::Int(0)]);
        top.set(top_dict::CHAR_STRINGS, vec![Operand::Int(0)]);
        top.set(top_dict::PRIVATE, vec![Operand::Int(0), Operand::Int(0)]);
        let top_size = top.serialized_size();
        let top_index_size = {
            let dummy = vec![0u8; top_size];
            index::index_size(&[dummy.as_slice()])
        };

        let name_items: Vec<&[u8]> = vec![name];
        let prefix = 4
            + index::index_size(&name_items)
            + top_index_size
            + index::index_size(&[]) // strings
            + index::index_size(&[]); // global subrs

        let charset_offset = prefix;
        let charstrings_offset = charset_offset + charset_data.len();
        let charstring_refs: Vec<&[u8]> = charstrings.to_vec();
        let private_offset = charstrings_offset + index::index_size(&charstring_refs);

        top.set(top_dict::CHARSET, vec![Operand::Int(charset_offset as i32)]);
        top.set(
            top_dict::CHAR_STRINGS,
            vec![Operand::Int(charstrings_offset as i32)],
        );
        top.set(
            top_dict::PRIVATE,
            vec![
                Operand::Int(private_len as i32),
                Operand::Int(private_offset as i32),
            ],
        );

        let mut w = Writer::new();
        w.write_u8(1);
        w.write_u8(0);
        w.write_u8(4);
        w.write_u8(4);
        write_index(&name_items, &mut w);
        let mut tw = Writer::new();
        top.write(&mut tw);
        let top_data = tw.finish();
        write_index(&[top_data.as_slice()], &mut w);
        write_index(&[], &mut w);
        write_index(&[], &mut w);
        assert_eq!(w.len(), prefix);
        w.write_bytes(charset_data.data());
        write_index(&charstring_refs, &mut w);
        let mut pw = Writer::new();
        private.write(&mut pw);
        assert_eq!(pw.len(), private_len);
        w.write_bytes(pw.data());
        w.write_bytes(subr_index.data());
        w.finish()
    }

    #[test]
    fn parse_the_test_font() {
        let data = build_test_font();
        let font = CffFont::parse(&data).unwrap();
        assert_eq!(font.name, "TestFont");
        assert!(!font.is_cid);
        assert_eq!(font.number_of_glyphs(), 4);
        assert_eq!(font.glyph_name(GlyphId(1)), Some("A"));
        assert_eq!(font.glyph_name(GlyphId(3)), Some("C"));
        assert_eq!(font.font_dicts[0].local_subrs.len(), 2);
    }

    #[test]
    fn subset_round_trips_and_preserves_gids() {
        let data = build_test_font();
        let font = CffFont::parse(&data).unwrap();

        let mut used = BTreeSet::new();
        used.insert(GlyphId(1)); // A
        used.insert(GlyphId(3)); // C
        let out = subset(&font, &used, "ABCDEF+TestFont").unwrap();

        let reparsed = CffFont::parse(&out).unwrap();
        assert_eq!(reparsed.name, "ABCDEF+TestFont");
        assert!(reparsed.is_cid);
        assert_eq!(reparsed.number_of_glyphs(), 4);

        // Used glyphs keep their charstrings; unused become zero-length.
        assert!(!reparsed.glyphs[0].charstring.is_empty());
        assert!(!reparsed.glyphs[1].charstring.is_empty());
        assert!(reparsed.glyphs[2].charstring.is_empty());
        assert!(!reparsed.glyphs[3].charstring.is_empty());

        // CIDs for a name-keyed source are the original GIDs.
        assert_eq!(reparsed.glyphs[1].id, 1);
        assert_eq!(reparsed.glyphs[3].id, 3);

        // Subroutine slots are preserved with unused ones blanked:
        // glyph A calls subr 0 only.
        assert_eq!(reparsed.font_dicts[0].local_subrs.len(), 2);
        assert!(!reparsed.font_dicts[0].local_subrs[0].is_empty());
        assert!(reparsed.font_dicts[0].local_subrs[1].is_empty());
    }

    #[test]
    fn reparsing_the_subset_reports_the_same_used_glyphs() {
        let data = build_test_font();
        let font = CffFont::parse(&data).unwrap();

        let mut used = BTreeSet::new();
        used.insert(GlyphId(2));
        let once = subset(&font, &used, "AAAAAA+TestFont").unwrap();
        let reparsed = CffFont::parse(&once).unwrap();

        let survivors: BTreeSet<GlyphId> = reparsed
            .glyphs
            .iter()
            .filter(|g| !g.gid.is_notdef() && !g.charstring.is_empty())
            .map(|g| g.gid)
            .collect();
        assert_eq!(survivors, used);

        // Subsetting the subset again changes nothing structurally.
        let twice = subset(&reparsed, &used, "AAAAAA+TestFont").unwrap();
        let again = CffFont::parse(&twice).unwrap();
        let charstrings =
            |f: &CffFont| f.glyphs.iter().map(|g| g.charstring.to_vec()).collect::<Vec<_>>();
        assert_eq!(charstrings(&reparsed), charstrings(&again));
        assert_eq!(
            reparsed.glyphs.iter().map(|g| g.id).collect::<Vec<_>>(),
            again.glyphs.iter().map(|g| g.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn synthesized_cmap_maps_gid_to_cid() {
        let table = subset_cmap(&[(GlyphId(1), 5), (GlyphId(2), 9)]);
        let mapping = crate::font::tables::cmap::parse(&table).unwrap();
        assert_eq!(mapping.glyph_for(1), GlyphId(5));
        assert_eq!(mapping.glyph_for(2), GlyphId(9));
    }
}
