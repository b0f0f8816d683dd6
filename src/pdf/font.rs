//! Embedding a subsetted font as a Type0 (CID-keyed) PDF font.

use pdf_writer::types::{CidFontType, FontFlags, SystemInfo};
use pdf_writer::{Chunk, Finish, Name, Rect, Ref, Str};

use super::cmap;
use super::RefAllocator;
use crate::error::SapError;
use crate::font::layout::SubstitutionMaps;
use crate::font::subset::{subset, SubsetKind};
use crate::font::{FontFile, GlyphSource};
use crate::GlyphId;

const SYSTEM_INFO: SystemInfo = SystemInfo {
    registry: Str(b"Adobe"),
    ordering: Str(b"Identity"),
    supplement: 0,
};

// Synthetic codepoints for glyphs nothing else can name start in the
// plane-15 private use area.
const PRIVATE_USE_BASE: u32 = 0xF0000;

/// The embedded font objects and the code assignment for text showing.
#[derive(Clone, Debug)]
pub struct EmbeddedFont {
    pub type0_ref: Ref,
    pub subset_name: String,
    /// Per used glyph: the CID its text operators must emit.
    cids: std::collections::HashMap<GlyphId, u16>,
}

impl EmbeddedFont {
    pub fn cid(&self, glyph: GlyphId) -> u16 {
        self.cids.get(&glyph).copied().unwrap_or(0)
    }
}

/// Writes the whole font object cluster for one font.
///
/// `maps` is the accumulated substitution bookkeeping from shaping; it
/// feeds the ToUnicode CMap. When `utf8_text` is set, a UTF-8 CMap is
/// embedded and selected as the Type0 encoding instead of Identity-H.
pub fn write_font(
    chunk: &mut Chunk,
    alloc: &mut RefAllocator,
    font: &FontFile,
    maps: &SubstitutionMaps,
    utf8_text: bool,
) -> Result<EmbeddedFont, SapError> {
    let type0_ref = alloc.bump();
    let cid_ref = alloc.bump();
    let descriptor_ref = alloc.bump();
    let to_unicode_ref = alloc.bump();
    let data_ref = alloc.bump();

    let subset_font = subset(font)?;
    let base_font = Name(subset_font.subset_name.as_bytes());
    let used = font.used_glyphs();

    // The CID each glyph is addressed by: the charset id for a CID-keyed
    // CFF subset, the GID everywhere else.
    let cids: std::collections::HashMap<GlyphId, u16> = used
        .iter()
        .map(|&gid| {
            let cid = match &font.outlines {
                GlyphSource::Cff(cff) if cff.is_cid => cff
                    .glyphs
                    .get(gid.0 as usize)
                    .map(|g| g.id)
                    .unwrap_or(gid.to_u16()),
                _ => gid.to_u16(),
            };
            (gid, cid)
        })
        .collect();

    // Type0 font dictionary.
    let utf8_cmap_ref = utf8_text.then(|| alloc.bump());
    {
        let mut type0 = chunk.type0_font(type0_ref);
        type0.base_font(base_font);
        match utf8_cmap_ref {
            Some(cmap_ref) => {
                type0.encoding_cmap(cmap_ref);
            }
            None => {
                type0.encoding_predefined(Name(b"Identity-H"));
            }
        }
        type0.descendant_font(cid_ref).to_unicode(to_unicode_ref);
    }

    // CID font.
    let subtype = match subset_font.kind {
        SubsetKind::Cff | SubsetKind::Cff2 => CidFontType::Type0,
        SubsetKind::TrueType => CidFontType::Type2,
    };

    let mut cid_font = chunk.cid_font(cid_ref);
    cid_font
        .subtype(subtype)
        .base_font(base_font)
        .system_info(SYSTEM_INFO)
        .font_descriptor(descriptor_ref)
        .default_width(0.0);
    if subtype == CidFontType::Type2 {
        cid_font.cid_to_gid_map_predefined(Name(b"Identity"));
    }

    // Width array from the horizontal metrics of the used glyphs.
    {
        let mut widths = cid_font.widths();
        for &gid in &used {
            let advance = font.glyph_advance(gid).unwrap_or(0);
            let cid = cids[&gid];
            widths.consecutive(
                cid,
                [font.metrics.to_pdf_units(f64::from(advance)) as f32],
            );
        }
    }
    cid_font.finish();

    // Font descriptor.
    let mut flags = FontFlags::empty();
    flags.set(FontFlags::FIXED_PITCH, font.metrics.is_fixed_pitch);
    flags.set(FontFlags::ITALIC, font.metrics.italic_angle != 0.0);
    flags.insert(FontFlags::SYMBOLIC);

    let bbox = font.metrics.global_bbox;
    let scale = |v: i16| font.metrics.to_pdf_units(f64::from(v)) as f32;
    let mut descriptor = chunk.font_descriptor(descriptor_ref);
    descriptor
        .name(base_font)
        .flags(flags)
        .bbox(Rect::new(
            scale(bbox.x_min),
            scale(bbox.y_min),
            scale(bbox.x_max),
            scale(bbox.y_max),
        ))
        .italic_angle(font.metrics.italic_angle)
        .ascent(scale(font.metrics.typo_ascent))
        .descent(scale(font.metrics.typo_descent))
        .cap_height(scale(font.metrics.cap_height.unwrap_or(font.metrics.typo_ascent)))
        .stem_v(10.0 + 0.244 * (f32::from(font.os2.as_ref().map_or(400, |t| t.weight_class)) - 50.0));

    match subset_font.kind {
        SubsetKind::Cff | SubsetKind::Cff2 => descriptor.font_file3(data_ref),
        SubsetKind::TrueType => descriptor.font_file2(data_ref),
    };
    descriptor.finish();

    // The subset itself.
    {
        let mut stream = chunk.stream(data_ref, &subset_font.bytes);
        match subset_font.kind {
            SubsetKind::Cff => {
                stream.pair(Name(b"Subtype"), Name(b"CIDFontType0C"));
            }
            SubsetKind::Cff2 => {
                stream.pair(Name(b"Subtype"), Name(b"OpenType"));
            }
            SubsetKind::TrueType => {}
        }
    }

    // ToUnicode: every used glyph gets an entry.
    let to_unicode = build_to_unicode_entries(font, maps, &used, &cids);
    chunk.stream(to_unicode_ref, &cmap::build_to_unicode(&to_unicode));

    // Optional UTF-8 encoding CMap.
    if let Some(cmap_ref) = utf8_cmap_ref {
        let mut entries: Vec<(u32, u16)> = Vec::new();
        for &gid in &used {
            if let Some(cp) = font.character_mapping.codepoint_for(gid) {
                entries.push((cp, cids[&gid]));
            }
        }
        let data = cmap::build_utf8_cmap("SapUtf8", &entries);
        chunk
            .cmap(cmap_ref, &data)
            .name(Name(b"SapUtf8"))
            .system_info(SYSTEM_INFO);
    }

    Ok(EmbeddedFont {
        type0_ref,
        subset_name: subset_font.subset_name,
        cids,
    })
}

// Resolution order: cmap reverse lookup, then the substitution side maps,
// then the glyph's PostScript name is no help for ToUnicode, so a
// private-use codepoint closes the gap.
fn build_to_unicode_entries(
    font: &FontFile,
    maps: &SubstitutionMaps,
    used: &std::collections::BTreeSet<GlyphId>,
    cids: &std::collections::HashMap<GlyphId, u16>,
) -> Vec<(u16, Vec<u32>)> {
    let mut entries = Vec::with_capacity(used.len());
    let mut next_private = PRIVATE_USE_BASE;
    for &gid in used {
        let codepoints = if let Some(sequence) = maps.contractions.get(&gid) {
            sequence.clone()
        } else if let Some(&cp) = maps.replacements.get(&gid) {
            vec![cp]
        } else if let Some(cp) = font.character_mapping.codepoint_for(gid) {
            vec![cp]
        } else {
            let cp = next_private;
            next_private += 1;
            vec![cp]
        };
        entries.push((cids[&gid], codepoints));
    }

    entries
}

/// Convenience: a standalone ToUnicode builder used by tests and by the
/// driver's diagnostics output.
pub fn to_unicode_for(
    font: &FontFile,
    maps: &SubstitutionMaps,
) -> Vec<(u16, Vec<u32>)> {
    let used = font.used_glyphs();
    let cids = used
        .iter()
        .map(|&gid| (gid, gid.to_u16()))
        .collect::<std::collections::HashMap<_, _>>();
    build_to_unicode_entries(font, maps, &used, &cids)
}
