//! The OpenType feature engine: GSUB/GPOS selection and application.
//!
//! Lookups are applied lookup-major: the outer loop walks the selected
//! lookups in LookupList order, the inner loop walks glyph positions. GSUB
//! runs first and produces the substituted string; GPOS then produces
//! adjustments that the caller layers onto it.

pub mod common;
pub mod gpos;
pub mod gsub;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::parser::{Offset, Offset16, Stream};
use crate::{GlyphId, Tag};
use common::{Feature, LookupTable, Script};

pub use gpos::GlyphAdjustment;

const DEFAULT_SCRIPT: Tag = Tag::from_bytes(b"DFLT");

/// Which of the two layout tables a blob is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LayoutKind {
    Substitution,
    Positioning,
}

/// A parsed GSUB or GPOS table.
#[derive(Clone, Debug)]
pub struct LayoutTable<'a> {
    pub kind: LayoutKind,
    pub scripts: Vec<Script>,
    pub features: Vec<Feature>,
    pub lookups: Vec<LookupTable<'a>>,
}

impl<'a> LayoutTable<'a> {
    pub fn parse(kind: LayoutKind, data: &'a [u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        let version: u32 = s.read()?;
        if !(version == 0x00010000 || version == 0x00010001) {
            return None;
        }

        let script_list_offset = s.read::<Offset16>()?;
        let feature_list_offset = s.read::<Offset16>()?;
        let lookup_list_offset = s.read::<Offset16>()?;

        let extension_kind = match kind {
            LayoutKind::Substitution => gsub::LOOKUP_EXTENSION,
            LayoutKind::Positioning => gpos::LOOKUP_EXTENSION,
        };

        Some(LayoutTable {
            kind,
            scripts: common::parse_script_list(data.get(script_list_offset.to_usize()..)?)?,
            features: common::parse_feature_list(data.get(feature_list_offset.to_usize()..)?)?,
            lookups: common::parse_lookup_list(
                data.get(lookup_list_offset.to_usize()..)?,
                extension_kind,
            )?,
        })
    }

    /// Selects the ordered lookup indices for `(script, language)` with
    /// fallback to `DFLT`, taking the language's required feature plus
    /// every enabled feature.
    pub fn select_lookups(
        &self,
        script: Tag,
        language: Option<Tag>,
        enabled_features: &BTreeSet<Tag>,
    ) -> Vec<u16> {
        let script = self
            .scripts
            .iter()
            .find(|s| s.tag == script)
            .or_else(|| self.scripts.iter().find(|s| s.tag == DEFAULT_SCRIPT));
        let Some(script) = script else {
            return Vec::new();
        };

        let lang_sys = language
            .and_then(|lang| {
                script
                    .lang_sys
                    .iter()
                    .find(|(tag, _)| *tag == lang)
                    .map(|(_, sys)| sys)
            })
            .or(script.default_lang_sys.as_ref());
        let Some(lang_sys) = lang_sys else {
            return Vec::new();
        };

        let mut lookup_indices = BTreeSet::new();
        let mut add_feature = |index: u16| {
            if let Some(feature) = self.features.get(usize::from(index)) {
                lookup_indices.extend(feature.lookup_indices.iter().copied());
            }
        };

        if let Some(required) = lang_sys.required_feature {
            add_feature(required);
        }

        for &index in &lang_sys.feature_indices {
            let Some(feature) = self.features.get(usize::from(index)) else {
                continue;
            };
            if enabled_features.contains(&feature.tag) {
                add_feature(index);
            }
        }

        // LookupList order is application order.
        lookup_indices.into_iter().collect()
    }
}

/// One glyph of a shaped run, with the codepoints it stands for.
///
/// Substitutions maintain the codepoint lists: 1→1 keeps them, n→1
/// concatenates them, 1→n gives them to the first output glyph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapedGlyph {
    pub gid: GlyphId,
    pub codepoints: Vec<u32>,
}

impl ShapedGlyph {
    pub fn new(gid: GlyphId, codepoint: u32) -> Self {
        ShapedGlyph {
            gid,
            codepoints: vec![codepoint],
        }
    }
}

/// The ToUnicode bookkeeping produced by substitution.
#[derive(Clone, Default, Debug)]
pub struct SubstitutionMaps {
    /// 1→1 substitutions: the output glyph retains the original codepoint.
    pub replacements: HashMap<GlyphId, u32>,
    /// n→1 ligatures: output glyph → concatenated input codepoints.
    pub contractions: HashMap<GlyphId, Vec<u32>>,
    /// 1→n expansion outputs the font's cmap cannot name; a synthetic
    /// private-use codepoint is assigned later.
    pub extra_glyphs: BTreeSet<GlyphId>,
}

/// The result of running GSUB over a glyph string.
#[derive(Clone, Default, Debug)]
pub struct SubstitutedString {
    pub glyphs: Vec<ShapedGlyph>,
    pub maps: SubstitutionMaps,
}

/// Applies the selected GSUB lookups and computes the side maps.
///
/// `known_codepoint` reports whether the font's cmap can already name a
/// glyph (used to decide what goes into the side maps).
pub fn substitute(
    table: &LayoutTable,
    lookup_indices: &[u16],
    glyphs: Vec<ShapedGlyph>,
    known_codepoint: impl Fn(GlyphId) -> bool,
) -> SubstitutedString {
    debug_assert_eq!(table.kind, LayoutKind::Substitution);

    let mut glyphs = glyphs;
    gsub::apply_lookups(table, lookup_indices, &mut glyphs);

    let mut maps = SubstitutionMaps::default();
    for glyph in &glyphs {
        match glyph.codepoints.as_slice() {
            [] => {
                if !known_codepoint(glyph.gid) {
                    maps.extra_glyphs.insert(glyph.gid);
                }
            }
            [codepoint] => {
                if !known_codepoint(glyph.gid) {
                    maps.replacements.insert(glyph.gid, *codepoint);
                }
            }
            many => {
                maps.contractions.insert(glyph.gid, many.to_vec());
            }
        }
    }

    SubstitutedString { glyphs, maps }
}

/// Applies the selected GPOS lookups, returning per-position adjustments.
pub fn position(
    table: &LayoutTable,
    lookup_indices: &[u16],
    glyphs: &[GlyphId],
) -> BTreeMap<usize, GlyphAdjustment> {
    debug_assert_eq!(table.kind, LayoutKind::Positioning);
    gpos::apply_lookups(table, lookup_indices, glyphs)
}
