//! Font loading, the in-memory font model, and the shaping entry point.
//!
//! A [`FontFile`] borrows the mapped file bytes for its whole life; the
//! mapping is owned by the caller and must outlive every span derived
//! from it. Tables are decoded in a fixed order because later tables
//! consume fields established by earlier ones.

pub mod aat;
pub mod cff;
pub mod handle;
pub mod layout;
pub mod metrics;
pub mod subset;
pub mod tables;
pub mod truetype;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::SapError;
use crate::parser::Stream;
use crate::{GlyphId, Tag};

use layout::{GlyphAdjustment, LayoutKind, LayoutTable, ShapedGlyph, SubstitutionMaps};
use metrics::FontMetrics;
use tables::cmap::CharacterMapping;
use tables::head::Head;
use tables::hmtx::Hmtx;
use tables::name::FontNames;
use tables::os2::Os2;
use tables::post::Post;

/// A bounding box in font units.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Rect {
    pub x_min: i16,
    pub y_min: i16,
    pub x_max: i16,
    pub y_max: i16,
}

/// Glyph data: exactly one of CFF, CFF2 or TrueType `glyf`.
#[derive(Clone, Debug)]
pub enum GlyphSource<'a> {
    Cff(cff::CffFont<'a>),
    /// CFF2 has no DICT offsets worth rewriting; kept verbatim.
    Cff2(&'a [u8]),
    TrueType(truetype::TrueTypeFont<'a>),
}

/// A parsed font file.
pub struct FontFile<'a> {
    tables: HashMap<Tag, &'a [u8]>,
    pub number_of_glyphs: u16,
    pub head: Head,
    pub metrics: FontMetrics,
    pub names: FontNames,
    pub character_mapping: CharacterMapping,
    pub outlines: GlyphSource<'a>,
    pub os2: Option<Os2>,
    pub post: Option<Post<'a>>,
    hmtx: Hmtx<'a>,
    pub gsub: Option<LayoutTable<'a>>,
    pub gpos: Option<LayoutTable<'a>>,
    pub kern: Option<aat::KernTable<'a>>,
    pub morx: Option<aat::MorxTable<'a>>,
    // Mutated during layout; never read concurrently.
    used_glyphs: RefCell<BTreeSet<GlyphId>>,
}

mod tags {
    use crate::Tag;

    pub const HEAD: Tag = Tag::from_bytes(b"head");
    pub const NAME: Tag = Tag::from_bytes(b"name");
    pub const HHEA: Tag = Tag::from_bytes(b"hhea");
    pub const HMTX: Tag = Tag::from_bytes(b"hmtx");
    pub const MAXP: Tag = Tag::from_bytes(b"maxp");
    pub const POST: Tag = Tag::from_bytes(b"post");
    pub const CFF: Tag = Tag::from_bytes(b"CFF ");
    pub const CFF2: Tag = Tag::from_bytes(b"CFF2");
    pub const GLYF: Tag = Tag::from_bytes(b"glyf");
    pub const LOCA: Tag = Tag::from_bytes(b"loca");
    pub const CMAP: Tag = Tag::from_bytes(b"cmap");
    pub const GPOS: Tag = Tag::from_bytes(b"GPOS");
    pub const GSUB: Tag = Tag::from_bytes(b"GSUB");
    pub const KERN: Tag = Tag::from_bytes(b"kern");
    pub const MORX: Tag = Tag::from_bytes(b"morx");
    pub const OS2: Tag = Tag::from_bytes(b"OS/2");
}

const MAGIC_OPENTYPE: u32 = 0x4F54544F; // OTTO
const MAGIC_TRUETYPE: u32 = 0x00010000;
const MAGIC_TRUE: u32 = 0x74727565; // 'true'
const MAGIC_COLLECTION: u32 = 0x74746366; // ttcf

impl<'a> FontFile<'a> {
    /// Parses a font file, identifying the container by its first four
    /// bytes. For collections, `postscript_name` selects the member; the
    /// first member is used when no name is given or nothing matches.
    pub fn parse(data: &'a [u8], postscript_name: Option<&str>) -> Result<Self, SapError> {
        let magic: u32 = Stream::read_at(data, 0).ok_or(SapError::MalformedFont("empty file"))?;
        match magic {
            MAGIC_OPENTYPE | MAGIC_TRUETYPE | MAGIC_TRUE => {
                Self::parse_at(data, 0)
            }
            MAGIC_COLLECTION => {
                let offset = find_collection_member(data, postscript_name)?;
                Self::parse_at(data, offset)
            }
            _ => Err(SapError::MalformedFont("unknown magic number")),
        }
    }

    fn parse_at(data: &'a [u8], offset: usize) -> Result<Self, SapError> {
        let tables = parse_table_directory(data, offset)?;
        let table = |tag: Tag| tables.get(&tag).copied();
        let missing = |name: &'static str| SapError::MalformedFont(name);

        // head establishes units-per-em and the loca index size.
        let head = table(tags::HEAD)
            .and_then(tables::head::parse)
            .ok_or(missing("head"))?;

        let names = table(tags::NAME)
            .and_then(tables::name::parse)
            .unwrap_or_default();

        // hhea carries numberOfHMetrics, which hmtx needs.
        let hhea = table(tags::HHEA)
            .and_then(tables::hhea::parse)
            .ok_or(missing("hhea"))?;

        // maxp establishes the glyph count, which hmtx and loca need.
        let number_of_glyphs = table(tags::MAXP)
            .and_then(tables::maxp::parse)
            .ok_or(missing("maxp"))?
            .get();

        let hmtx = table(tags::HMTX)
            .and_then(|data| Hmtx::parse(hhea.number_of_h_metrics, number_of_glyphs, data))
            .ok_or(missing("hmtx"))?;

        let post = table(tags::POST).and_then(Post::parse);

        let outlines = if let Some(cff_data) = table(tags::CFF) {
            GlyphSource::Cff(cff::CffFont::parse(cff_data).ok_or(missing("CFF"))?)
        } else if let Some(cff2_data) = table(tags::CFF2) {
            GlyphSource::Cff2(cff2_data)
        } else {
            let loca = table(tags::LOCA).ok_or(missing("loca"))?;
            let glyf = table(tags::GLYF).ok_or(missing("glyf"))?;
            GlyphSource::TrueType(
                truetype::TrueTypeFont::parse(
                    loca,
                    glyf,
                    number_of_glyphs,
                    head.index_to_loc_format,
                )
                .ok_or(missing("loca/glyf"))?,
            )
        };

        let character_mapping = table(tags::CMAP)
            .and_then(tables::cmap::parse)
            .unwrap_or_else(|| {
                log::warn!("font has no usable cmap table");
                CharacterMapping::default()
            });

        let gpos = table(tags::GPOS).and_then(|d| LayoutTable::parse(LayoutKind::Positioning, d));
        let gsub = table(tags::GSUB).and_then(|d| LayoutTable::parse(LayoutKind::Substitution, d));

        // AAT tables are only consulted when GSUB/GPOS are absent.
        let kern = table(tags::KERN).and_then(aat::KernTable::parse);
        let morx = table(tags::MORX).and_then(|d| aat::MorxTable::parse(d, number_of_glyphs));

        let os2 = table(tags::OS2).and_then(tables::os2::parse);

        let metrics = FontMetrics::new(&head, &hhea, os2.as_ref(), post.as_ref());

        Ok(FontFile {
            tables,
            number_of_glyphs,
            head,
            metrics,
            names,
            character_mapping,
            outlines,
            os2,
            post,
            hmtx,
            gsub,
            gpos,
            kern,
            morx,
            used_glyphs: RefCell::new(BTreeSet::new()),
        })
    }

    pub fn table(&self, tag: Tag) -> Option<&'a [u8]> {
        self.tables.get(&tag).copied()
    }

    pub fn postscript_name(&self) -> String {
        self.names
            .postscript_or_fallback()
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Maps a codepoint, recording the produced glyph as used.
    pub fn glyph_for_codepoint(&self, codepoint: u32) -> GlyphId {
        let gid = self.character_mapping.glyph_for(codepoint);
        self.mark_glyph_used(gid);
        gid
    }

    pub fn mark_glyph_used(&self, glyph: GlyphId) {
        self.used_glyphs.borrow_mut().insert(glyph);
    }

    pub fn used_glyphs(&self) -> BTreeSet<GlyphId> {
        self.used_glyphs.borrow().clone()
    }

    pub fn glyph_advance(&self, glyph: GlyphId) -> Option<u16> {
        self.hmtx.advance(glyph)
    }

    /// The glyph's PostScript name, from `post` or the CFF charset.
    pub fn glyph_name(&self, glyph: GlyphId) -> Option<String> {
        if let Some(name) = self.post.as_ref().and_then(|p| p.glyph_name(glyph)) {
            return Some(name.to_string());
        }
        if let GlyphSource::Cff(ref cff) = self.outlines {
            return cff.glyph_name(glyph).map(str::to_string);
        }
        None
    }

    /// Shapes a codepoint sequence into positioned glyphs.
    ///
    /// GSUB runs first, then GPOS layers adjustments onto the substituted
    /// string. When neither table exists, `morx` and `kern` fill in.
    pub fn shape(&self, codepoints: &[u32], features: &ShapingFeatures) -> ShapedRun {
        let glyphs: Vec<ShapedGlyph> = codepoints
            .iter()
            .map(|&cp| ShapedGlyph::new(self.character_mapping.glyph_for(cp), cp))
            .collect();

        let mut run = if self.gsub.is_some() || self.gpos.is_some() {
            self.shape_opentype(glyphs, features)
        } else {
            self.shape_aat(glyphs, features)
        };

        for glyph in &run.glyphs {
            self.mark_glyph_used(glyph.gid);
        }

        run.maps
            .extra_glyphs
            .retain(|&gid| !self.character_mapping.contains_glyph(gid));
        run
    }

    fn shape_opentype(&self, glyphs: Vec<ShapedGlyph>, features: &ShapingFeatures) -> ShapedRun {
        let substituted = match &self.gsub {
            Some(gsub) => {
                let lookups =
                    gsub.select_lookups(features.script, features.language, &features.features);
                layout::substitute(gsub, &lookups, glyphs, |gid| {
                    self.character_mapping.contains_glyph(gid)
                })
            }
            None => layout::SubstitutedString {
                glyphs,
                maps: SubstitutionMaps::default(),
            },
        };

        let adjustments = match &self.gpos {
            Some(gpos) => {
                let lookups =
                    gpos.select_lookups(features.script, features.language, &features.features);
                let ids: Vec<GlyphId> = substituted.glyphs.iter().map(|g| g.gid).collect();
                layout::position(gpos, &lookups, &ids)
            }
            None => BTreeMap::new(),
        };

        ShapedRun {
            glyphs: substituted.glyphs,
            adjustments,
            maps: substituted.maps,
        }
    }

    fn shape_aat(&self, glyphs: Vec<ShapedGlyph>, features: &ShapingFeatures) -> ShapedRun {
        let glyphs = match &self.morx {
            Some(morx) => morx.apply(glyphs, &features.aat_features),
            None => glyphs,
        };

        let ids: Vec<GlyphId> = glyphs.iter().map(|g| g.gid).collect();
        let adjustments = match &self.kern {
            Some(kern) => kern.adjustments(&ids),
            None => BTreeMap::new(),
        };

        let mut maps = SubstitutionMaps::default();
        for glyph in &glyphs {
            match glyph.codepoints.as_slice() {
                [] => {
                    maps.extra_glyphs.insert(glyph.gid);
                }
                [cp] => {
                    if !self.character_mapping.contains_glyph(glyph.gid) {
                        maps.replacements.insert(glyph.gid, *cp);
                    }
                }
                many => {
                    maps.contractions.insert(glyph.gid, many.to_vec());
                }
            }
        }

        ShapedRun {
            glyphs,
            adjustments,
            maps,
        }
    }
}

/// Which features shaping should enable.
#[derive(Clone, Debug)]
pub struct ShapingFeatures {
    pub script: Tag,
    pub language: Option<Tag>,
    /// OpenType feature tags (e.g. `liga`, `kern`).
    pub features: BTreeSet<Tag>,
    /// AAT (type, selector) pairs for `morx` chains.
    pub aat_features: Vec<aat::AatFeature>,
}

impl Default for ShapingFeatures {
    fn default() -> Self {
        let mut features = BTreeSet::new();
        features.insert(Tag::from_bytes(b"liga"));
        features.insert(Tag::from_bytes(b"kern"));
        ShapingFeatures {
            script: Tag::from_bytes(b"latn"),
            language: None,
            features,
            // Common ligatures on (feature type 1, selector 2).
            aat_features: vec![aat::AatFeature {
                kind: 1,
                setting: 2,
            }],
        }
    }
}

/// The result of shaping one run.
#[derive(Clone, Debug)]
pub struct ShapedRun {
    pub glyphs: Vec<ShapedGlyph>,
    /// Position adjustments by glyph index into `glyphs`.
    pub adjustments: BTreeMap<usize, GlyphAdjustment>,
    pub maps: SubstitutionMaps,
}

pub(crate) fn parse_table_directory(
    data: &[u8],
    offset: usize,
) -> Result<HashMap<Tag, &[u8]>, SapError> {
    let err = || SapError::MalformedFont("truncated table directory");
    let mut s = Stream::new_at(data, offset).ok_or_else(err)?;
    s.skip::<u32>(); // sfnt version
    let num_tables: u16 = s.read().ok_or_else(err)?;
    s.advance(6); // searchRange + entrySelector + rangeShift

    let mut tables = HashMap::with_capacity(usize::from(num_tables));
    for _ in 0..num_tables {
        let tag: Tag = s.read().ok_or_else(err)?;
        s.skip::<u32>(); // checksum
        let table_offset: u32 = s.read().ok_or_else(err)?;
        let length: u32 = s.read().ok_or_else(err)?;

        let start = usize::try_from(table_offset).map_err(|_| err())?;
        let end = start
            .checked_add(usize::try_from(length).map_err(|_| err())?)
            .ok_or_else(err)?;
        // Tolerate tables that run past EOF by clamping; some fonts in
        // the wild pad their last table's length.
        let end = end.min(data.len());
        if start > end {
            return Err(err());
        }
        tables.insert(tag, &data[start..end]);
    }

    Ok(tables)
}

// Scans a `ttcf` collection for the member whose name table matches.
fn find_collection_member(data: &[u8], postscript_name: Option<&str>) -> Result<usize, SapError> {
    let err = || SapError::MalformedFont("truncated font collection");
    let mut s = Stream::new_at(data, 4).ok_or_else(err)?;
    s.skip::<u32>(); // version
    let count: u32 = s.read().ok_or_else(err)?;

    let mut first = None;
    for _ in 0..count {
        let offset: u32 = s.read().ok_or_else(err)?;
        let offset = usize::try_from(offset).map_err(|_| err())?;
        if first.is_none() {
            first = Some(offset);
        }

        let Some(wanted) = postscript_name else {
            break;
        };

        let Ok(tables) = parse_table_directory(data, offset) else {
            continue;
        };
        let names = tables
            .get(&tags::NAME)
            .copied()
            .and_then(tables::name::parse);
        if let Some(names) = names {
            if names.postscript_name.as_deref() == Some(wanted) {
                return Ok(offset);
            }
        }
    }

    first.ok_or(SapError::MalformedFont("empty font collection"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_magic() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0];
        assert!(FontFile::parse(&data, None).is_err());
    }

    #[test]
    fn table_directory_bounds() {
        // One table claiming to extend past EOF gets clamped, not
        // rejected.
        let mut data = Vec::new();
        data.extend_from_slice(&MAGIC_TRUETYPE.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&[0; 6]);
        data.extend_from_slice(b"test");
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&28u32.to_be_bytes()); // offset
        data.extend_from_slice(&100u32.to_be_bytes()); // length, too long
        data.extend_from_slice(&[1, 2, 3, 4]);

        let tables = parse_table_directory(&data, 0).unwrap();
        assert_eq!(tables[&Tag::from_bytes(b"test")], &[1, 2, 3, 4]);
    }
}
