//! Whole-font subsetting: dispatches to the CFF or TrueType subsetter and
//! reassembles an sfnt container around the result.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SapError;
use crate::font::tables::head::IndexToLocationFormat;
use crate::font::{FontFile, GlyphSource};
use crate::writer::Writer;
use crate::{GlyphId, Tag};

/// Which container the subset bytes belong in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SubsetKind {
    /// Embedded under `FontFile3` with subtype `CIDFontType0C`.
    Cff,
    /// Embedded under `FontFile3` with subtype `OpenType`.
    Cff2,
    /// Embedded under `FontFile2`.
    TrueType,
}

/// A subsetted font ready for embedding.
#[derive(Clone, Debug)]
pub struct SubsetFont {
    /// For CFF this is the bare CFF blob; for TrueType a whole sfnt.
    pub bytes: Vec<u8>,
    pub kind: SubsetKind,
    /// The six-letter subset tag, e.g. `BCDFGH`.
    pub tag: String,
    /// `tag + "+" + postscript name`.
    pub subset_name: String,
}

/// Subsets `font` down to its used-glyph set.
pub fn subset(font: &FontFile) -> Result<SubsetFont, SapError> {
    let used = font.used_glyphs();
    let tag = subset_tag();
    let subset_name = format!("{}+{}", tag, font.postscript_name());

    match &font.outlines {
        GlyphSource::Cff(cff) => {
            let bytes = super::cff::subset::subset(cff, &used, &subset_name)
                .map_err(|_| SapError::MalformedFont("CFF charstrings"))?;
            Ok(SubsetFont {
                bytes,
                kind: SubsetKind::Cff,
                tag,
                subset_name,
            })
        }
        GlyphSource::Cff2(data) => Ok(SubsetFont {
            bytes: data.to_vec(),
            kind: SubsetKind::Cff2,
            tag,
            subset_name,
        }),
        GlyphSource::TrueType(truetype) => {
            let bytes = subset_truetype(font, truetype, &used)?;
            Ok(SubsetFont {
                bytes,
                kind: SubsetKind::TrueType,
                tag,
                subset_name,
            })
        }
    }
}

// TrueType subsets stay full sfnt files: glyf/loca are rewritten, head is
// patched for the chosen loca format, everything else metric-relevant is
// carried over verbatim.
fn subset_truetype(
    font: &FontFile,
    truetype: &super::truetype::TrueTypeFont,
    used: &BTreeSet<GlyphId>,
) -> Result<Vec<u8>, SapError> {
    let subset = truetype.subset(used);

    let mut head = font
        .table(Tag::from_bytes(b"head"))
        .ok_or(SapError::MalformedFont("head"))?
        .to_vec();
    if head.len() > 51 {
        head[50..52].copy_from_slice(
            &(match subset.format {
                IndexToLocationFormat::Short => 0i16,
                IndexToLocationFormat::Long => 1i16,
            })
            .to_be_bytes(),
        );
    }

    let mut sfnt = SfntBuilder::new(0x00010000);
    sfnt.add_table(Tag::from_bytes(b"head"), head);
    sfnt.add_table(Tag::from_bytes(b"glyf"), subset.glyf);
    sfnt.add_table(Tag::from_bytes(b"loca"), subset.loca);
    for tag in [
        b"hhea", b"hmtx", b"maxp", b"cvt ", b"fpgm", b"prep", b"cmap", b"name", b"OS/2", b"post",
    ] {
        let tag = Tag::from_bytes(tag);
        if let Some(data) = font.table(tag) {
            sfnt.add_table(tag, data.to_vec());
        }
    }

    Ok(sfnt.finish())
}

/// Writes an sfnt wrapper around a set of tables, with checksums and the
/// `head` checksum adjustment filled in.
pub struct SfntBuilder {
    version: u32,
    tables: Vec<(Tag, Vec<u8>)>,
}

impl SfntBuilder {
    pub fn new(version: u32) -> Self {
        SfntBuilder {
            version,
            tables: Vec::new(),
        }
    }

    pub fn add_table(&mut self, tag: Tag, data: Vec<u8>) {
        self.tables.push((tag, data));
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.tables.sort_by_key(|(tag, _)| *tag);

        let num_tables = self.tables.len() as u16;
        let mut w = Writer::new();
        w.write_u32(self.version);
        w.write_u16(num_tables);
        let entry_selector = 15 - num_tables.leading_zeros() as u16;
        let search_range = 16 * (1 << entry_selector);
        w.write_u16(search_range);
        w.write_u16(entry_selector);
        w.write_u16(num_tables * 16 - search_range);

        let mut offset = 12 + usize::from(num_tables) * 16;
        let mut head_offset = None;
        for (tag, data) in &self.tables {
            if *tag == Tag::from_bytes(b"head") {
                head_offset = Some(offset);
            }
            w.write_u32(tag.0);
            w.write_u32(table_checksum(data));
            w.write_u32(offset as u32);
            w.write_u32(data.len() as u32);
            offset += (data.len() + 3) & !3;
        }

        for (_, data) in &self.tables {
            w.write_bytes(data);
            w.align4();
        }

        let mut bytes = w.finish();
        if let Some(head_offset) = head_offset {
            // head.checkSumAdjustment = 0xB1B0AFBA - checksum(whole file),
            // computed with the adjustment field zeroed.
            bytes[head_offset + 8..head_offset + 12].fill(0);
            let total = table_checksum(&bytes);
            let adjustment = 0xB1B0AFBAu32.wrapping_sub(total);
            bytes[head_offset + 8..head_offset + 12].copy_from_slice(&adjustment.to_be_bytes());
        }

        bytes
    }
}

fn table_checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    sum
}

// Process-wide state seeded once; the tag sequence itself does not need
// to be unpredictable, only distinct within a document.
static TAG_STATE: AtomicU64 = AtomicU64::new(0);

/// A six-uppercase-letter tag for subset PostScript names.
pub fn subset_tag() -> String {
    let mut state = TAG_STATE.load(Ordering::Relaxed);
    if state == 0 {
        state = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15)
            | 1;
    }

    // splitmix64 step.
    state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^= z >> 31;
    TAG_STATE.store(state, Ordering::Relaxed);

    (0..6)
        .map(|i| {
            let letter = (z >> (i * 8)) % 26;
            (b'A' + letter as u8) as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_six_uppercase_letters() {
        let tag = subset_tag();
        assert_eq!(tag.len(), 6);
        assert!(tag.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn consecutive_tags_differ() {
        assert_ne!(subset_tag(), subset_tag());
    }

    #[test]
    fn sfnt_round_trip() {
        let mut builder = SfntBuilder::new(0x00010000);
        builder.add_table(Tag::from_bytes(b"aaaa"), vec![1, 2, 3]);
        builder.add_table(Tag::from_bytes(b"bbbb"), vec![4, 5, 6, 7, 8]);
        let data = builder.finish();

        let tables = crate::font::parse_table_directory(&data, 0).unwrap();
        assert_eq!(tables[&Tag::from_bytes(b"aaaa")], &[1, 2, 3]);
        assert_eq!(tables[&Tag::from_bytes(b"bbbb")], &[4, 5, 6, 7, 8]);
    }
}
