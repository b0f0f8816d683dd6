//! Shaping against a synthetic TrueType font with a `liga` feature.

use sap::font::subset::SfntBuilder;
use sap::font::{FontFile, ShapingFeatures};
use sap::writer::Writer;
use sap::{GlyphId, Tag};

// Glyphs: 0 .notdef, 1 f, 2 i, 3 fi, 4 t.
const GID_F: u16 = 1;
const GID_I: u16 = 2;
const GID_FI: u16 = 3;
const GID_T: u16 = 4;

fn head_table() -> Vec<u8> {
    let mut w = Writer::new();
    w.write_zeros(18);
    w.write_u16(1000); // unitsPerEm
    w.write_zeros(16);
    w.write_i16(0);
    w.write_i16(-200);
    w.write_i16(600);
    w.write_i16(800);
    w.write_zeros(6);
    w.write_i16(0); // indexToLocFormat: short
    w.write_i16(0); // glyphDataFormat
    w.finish()
}

fn hhea_table() -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(0x00010000);
    w.write_i16(800);
    w.write_i16(-200);
    w.write_i16(0);
    w.write_zeros(24);
    w.write_u16(5); // numberOfHMetrics
    w.finish()
}

fn maxp_table() -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(0x00010000);
    w.write_u16(5);
    w.finish()
}

fn hmtx_table() -> Vec<u8> {
    let mut w = Writer::new();
    for _ in 0..5 {
        w.write_u16(500);
        w.write_i16(0);
    }
    w.finish()
}

fn loca_table() -> Vec<u8> {
    let mut w = Writer::new();
    for _ in 0..6 {
        w.write_u16(0); // every glyph is empty
    }
    w.finish()
}

// (0, 4) encoding with a format-6 subtable covering 'f'..='t'.
fn cmap_table() -> Vec<u8> {
    let first = 'f' as u16;
    let count = 't' as u16 - first + 1;
    let mut glyphs = vec![0u16; usize::from(count)];
    glyphs[('f' as u16 - first) as usize] = GID_F;
    glyphs[('i' as u16 - first) as usize] = GID_I;
    glyphs[('t' as u16 - first) as usize] = GID_T;

    let mut w = Writer::new();
    w.write_u16(0); // version
    w.write_u16(1); // one encoding record
    w.write_u16(0); // platform: Unicode
    w.write_u16(4); // encoding
    w.write_u32(12); // subtable offset
    w.write_u16(6); // format
    w.write_u16(10 + count * 2);
    w.write_u16(0); // language
    w.write_u16(first);
    w.write_u16(count);
    for gid in glyphs {
        w.write_u16(gid);
    }
    w.finish()
}

// A GSUB with one `liga` feature under DFLT: f + i -> fi.
fn gsub_table() -> Vec<u8> {
    let mut cov = Writer::new();
    cov.write_u16(1); // coverage format 1
    cov.write_u16(1);
    cov.write_u16(GID_F);

    let mut sub = Writer::new();
    sub.write_u16(1); // substitution format
    sub.write_u16(0); // coverage offset, patched
    sub.write_u16(1); // ligature set count
    sub.write_u16(0); // set offset, patched
    let set_offset = sub.len();
    sub.write_u16(1); // ligature count
    sub.write_u16(4); // ligature offset within the set
    sub.write_u16(GID_FI);
    sub.write_u16(2); // component count
    sub.write_u16(GID_I);
    let cov_offset = sub.len();
    sub.write_bytes(cov.data());
    let mut sub = sub.finish();
    sub[2..4].copy_from_slice(&(cov_offset as u16).to_be_bytes());
    sub[6..8].copy_from_slice(&(set_offset as u16).to_be_bytes());

    let mut lookups = Writer::new();
    lookups.write_u16(1);
    lookups.write_u16(4);
    lookups.write_u16(4); // type: ligature
    lookups.write_u16(0); // flags
    lookups.write_u16(1); // subtable count
    lookups.write_u16(10); // subtable offset from the lookup
    lookups.write_bytes(&sub);

    let mut features = Writer::new();
    features.write_u16(1);
    features.write_bytes(b"liga");
    features.write_u16(8);
    features.write_u16(0);
    features.write_u16(1);
    features.write_u16(0);

    let mut scripts = Writer::new();
    scripts.write_u16(1);
    scripts.write_bytes(b"DFLT");
    scripts.write_u16(8);
    scripts.write_u16(4); // defaultLangSys
    scripts.write_u16(0); // no other languages
    scripts.write_u16(0); // lookupOrder
    scripts.write_u16(0xFFFF); // no required feature
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

fn build_font() -> Vec<u8> {
    let mut builder = SfntBuilder::new(0x00010000);
    builder.add_table(Tag::from_bytes(b"head"), head_table());
    builder.add_table(Tag::from_bytes(b"hhea"), hhea_table());
    builder.add_table(Tag::from_bytes(b"maxp"), maxp_table());
    builder.add_table(Tag::from_bytes(b"hmtx"), hmtx_table());
    builder.add_table(Tag::from_bytes(b"loca"), loca_table());
    builder.add_table(Tag::from_bytes(b"glyf"), Vec::new());
    builder.add_table(Tag::from_bytes(b"cmap"), cmap_table());
    builder.add_table(Tag::from_bytes(b"GSUB"), gsub_table());
    builder.finish()
}

#[test]
fn ligature_shaping_and_to_unicode() {
    let data = build_font();
    let font = FontFile::parse(&data, None).unwrap();

    let codepoints: Vec<u32> = "fit".chars().map(|c| c as u32).collect();
    let run = font.shape(&codepoints, &ShapingFeatures::default());

    // f + i contract into the ligature; t survives.
    assert_eq!(run.glyphs.len(), 2);
    assert_eq!(run.glyphs[0].gid, GlyphId(u32::from(GID_FI)));
    assert_eq!(run.glyphs[1].gid, GlyphId(u32::from(GID_T)));

    // The side table records the contraction for ToUnicode.
    assert_eq!(
        run.maps.contractions.get(&GlyphId(u32::from(GID_FI))),
        Some(&vec!['f' as u32, 'i' as u32])
    );

    // Every shaped glyph is either reverse-mappable or covered by the
    // contraction table.
    for glyph in &run.glyphs {
        let covered = font.character_mapping.codepoint_for(glyph.gid).is_some()
            || run.maps.contractions.contains_key(&glyph.gid)
            || run.maps.extra_glyphs.contains(&glyph.gid);
        assert!(covered, "glyph {:?} has no ToUnicode source", glyph.gid);
    }

    // The ToUnicode entries cover every used glyph.
    let entries = sap::pdf::font::to_unicode_for(&font, &run.maps);
    let used = font.used_glyphs();
    assert_eq!(entries.len(), used.len());
    let fi_entry = entries
        .iter()
        .find(|(cid, _)| *cid == GID_FI)
        .expect("ligature entry missing");
    assert_eq!(fi_entry.1, vec!['f' as u32, 'i' as u32]);
}

#[test]
fn shaping_without_features_keeps_the_string() {
    let data = build_font();
    let font = FontFile::parse(&data, None).unwrap();

    let mut features = ShapingFeatures::default();
    features.features.clear();

    let codepoints: Vec<u32> = "fit".chars().map(|c| c as u32).collect();
    let run = font.shape(&codepoints, &features);
    assert_eq!(run.glyphs.len(), 3);
    assert_eq!(run.glyphs[0].gid, GlyphId(u32::from(GID_F)));
}

#[test]
fn missing_codepoints_map_to_notdef() {
    let data = build_font();
    let font = FontFile::parse(&data, None).unwrap();
    assert_eq!(font.character_mapping.glyph_for('z' as u32), GlyphId::NOTDEF);
    assert_eq!(
        font.character_mapping.glyph_for('i' as u32),
        GlyphId(u32::from(GID_I))
    );
}
