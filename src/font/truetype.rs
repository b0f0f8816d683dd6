//! TrueType `glyf`/`loca` decoding and subsetting.
//!
//! Subsetting preserves the GID space: the output `loca` has one entry per
//! source glyph, but `glyf` bytes are emitted only for used glyphs and the
//! transitive closure of their composite components (plus `.notdef`).

use std::collections::BTreeSet;

use crate::font::tables::head::IndexToLocationFormat;
use crate::parser::Stream;
use crate::writer::Writer;
use crate::GlyphId;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug)]
    struct CompositeFlags: u16 {
        const ARG_1_AND_2_ARE_WORDS = 1 << 0;
        const WE_HAVE_A_SCALE = 1 << 3;
        const MORE_COMPONENTS = 1 << 5;
        const WE_HAVE_AN_X_AND_Y_SCALE = 1 << 6;
        const WE_HAVE_A_TWO_BY_TWO = 1 << 7;
    }
}

/// One glyph record: its raw `glyf` span plus any composite components.
#[derive(Clone, Debug)]
pub struct Glyph<'a> {
    pub data: &'a [u8],
    pub components: Vec<GlyphId>,
}

/// The decoded `glyf`/`loca` pair.
#[derive(Clone, Debug)]
pub struct TrueTypeFont<'a> {
    glyphs: Vec<Glyph<'a>>,
}

impl<'a> TrueTypeFont<'a> {
    pub fn parse(
        loca_data: &'a [u8],
        glyf_data: &'a [u8],
        number_of_glyphs: u16,
        format: IndexToLocationFormat,
    ) -> Option<Self> {
        let mut offsets = Vec::with_capacity(usize::from(number_of_glyphs) + 1);
        let mut s = Stream::new(loca_data);
        for _ in 0..=number_of_glyphs {
            let offset = match format {
                IndexToLocationFormat::Short => usize::from(s.read::<u16>()?) * 2,
                IndexToLocationFormat::Long => usize::try_from(s.read::<u32>()?).ok()?,
            };
            offsets.push(offset);
        }

        let mut glyphs = Vec::with_capacity(usize::from(number_of_glyphs));
        for pair in offsets.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            // A malformed record becomes an empty glyph rather than
            // poisoning the whole font.
            let data = if start <= end {
                glyf_data.get(start..end).unwrap_or(&[])
            } else {
                &[]
            };

            glyphs.push(Glyph {
                data,
                components: composite_components(data),
            });
        }

        Some(TrueTypeFont { glyphs })
    }

    pub fn number_of_glyphs(&self) -> u16 {
        self.glyphs.len() as u16
    }

    pub fn glyph(&self, glyph_id: GlyphId) -> Option<&Glyph<'a>> {
        self.glyphs.get(glyph_id.0 as usize)
    }

    /// Expands `used` with the transitive closure of composite components.
    pub fn close_over_components(&self, used: &mut BTreeSet<GlyphId>) {
        let mut queue: Vec<GlyphId> = used.iter().copied().collect();
        while let Some(gid) = queue.pop() {
            let Some(glyph) = self.glyph(gid) else { continue };
            for &component in &glyph.components {
                if used.insert(component) {
                    queue.push(component);
                }
            }
        }
    }

    /// Writes a subset `glyf`/`loca` pair.
    ///
    /// Every source GID keeps its slot; unused slots become zero-length
    /// glyphs whose loca entry repeats the previous end offset.
    pub fn subset(&self, used: &BTreeSet<GlyphId>) -> SubsetGlyf {
        let mut keep = used.clone();
        keep.insert(GlyphId::NOTDEF);
        self.close_over_components(&mut keep);

        let mut glyf = Writer::new();
        let mut ends = Vec::with_capacity(self.glyphs.len());
        for (i, glyph) in self.glyphs.iter().enumerate() {
            if keep.contains(&GlyphId(i as u32)) {
                glyf.write_bytes(glyph.data);
                // Short loca offsets are stored divided by two.
                if glyf.len() % 2 != 0 {
                    glyf.write_u8(0);
                }
            }
            ends.push(glyf.len());
        }

        let format = if glyf.len() <= usize::from(u16::MAX) * 2 {
            IndexToLocationFormat::Short
        } else {
            IndexToLocationFormat::Long
        };

        let mut loca = Writer::new();
        let mut write_offset = |w: &mut Writer, offset: usize| match format {
            IndexToLocationFormat::Short => w.write_u16((offset / 2) as u16),
            IndexToLocationFormat::Long => w.write_u32(offset as u32),
        };

        write_offset(&mut loca, 0);
        for &end in &ends {
            write_offset(&mut loca, end);
        }

        SubsetGlyf {
            glyf: glyf.finish(),
            loca: loca.finish(),
            format,
        }
    }
}

/// The result of [`TrueTypeFont::subset`].
#[derive(Clone, Debug)]
pub struct SubsetGlyf {
    pub glyf: Vec<u8>,
    pub loca: Vec<u8>,
    /// Must be patched into `head.indexToLocFormat`.
    pub format: IndexToLocationFormat,
}

fn composite_components(data: &[u8]) -> Vec<GlyphId> {
    let mut components = Vec::new();
    let mut s = Stream::new(data);
    let Some(number_of_contours) = s.read::<i16>() else {
        return components;
    };

    if number_of_contours >= 0 {
        return components;
    }

    s.advance(8); // bbox
    loop {
        let Some(flags) = s.read::<u16>().map(CompositeFlags::from_bits_truncate) else {
            break;
        };
        let Some(gid) = s.read::<GlyphId>() else { break };
        components.push(gid);

        s.advance(if flags.contains(CompositeFlags::ARG_1_AND_2_ARE_WORDS) {
            4
        } else {
            2
        });

        if flags.contains(CompositeFlags::WE_HAVE_A_TWO_BY_TWO) {
            s.advance(8);
        } else if flags.contains(CompositeFlags::WE_HAVE_AN_X_AND_Y_SCALE) {
            s.advance(4);
        } else if flags.contains(CompositeFlags::WE_HAVE_A_SCALE) {
            s.advance(2);
        }

        if !flags.contains(CompositeFlags::MORE_COMPONENTS) {
            break;
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_glyph(filler: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i16(1); // one contour
        w.write_zeros(8); // bbox
        w.write_bytes(filler);
        w.finish()
    }

    fn composite_glyph(components: &[(u16, bool)]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i16(-1);
        w.write_zeros(8); // bbox
        for (i, &(gid, words)) in components.iter().enumerate() {
            let mut flags = 0u16;
            if words {
                flags |= 1 << 0;
            }
            if i + 1 < components.len() {
                flags |= 1 << 5; // MORE_COMPONENTS
            }
            w.write_u16(flags);
            w.write_u16(gid);
            w.write_zeros(if words { 4 } else { 2 });
        }
        w.finish()
    }

    fn build(glyphs: &[Vec<u8>]) -> (Vec<u8>, Vec<u8>) {
        let mut glyf = Writer::new();
        let mut loca = Writer::new();
        loca.write_u32(0);
        for g in glyphs {
            glyf.write_bytes(g);
            loca.write_u32(glyf.len() as u32);
        }
        (loca.finish(), glyf.finish())
    }

    #[test]
    fn composite_references_are_collected() {
        let glyphs = [
            simple_glyph(&[1, 2]),
            simple_glyph(&[3, 4, 5, 6]),
            composite_glyph(&[(1, false), (3, true)]),
            simple_glyph(&[7, 8]),
        ];
        let (loca, glyf) = build(&glyphs);
        let font = TrueTypeFont::parse(&loca, &glyf, 4, IndexToLocationFormat::Long).unwrap();
        assert_eq!(font.glyph(GlyphId(2)).unwrap().components, [GlyphId(1), GlyphId(3)]);
        assert!(font.glyph(GlyphId(1)).unwrap().components.is_empty());
    }

    #[test]
    fn subset_preserves_gid_space() {
        let glyphs = [
            simple_glyph(&[]),
            simple_glyph(&[1, 2]),
            composite_glyph(&[(3, false)]),
            simple_glyph(&[9, 9]),
        ];
        let (loca, glyf) = build(&glyphs);
        let font = TrueTypeFont::parse(&loca, &glyf, 4, IndexToLocationFormat::Long).unwrap();

        let mut used = BTreeSet::new();
        used.insert(GlyphId(2));
        let subset = font.subset(&used);

        // One entry per source glyph plus the leading zero.
        let reparsed =
            TrueTypeFont::parse(&subset.loca, &subset.glyf, 4, subset.format).unwrap();
        assert_eq!(reparsed.number_of_glyphs(), 4);

        // Glyph 1 is unused and must be empty; 2 and its component 3 survive.
        assert!(!reparsed.glyph(GlyphId(0)).unwrap().data.is_empty());
        assert!(reparsed.glyph(GlyphId(1)).unwrap().data.is_empty());
        assert!(!reparsed.glyph(GlyphId(2)).unwrap().data.is_empty());
        assert!(!reparsed.glyph(GlyphId(3)).unwrap().data.is_empty());
        assert_eq!(reparsed.glyph(GlyphId(2)).unwrap().components, [GlyphId(3)]);
    }
}
