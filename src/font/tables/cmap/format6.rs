// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap#format-6-trimmed-table-mapping

use crate::parser::Stream;
use crate::GlyphId;

pub fn mappings(data: &[u8], mut f: impl FnMut(u32, GlyphId)) -> Option<()> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // format
    s.skip::<u16>(); // length
    s.skip::<u16>(); // language
    let first_code: u16 = s.read()?;
    let count: u16 = s.read()?;
    let glyphs = s.read_array16::<u16>(count)?;
    for (i, gid) in glyphs.into_iter().enumerate() {
        if gid != 0 {
            f(u32::from(first_code) + i as u32, GlyphId::from(gid));
        }
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_range() {
        let data = &[
            0x00, 0x06, // format
            0x00, 0x10, // length
            0x00, 0x00, // language
            0x00, 0x61, // first code: 'a'
            0x00, 0x03, // count
            0x00, 0x0A, 0x00, 0x00, 0x00, 0x0C, // glyphs 10, 0, 12
        ];
        let mut pairs = vec![];
        mappings(data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(pairs, [(0x61, GlyphId(10)), (0x63, GlyphId(12))]);
    }
}
