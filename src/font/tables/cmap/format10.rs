// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap#format-10-trimmed-array

use crate::parser::Stream;
use crate::GlyphId;

pub fn mappings(data: &[u8], mut f: impl FnMut(u32, GlyphId)) -> Option<()> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // format
    s.skip::<u16>(); // reserved
    s.skip::<u32>(); // length
    s.skip::<u32>(); // language
    let start_char_code: u32 = s.read()?;
    let count: u32 = s.read()?;
    let glyphs = s.read_array32::<u16>(count)?;
    for (i, gid) in glyphs.into_iter().enumerate() {
        if gid != 0 {
            f(start_char_code + i as u32, GlyphId::from(gid));
        }
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_array() {
        let data = &[
            0x00, 0x0A, 0x00, 0x00, // format + reserved
            0x00, 0x00, 0x00, 0x18, // length
            0x00, 0x00, 0x00, 0x00, // language
            0x00, 0x01, 0x00, 0x00, // start char code: 0x10000
            0x00, 0x00, 0x00, 0x02, // count
            0x00, 0x07, 0x00, 0x08, // glyphs
        ];
        let mut pairs = vec![];
        mappings(data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(pairs, [(0x10000, GlyphId(7)), (0x10001, GlyphId(8))]);
    }
}
