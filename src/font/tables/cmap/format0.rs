// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap#format-0-byte-encoding-table

use crate::parser::Stream;
use crate::GlyphId;

pub fn mappings(data: &[u8], mut f: impl FnMut(u32, GlyphId)) -> Option<()> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // format
    s.skip::<u16>(); // length
    s.skip::<u16>(); // language
    let glyphs = s.read_bytes(256)?;
    for (code, &gid) in glyphs.iter().enumerate() {
        if gid != 0 {
            f(code as u32, GlyphId::from(u16::from(gid)));
        }
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_bytes() {
        let mut data = vec![0x00, 0x00, 0x01, 0x06, 0x00, 0x00];
        data.extend(std::iter::repeat(0).take(256));
        data[6 + 0x40] = 100;

        let mut pairs = vec![];
        mappings(&data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(pairs, [(0x40, GlyphId(100))]);
    }

    #[test]
    fn truncated() {
        assert!(mappings(&[0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x01], |_, _| {}).is_none());
    }
}
