// https://docs.microsoft.com/en-us/typography/opentype/spec/hhea

use crate::parser::Stream;

const TABLE_SIZE: usize = 36;

/// A parsed `hhea` table.
#[derive(Clone, Copy, Debug)]
pub struct Hhea {
    pub ascender: i16,
    pub descender: i16,
    pub line_gap: i16,
    /// Consumed later by `hmtx`.
    pub number_of_h_metrics: u16,
}

pub fn parse(data: &[u8]) -> Option<Hhea> {
    if data.len() < TABLE_SIZE {
        return None;
    }

    Some(Hhea {
        ascender: Stream::read_at::<i16>(data, 4)?,
        descender: Stream::read_at::<i16>(data, 6)?,
        line_gap: Stream::read_at::<i16>(data, 8)?,
        number_of_h_metrics: Stream::read_at::<u16>(data, 34)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    #[test]
    fn basic() {
        let mut w = Writer::new();
        w.write_u32(0x00010000);
        w.write_i16(800);
        w.write_i16(-200);
        w.write_i16(90);
        w.write_zeros(24);
        w.write_u16(3);
        let hhea = parse(w.data()).unwrap();
        assert_eq!(hhea.ascender, 800);
        assert_eq!(hhea.descender, -200);
        assert_eq!(hhea.line_gap, 90);
        assert_eq!(hhea.number_of_h_metrics, 3);
    }

    #[test]
    fn too_short() {
        assert!(parse(&[0; 10]).is_none());
    }
}
