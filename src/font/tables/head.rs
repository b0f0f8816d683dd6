// https://docs.microsoft.com/en-us/typography/opentype/spec/head

use crate::font::Rect;
use crate::parser::Stream;

/// The index size used by `loca`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexToLocationFormat {
    Short,
    Long,
}

/// A parsed `head` table.
#[derive(Clone, Copy, Debug)]
pub struct Head {
    pub units_per_em: u16,
    pub global_bbox: Rect,
    pub index_to_loc_format: IndexToLocationFormat,
}

pub fn parse(data: &[u8]) -> Option<Head> {
    // version .. magicNumber are of no interest to us.
    let units_per_em: u16 = Stream::read_at(data, 18)?;
    if !(16..=16384).contains(&units_per_em) {
        return None;
    }

    let mut s = Stream::new_at(data, 36)?;
    let global_bbox = Rect {
        x_min: s.read::<i16>()?,
        y_min: s.read::<i16>()?,
        x_max: s.read::<i16>()?,
        y_max: s.read::<i16>()?,
    };

    let index_to_loc_format = match Stream::read_at::<i16>(data, 50)? {
        0 => IndexToLocationFormat::Short,
        1 => IndexToLocationFormat::Long,
        _ => return None,
    };

    Some(Head {
        units_per_em,
        global_bbox,
        index_to_loc_format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn head_data(units_per_em: u16, loc_format: i16) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_zeros(18);
        w.write_u16(units_per_em);
        w.write_zeros(16);
        w.write_i16(-10); // xMin
        w.write_i16(-20); // yMin
        w.write_i16(100); // xMax
        w.write_i16(200); // yMax
        w.write_zeros(6);
        w.write_i16(loc_format);
        w.write_i16(0); // glyphDataFormat
        w.finish()
    }

    #[test]
    fn basic() {
        let data = head_data(1000, 1);
        let head = parse(&data).unwrap();
        assert_eq!(head.units_per_em, 1000);
        assert_eq!(head.index_to_loc_format, IndexToLocationFormat::Long);
        assert_eq!(head.global_bbox.x_max, 100);
    }

    #[test]
    fn rejects_bad_upem() {
        assert!(parse(&head_data(5, 0)).is_none());
    }

    #[test]
    fn rejects_bad_loc_format() {
        assert!(parse(&head_data(1000, 2)).is_none());
    }
}
