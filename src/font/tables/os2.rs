// https://docs.microsoft.com/en-us/typography/opentype/spec/os2

use crate::parser::Stream;

// Bits of `fsSelection` we consume.
const ITALIC: u16 = 1 << 0;
const BOLD: u16 = 1 << 5;
const USE_TYPO_METRICS: u16 = 1 << 7;

/// A parsed `OS/2` table.
#[derive(Clone, Copy, Debug)]
pub struct Os2 {
    pub version: u16,
    pub weight_class: u16,
    pub width_class: u16,
    pub typo_ascender: i16,
    pub typo_descender: i16,
    pub typo_line_gap: i16,
    /// Only set for version >= 2.
    pub x_height: Option<i16>,
    /// Only set for version >= 2.
    pub cap_height: Option<i16>,
    fs_selection: u16,
}

impl Os2 {
    pub fn is_italic(&self) -> bool {
        self.fs_selection & ITALIC != 0
    }

    pub fn is_bold(&self) -> bool {
        self.fs_selection & BOLD != 0
    }

    pub fn use_typo_metrics(&self) -> bool {
        self.fs_selection & USE_TYPO_METRICS != 0
    }
}

pub fn parse(data: &[u8]) -> Option<Os2> {
    let mut s = Stream::new(data);
    let version: u16 = s.read()?;
    if version > 5 {
        return None;
    }

    let weight_class: u16 = Stream::read_at(data, 4)?;
    let width_class: u16 = Stream::read_at(data, 6)?;
    let fs_selection: u16 = Stream::read_at(data, 62)?;
    let typo_ascender: i16 = Stream::read_at(data, 68)?;
    let typo_descender: i16 = Stream::read_at(data, 70)?;
    let typo_line_gap: i16 = Stream::read_at(data, 72)?;

    let (x_height, cap_height) = if version >= 2 {
        (
            Stream::read_at::<i16>(data, 86),
            Stream::read_at::<i16>(data, 88),
        )
    } else {
        (None, None)
    };

    Some(Os2 {
        version,
        weight_class,
        width_class,
        typo_ascender,
        typo_descender,
        typo_line_gap,
        x_height,
        cap_height,
        fs_selection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn os2_data(version: u16) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(version);
        w.write_zeros(2);
        w.write_u16(700); // usWeightClass
        w.write_u16(5); // usWidthClass
        w.write_zeros(54);
        w.write_u16(ITALIC | USE_TYPO_METRICS); // fsSelection
        w.write_zeros(4);
        w.write_i16(750); // sTypoAscender
        w.write_i16(-250); // sTypoDescender
        w.write_i16(100); // sTypoLineGap
        w.write_zeros(12);
        w.write_i16(480); // sxHeight
        w.write_i16(690); // sCapHeight
        w.write_zeros(6);
        w.finish()
    }

    #[test]
    fn version_2_heights() {
        let os2 = parse(&os2_data(2)).unwrap();
        assert_eq!(os2.x_height, Some(480));
        assert_eq!(os2.cap_height, Some(690));
        assert!(os2.is_italic());
        assert!(!os2.is_bold());
        assert!(os2.use_typo_metrics());
    }

    #[test]
    fn version_0_has_no_heights() {
        let os2 = parse(&os2_data(0)).unwrap();
        assert_eq!(os2.x_height, None);
        assert_eq!(os2.cap_height, None);
        assert_eq!(os2.typo_ascender, 750);
    }
}
