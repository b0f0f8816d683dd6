// https://docs.microsoft.com/en-us/typography/opentype/spec/post

use crate::parser::{Fixed, LazyArray16, Stream};
use crate::GlyphId;

/// The 258 standard Macintosh glyph names referenced by `post` format 2.
#[rustfmt::skip]
const MACINTOSH_NAMES: &[&str] = &[
    ".notdef", ".null", "nonmarkingreturn", "space", "exclam", "quotedbl", "numbersign",
    "dollar", "percent", "ampersand", "quotesingle", "parenleft", "parenright", "asterisk",
    "plus", "comma", "hyphen", "period", "slash", "zero", "one", "two", "three", "four",
    "five", "six", "seven", "eight", "nine", "colon", "semicolon", "less", "equal",
    "greater", "question", "at", "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K",
    "L", "M", "N", "O", "P", "Q", "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
    "bracketleft", "backslash", "bracketright", "asciicircum", "underscore", "grave",
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q",
    "r", "s", "t", "u", "v", "w", "x", "y", "z", "braceleft", "bar", "braceright",
    "asciitilde", "Adieresis", "Aring", "Ccedilla", "Eacute", "Ntilde", "Odieresis",
    "Udieresis", "aacute", "agrave", "acircumflex", "adieresis", "atilde", "aring",
    "ccedilla", "eacute", "egrave", "ecircumflex", "edieresis", "iacute", "igrave",
    "icircumflex", "idieresis", "ntilde", "oacute", "ograve", "ocircumflex", "odieresis",
    "otilde", "uacute", "ugrave", "ucircumflex", "udieresis", "dagger", "degree", "cent",
    "sterling", "section", "bullet", "paragraph", "germandbls", "registered",
    "copyright", "trademark", "acute", "dieresis", "notequal", "AE", "Oslash",
    "infinity", "plusminus", "lessequal", "greaterequal", "yen", "mu", "partialdiff",
    "summation", "product", "pi", "integral", "ordfeminine", "ordmasculine", "Omega",
    "ae", "oslash", "questiondown", "exclamdown", "logicalnot", "radical", "florin",
    "approxequal", "Delta", "guillemotleft", "guillemotright", "ellipsis", "nonbreakingspace",
    "Agrave", "Atilde", "Otilde", "OE", "oe", "endash", "emdash", "quotedblleft",
    "quotedblright", "quoteleft", "quoteright", "divide", "lozenge", "ydieresis",
    "Ydieresis", "fraction", "currency", "guilsinglleft", "guilsinglright", "fi", "fl",
    "daggerdbl", "periodcentered", "quotesinglbase", "quotedblbase", "perthousand",
    "Acircumflex", "Ecircumflex", "Aacute", "Edieresis", "Egrave", "Iacute",
    "Icircumflex", "Idieresis", "Igrave", "Oacute", "Ocircumflex", "apple", "Ograve",
    "Uacute", "Ucircumflex", "Ugrave", "dotlessi", "circumflex", "tilde", "macron",
    "breve", "dotaccent", "ring", "cedilla", "hungarumlaut", "ogonek", "caron",
    "Lslash", "lslash", "Scaron", "scaron", "Zcaron", "zcaron", "brokenbar", "Eth",
    "eth", "Yacute", "yacute", "Thorn", "thorn", "minus", "multiply", "onesuperior",
    "twosuperior", "threesuperior", "onehalf", "onequarter", "threequarters", "franc",
    "Gbreve", "gbreve", "Idotaccent", "Scedilla", "scedilla", "Cacute", "cacute",
    "Ccaron", "ccaron", "dcroat",
];

/// A parsed `post` table.
#[derive(Clone, Copy, Default, Debug)]
pub struct Post<'a> {
    pub italic_angle: f32,
    pub underline_position: i16,
    pub underline_thickness: i16,
    pub is_fixed_pitch: bool,
    /// Set for version 2.0 only.
    name_indices: LazyArray16<'a, u16>,
    names_data: &'a [u8],
}

impl<'a> Post<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        let version: u32 = s.read()?;
        if !(version == 0x00010000
            || version == 0x00020000
            || version == 0x00025000
            || version == 0x00030000)
        {
            return None;
        }

        let italic_angle = s.read::<Fixed>()?.0;
        let underline_position = s.read::<i16>()?;
        let underline_thickness = s.read::<i16>()?;
        let is_fixed_pitch = s.read::<u32>()? != 0;

        let mut table = Post {
            italic_angle,
            underline_position,
            underline_thickness,
            is_fixed_pitch,
            name_indices: LazyArray16::default(),
            names_data: &[],
        };

        if version == 0x00020000 {
            let mut s = Stream::new_at(data, 32)?;
            let count = s.read::<u16>()?;
            table.name_indices = s.read_array16::<u16>(count)?;
            table.names_data = s.tail()?;
        }

        Some(table)
    }

    /// Returns a glyph's PostScript name, when the table stores one.
    pub fn glyph_name(&self, glyph_id: GlyphId) -> Option<&'a str> {
        let index = self.name_indices.get(glyph_id.to_u16())?;
        if usize::from(index) < MACINTOSH_NAMES.len() {
            return Some(MACINTOSH_NAMES[usize::from(index)]);
        }

        // Custom names are Pascal strings appended after the index array.
        let mut skip = index - MACINTOSH_NAMES.len() as u16;
        let mut s = Stream::new(self.names_data);
        while skip > 0 {
            let len = s.read::<u8>()?;
            s.advance_checked(usize::from(len))?;
            skip -= 1;
        }

        let len = s.read::<u8>()?;
        let bytes = s.read_bytes(usize::from(len))?;
        core::str::from_utf8(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn v2_table() -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(0x00020000);
        w.write_u32((-15i32 << 16) as u32); // italicAngle -15.0
        w.write_i16(-100); // underlinePosition
        w.write_i16(50); // underlineThickness
        w.write_u32(1); // isFixedPitch
        w.write_zeros(16);
        w.write_u16(3); // numberOfGlyphs
        w.write_u16(0); // .notdef
        w.write_u16(36); // 'A'
        w.write_u16(258); // first custom name
        w.write_u8(5);
        w.write_bytes(b"A.alt");
        w.finish()
    }

    #[test]
    fn standard_and_custom_names() {
        let data = v2_table();
        let post = Post::parse(&data).unwrap();
        assert_eq!(post.glyph_name(GlyphId(0)), Some(".notdef"));
        assert_eq!(post.glyph_name(GlyphId(1)), Some("A"));
        assert_eq!(post.glyph_name(GlyphId(2)), Some("A.alt"));
        assert_eq!(post.glyph_name(GlyphId(3)), None);
    }

    #[test]
    fn metrics() {
        let data = v2_table();
        let post = Post::parse(&data).unwrap();
        assert_eq!(post.italic_angle, -15.0);
        assert_eq!(post.underline_position, -100);
        assert!(post.is_fixed_pitch);
    }

    #[test]
    fn version_3_has_no_names() {
        let mut w = Writer::new();
        w.write_u32(0x00030000);
        w.write_zeros(28);
        let data = w.finish();
        let post = Post::parse(&data).unwrap();
        assert_eq!(post.glyph_name(GlyphId(0)), None);
    }
}
