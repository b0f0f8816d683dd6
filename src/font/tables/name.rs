// https://docs.microsoft.com/en-us/typography/opentype/spec/name

use std::collections::HashMap;

use crate::parser::{FromData, Stream};

mod platform_id {
    pub const UNICODE: u16 = 0;
    pub const MACINTOSH: u16 = 1;
    pub const WINDOWS: u16 = 3;
}

mod name_id {
    pub const COPYRIGHT: u16 = 0;
    pub const FAMILY: u16 = 1;
    pub const SUBFAMILY: u16 = 2;
    pub const UNIQUE_ID: u16 = 3;
    pub const FULL_NAME: u16 = 4;
    pub const POST_SCRIPT_NAME: u16 = 6;
    pub const LICENSE: u16 = 13;
    pub const TYPOGRAPHIC_FAMILY: u16 = 16;
    pub const TYPOGRAPHIC_SUBFAMILY: u16 = 17;
}

/// The decoded `name` table.
///
/// Recognized ids are promoted to fields; everything else is retained in
/// `other` keyed by name id.
#[derive(Clone, Default, Debug)]
pub struct FontNames {
    pub copyright: Option<String>,
    pub family: Option<String>,
    pub subfamily: Option<String>,
    pub unique_name: Option<String>,
    pub full_name: Option<String>,
    pub postscript_name: Option<String>,
    pub license: Option<String>,
    pub typographic_family: Option<String>,
    pub typographic_subfamily: Option<String>,
    pub other: HashMap<u16, String>,
}

impl FontNames {
    /// The PostScript name, fabricating one from the unique name when the
    /// font does not carry id 6.
    pub fn postscript_or_fallback(&self) -> Option<String> {
        if let Some(ref name) = self.postscript_name {
            return Some(name.clone());
        }

        let base = self.unique_name.as_ref().or(self.full_name.as_ref())?;
        log::warn!("font has no PostScript name; fabricating one from '{}'", base);
        Some(base.chars().filter(|c| !c.is_whitespace()).collect())
    }
}

#[derive(Clone, Copy)]
struct NameRecord {
    platform_id: u16,
    encoding_id: u16,
    name_id: u16,
    length: u16,
    offset: u16,
}

impl FromData for NameRecord {
    const SIZE: usize = 12;

    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        let platform_id = s.read::<u16>()?;
        let encoding_id = s.read::<u16>()?;
        s.skip::<u16>(); // language id
        let name_id = s.read::<u16>()?;
        let length = s.read::<u16>()?;
        let offset = s.read::<u16>()?;
        Some(NameRecord {
            platform_id,
            encoding_id,
            name_id,
            length,
            offset,
        })
    }
}

fn decode_utf16_be(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

// The upper half of the Mac OS Roman encoding; the lower half is ASCII.
#[rustfmt::skip]
const MAC_ROMAN: [char; 128] = [
    'Ä','Å','Ç','É','Ñ','Ö','Ü','á','à','â','ä','ã','å','ç','é','è',
    'ê','ë','í','ì','î','ï','ñ','ó','ò','ô','ö','õ','ú','ù','û','ü',
    '†','°','¢','£','§','•','¶','ß','®','©','™','´','¨','≠','Æ','Ø',
    '∞','±','≤','≥','¥','µ','∂','∑','∏','π','∫','ª','º','Ω','æ','ø',
    '¿','¡','¬','√','ƒ','≈','∆','«','»','…','\u{A0}','À','Ã','Õ','Œ','œ',
    '–','—','“','”','‘','’','÷','◊','ÿ','Ÿ','⁄','€','‹','›','ﬁ','ﬂ',
    '‡','·','‚','„','‰','Â','Ê','Á','Ë','È','Í','Î','Ï','Ì','Ó','Ô',
    '\u{F8FF}','Ò','Ú','Û','Ù','ı','ˆ','˜','¯','˘','˙','˚','¸','˝','˛','ˇ',
];

fn decode_mac_roman(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                MAC_ROMAN[usize::from(b - 0x80)]
            }
        })
        .collect()
}

fn decode_record(record: NameRecord, storage: &[u8]) -> Option<String> {
    let start = usize::from(record.offset);
    let bytes = storage.get(start..start + usize::from(record.length))?;
    match (record.platform_id, record.encoding_id) {
        (platform_id::UNICODE, _) | (platform_id::WINDOWS, _) => Some(decode_utf16_be(bytes)),
        (platform_id::MACINTOSH, 0) => Some(decode_mac_roman(bytes)),
        _ => None,
    }
}

pub fn parse(data: &[u8]) -> Option<FontNames> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // version
    let count = s.read::<u16>()?;
    let storage_offset = s.read::<u16>()?;
    let records = s.read_array16::<NameRecord>(count)?;
    let storage = data.get(usize::from(storage_offset)..)?;

    let mut names = FontNames::default();
    for record in records {
        let Some(text) = decode_record(record, storage) else {
            continue;
        };

        let slot = match record.name_id {
            name_id::COPYRIGHT => &mut names.copyright,
            name_id::FAMILY => &mut names.family,
            name_id::SUBFAMILY => &mut names.subfamily,
            name_id::UNIQUE_ID => &mut names.unique_name,
            name_id::FULL_NAME => &mut names.full_name,
            name_id::POST_SCRIPT_NAME => &mut names.postscript_name,
            name_id::LICENSE => &mut names.license,
            name_id::TYPOGRAPHIC_FAMILY => &mut names.typographic_family,
            name_id::TYPOGRAPHIC_SUBFAMILY => &mut names.typographic_subfamily,
            other => {
                names.other.entry(other).or_insert(text);
                continue;
            }
        };

        // Prefer the first decodable record for a given id; fonts commonly
        // repeat names across platforms.
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn record(w: &mut Writer, platform: u16, encoding: u16, id: u16, len: u16, offset: u16) {
        w.write_u16(platform);
        w.write_u16(encoding);
        w.write_u16(0);
        w.write_u16(id);
        w.write_u16(len);
        w.write_u16(offset);
    }

    #[test]
    fn windows_utf16() {
        let mut w = Writer::new();
        w.write_u16(0); // version
        w.write_u16(1); // count
        w.write_u16(6 + 12); // storage offset
        record(&mut w, 3, 1, name_id::FAMILY, 8, 0);
        for c in "Test".encode_utf16() {
            w.write_u16(c);
        }

        let names = parse(w.data()).unwrap();
        assert_eq!(names.family.as_deref(), Some("Test"));
    }

    #[test]
    fn mac_roman_high_bytes() {
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(6 + 12);
        record(&mut w, 1, 0, name_id::FULL_NAME, 4, 0);
        w.write_bytes(&[b'C', b'a', b'f', 0x8E]); // "Café" in Mac Roman

        let names = parse(w.data()).unwrap();
        assert_eq!(names.full_name.as_deref(), Some("Café"));
    }

    #[test]
    fn unknown_ids_are_retained() {
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(6 + 12);
        record(&mut w, 3, 1, 300, 4, 0);
        for c in "xy".encode_utf16() {
            w.write_u16(c);
        }

        let names = parse(w.data()).unwrap();
        assert_eq!(names.other.get(&300).map(String::as_str), Some("xy"));
    }

    #[test]
    fn fabricated_postscript_name() {
        let names = FontNames {
            unique_name: Some("Some Font 1.0".to_string()),
            ..FontNames::default()
        };
        assert_eq!(names.postscript_or_fallback().as_deref(), Some("SomeFont1.0"));
    }
}
