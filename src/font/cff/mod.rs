//! Compact Font Format parsing, interpretation and subsetting.
//!
//! Only CFF version 1 is modeled here; CFF2 has no DICT offsets worth
//! rewriting and is embedded unchanged by the subset driver.

pub mod charset;
pub mod charstring;
pub mod dict;
pub mod index;
pub mod strings;
pub mod subset;

use std::collections::BTreeSet;

use crate::parser::Stream;
use crate::GlyphId;
use charstring::{CharStringError, UsedSubroutines};
use dict::{top_dict, Dict};
use strings::StringTable;

/// One glyph of a parsed CFF font.
#[derive(Clone, Debug)]
pub struct Glyph<'a> {
    pub gid: GlyphId,
    /// The CID for CID-keyed fonts, the SID of the glyph name otherwise.
    pub id: u16,
    pub charstring: &'a [u8],
    pub font_dict_index: u8,
}

/// A Font DICT: its Private DICT plus local subroutines.
///
/// Non-CID fonts are modeled as owning exactly one.
#[derive(Clone, Default, Debug)]
pub struct FontDict<'a> {
    pub private: Dict,
    pub local_subrs: Vec<&'a [u8]>,
}

/// A parsed CFF (version 1) font.
#[derive(Clone, Debug)]
pub struct CffFont<'a> {
    pub name: String,
    pub is_cid: bool,
    pub top_dict: Dict,
    pub strings: StringTable<'a>,
    pub global_subrs: Vec<&'a [u8]>,
    pub glyphs: Vec<Glyph<'a>>,
    pub font_dicts: Vec<FontDict<'a>>,
}

impl<'a> CffFont<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let mut s = Stream::new(data);

        // Header.
        let major: u8 = s.read()?;
        s.skip::<u8>(); // minor
        let header_size: u8 = s.read()?;
        s.skip::<u8>(); // absolute offset size
        if major != 1 {
            return None;
        }

        let mut s = Stream::new_at(data, usize::from(header_size))?;

        // An OTF-embedded CFF contains exactly one font.
        let name_index = index::parse_index(&mut s)?;
        let [name] = name_index.as_slice() else {
            return None;
        };
        let name = core::str::from_utf8(name).ok()?.to_string();

        let top_dict_index = index::parse_index(&mut s)?;
        let [top_dict_data] = top_dict_index.as_slice() else {
            return None;
        };
        let top_dict = Dict::parse(top_dict_data)?;

        let strings = StringTable::new(index::parse_index(&mut s)?);
        let global_subrs = index::parse_index(&mut s)?;

        // CharstringType defaults to 2; type 1 is long obsolete.
        if let Some(kind) = top_dict.get_int(top_dict::CHARSTRING_TYPE) {
            if kind != 2 {
                return None;
            }
        }

        let charstrings_offset = top_dict.get_offset(top_dict::CHAR_STRINGS)?;
        let mut cs = Stream::new_at(data, charstrings_offset)?;
        let charstrings = index::parse_index(&mut cs)?;
        let number_of_glyphs = u16::try_from(charstrings.len()).ok()?;
        if number_of_glyphs == 0 {
            return None;
        }

        let charset_offset = top_dict.get_offset(top_dict::CHARSET).unwrap_or(0);
        let charset_ids = charset::parse(charset_offset, data, number_of_glyphs)?;

        let is_cid = top_dict.contains(top_dict::ROS);
        let (font_dicts, fd_select) = if is_cid {
            let fd_array_offset = top_dict.get_offset(top_dict::FD_ARRAY)?;
            let mut fs = Stream::new_at(data, fd_array_offset)?;
            let mut font_dicts = Vec::new();
            for fd_data in index::parse_index(&mut fs)? {
                let fd = Dict::parse(fd_data)?;
                font_dicts.push(parse_private(data, &fd)?);
            }

            let fd_select_offset = top_dict.get_offset(top_dict::FD_SELECT)?;
            let fd_select = parse_fd_select(data, fd_select_offset, number_of_glyphs)?;
            (font_dicts, fd_select)
        } else {
            let font_dict = parse_private(data, &top_dict)?;
            (vec![font_dict], vec![0u8; usize::from(number_of_glyphs)])
        };

        let mut glyphs = Vec::with_capacity(charstrings.len());
        for (i, &charstring) in charstrings.iter().enumerate() {
            let font_dict_index = fd_select[i];
            if usize::from(font_dict_index) >= font_dicts.len() {
                return None;
            }

            glyphs.push(Glyph {
                gid: GlyphId(i as u32),
                id: charset_ids.get(i).copied().unwrap_or(0),
                charstring,
                font_dict_index,
            });
        }

        Some(CffFont {
            name,
            is_cid,
            top_dict,
            strings,
            global_subrs,
            glyphs,
            font_dicts,
        })
    }

    pub fn number_of_glyphs(&self) -> u16 {
        self.glyphs.len() as u16
    }

    /// The glyph's PostScript name, for name-keyed fonts.
    pub fn glyph_name(&self, glyph_id: GlyphId) -> Option<&str> {
        if self.is_cid {
            return None;
        }
        let glyph = self.glyphs.get(glyph_id.0 as usize)?;
        self.strings.resolve(glyph.id)
    }

    /// Interprets every used glyph's charstring, collecting the global and
    /// per-Font-DICT local subroutines they reach.
    pub fn mark_used_subroutines(
        &self,
        used: &BTreeSet<GlyphId>,
    ) -> Result<SubroutineUsage, CharStringError> {
        let mut global = BTreeSet::new();
        let mut local = vec![BTreeSet::new(); self.font_dicts.len()];
        for &gid in used {
            let Some(glyph) = self.glyphs.get(gid.0 as usize) else {
                continue;
            };

            let fd = usize::from(glyph.font_dict_index);
            let mut used_subrs = UsedSubroutines {
                global: core::mem::take(&mut global),
                local: core::mem::take(&mut local[fd]),
            };
            charstring::mark_used(
                glyph.charstring,
                &self.global_subrs,
                &self.font_dicts[fd].local_subrs,
                &mut used_subrs,
            )?;
            global = used_subrs.global;
            local[fd] = used_subrs.local;
        }

        Ok(SubroutineUsage { global, local })
    }
}

/// Which subroutine slots the used glyphs reach.
#[derive(Clone, Default, Debug)]
pub struct SubroutineUsage {
    pub global: BTreeSet<usize>,
    pub local: Vec<BTreeSet<usize>>,
}

fn parse_private<'a>(data: &'a [u8], dict: &Dict) -> Option<FontDict<'a>> {
    let Some((size, offset)) = dict.get_size_and_offset(top_dict::PRIVATE) else {
        // A Font DICT without a Private entry is unusual but harmless.
        return Some(FontDict::default());
    };

    let private_data = data.get(offset..offset.checked_add(size)?)?;
    let private = Dict::parse(private_data)?;

    let local_subrs = match private.get_offset(dict::private_dict::SUBRS) {
        Some(subrs_offset) => {
            // Self-relative to the start of the Private DICT.
            let mut s = Stream::new_at(data, offset.checked_add(subrs_offset)?)?;
            index::parse_index(&mut s)?
        }
        None => Vec::new(),
    };

    Some(FontDict {
        private,
        local_subrs,
    })
}

fn parse_fd_select(data: &[u8], offset: usize, number_of_glyphs: u16) -> Option<Vec<u8>> {
    let mut s = Stream::new_at(data, offset)?;
    let format: u8 = s.read()?;
    match format {
        0 => {
            let mut select = Vec::with_capacity(usize::from(number_of_glyphs));
            for _ in 0..number_of_glyphs {
                select.push(s.read::<u8>()?);
            }
            Some(select)
        }
        3 => {
            let range_count: u16 = s.read()?;
            let mut select = vec![0u8; usize::from(number_of_glyphs)];
            let mut first: u16 = s.read()?;
            for _ in 0..range_count {
                let fd: u8 = s.read()?;
                let next: u16 = s.read()?;
                if next < first || next > number_of_glyphs {
                    return None;
                }
                for gid in first..next {
                    select[usize::from(gid)] = fd;
                }
                first = next;
            }
            Some(select)
        }
        _ => None,
    }
}
