//! CMap generation: ToUnicode and the UTF-8 code-to-CID map.

use pdf_writer::types::{SystemInfo, UnicodeCmap};
use pdf_writer::{Name, Str};

use crate::unicode;

const SYSTEM_INFO: SystemInfo = SystemInfo {
    registry: Str(b"Adobe"),
    ordering: Str(b"Identity"),
    supplement: 0,
};

/// Builds a ToUnicode CMap stream.
///
/// Every entry maps a CID to one or more codepoints; codepoints above
/// U+FFFF become surrogate pairs in the bfchar hex strings, ligatures
/// become multi-codepoint entries.
pub fn build_to_unicode(entries: &[(u16, Vec<u32>)]) -> Vec<u8> {
    let mut cmap = UnicodeCmap::<u16>::new(Name(b"Custom"), SYSTEM_INFO);
    for (cid, codepoints) in entries {
        let chars: Vec<char> = codepoints
            .iter()
            .filter_map(|&cp| char::from_u32(cp))
            .collect();
        if !chars.is_empty() {
            cmap.pair_with_multiple(*cid, chars);
        }
    }

    cmap.finish().into_vec()
}

// The four UTF-8 code-space ranges, by sequence length.
const CODE_SPACE_RANGES: &[(&str, &str)] = &[
    ("00", "7F"),
    ("C080", "DFBF"),
    ("E08080", "EFBFBF"),
    ("F0808080", "F7BFBFBF"),
];

/// Builds a CMap stream mapping UTF-8 byte sequences to CIDs.
///
/// Used only when the driver opts into UTF-8 text operators; each glyph's
/// code is the UTF-8 encoding of its representative codepoint.
pub fn build_utf8_cmap(name: &str, entries: &[(u32, u16)]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("%!PS-Adobe-3.0 Resource-CMap\n");
    out.push_str("%%DocumentNeededResources: procset CIDInit\n");
    out.push_str("%%IncludeResource: procset CIDInit\n");
    out.push_str(&format!("%%BeginResource: CMap {}\n", name));
    out.push_str("%%Version: 1\n%%EndComments\n");
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\nbegincmap\n");
    out.push_str("/CIDSystemInfo 3 dict dup begin\n");
    out.push_str("    /Registry (Adobe) def\n");
    out.push_str("    /Ordering (Identity) def\n");
    out.push_str("    /Supplement 0 def\nend def\n");
    out.push_str(&format!("/CMapName /{} def\n", name));
    out.push_str("/CMapVersion 1 def\n/CMapType 1 def\n/WMode 0 def\n");

    out.push_str(&format!("{} begincodespacerange\n", CODE_SPACE_RANGES.len()));
    for (low, high) in CODE_SPACE_RANGES {
        out.push_str(&format!("<{}> <{}>\n", low, high));
    }
    out.push_str("endcodespacerange\n");

    // At most 100 entries per block, like every CMap in the wild.
    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} begincidchar\n", chunk.len()));
        for &(codepoint, cid) in chunk {
            let mut buf = [0u8; 4];
            let Some(len) = unicode::encode_utf8(codepoint, &mut buf) else {
                continue;
            };
            out.push('<');
            for byte in &buf[..len] {
                out.push_str(&format!("{:02X}", byte));
            }
            out.push_str(&format!("> {}\n", cid));
        }
        out.push_str("endcidchar\n");
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n%%EndResource\n%%EOF");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_unicode_covers_surrogates_and_ligatures() {
        let entries = vec![
            (5u16, vec!['A' as u32]),
            (6, vec![0x1D11E]), // musical symbol, needs a surrogate pair
            (7, vec!['f' as u32, 'i' as u32]),
        ];
        let cmap = build_to_unicode(&entries);
        let text = String::from_utf8_lossy(&cmap);
        assert!(text.contains("<0005> <0041>"));
        assert!(text.contains("<0006> <D834DD1E>"));
        assert!(text.contains("<0007> <00660069>"));
        assert!(text.contains("begincodespacerange"));
    }

    #[test]
    fn utf8_cmap_has_all_code_space_ranges() {
        let cmap = build_utf8_cmap("SapUtf8", &[('A' as u32, 1), (0x2014, 2), (0x1F600, 3)]);
        let text = String::from_utf8_lossy(&cmap);
        assert!(text.contains("<00> <7F>"));
        assert!(text.contains("<C080> <DFBF>"));
        assert!(text.contains("<E08080> <EFBFBF>"));
        assert!(text.contains("<F0808080> <F7BFBFBF>"));
        assert!(text.contains("<41> 1"));
        assert!(text.contains("<E28094> 2"));
        assert!(text.contains("<F09F9880> 3"));
    }
}
