//! The text-showing operator stream.
//!
//! Operations accumulate in groups: each group is a (commands, text) pair
//! where the commands hold PDF text-state changes and the text is one `TJ`
//! argument alternating glyph strings with kern-style shifts. Shifts are
//! negated on emission because `TJ` treats positive values as leftward
//! motion.

use pdf_writer::{Content, Name, Str};

/// How glyph codes are written into the string operands.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TextEncoding {
    /// Two-byte CIDs under Identity-H.
    TwoByteCid,
    /// The UTF-8 encoding of each glyph's representative codepoint; only
    /// valid together with the embedded UTF-8 CMap.
    Utf8,
}

/// A text-state command preceding a `TJ` run.
#[derive(Clone, Debug)]
pub enum Command {
    /// `Tf`: select a font resource at a size.
    SetFont { resource: String, size: f32 },
    /// `Td`: move the text position.
    Move { dx: f32, dy: f32 },
    /// `Ts`: set the rise.
    Rise(f32),
}

/// One item of a `TJ` array.
#[derive(Clone, Debug)]
enum TextItem {
    /// Raw glyph codes.
    Glyphs(Vec<u8>),
    /// A positioning shift in thousandths of text space, as reported by
    /// shaping (not yet negated).
    Offset(f32),
}

#[derive(Clone, Default, Debug)]
struct Group {
    commands: Vec<Command>,
    text: Vec<TextItem>,
}

/// Accumulates text-showing operations for one content stream.
#[derive(Clone, Default, Debug)]
pub struct TextStream {
    groups: Vec<Group>,
    encoding: Option<TextEncoding>,
}

impl TextStream {
    pub fn new() -> Self {
        TextStream::default()
    }

    /// Starts a new group with the given state commands.
    pub fn begin_group(&mut self, commands: Vec<Command>) {
        self.groups.push(Group {
            commands,
            text: Vec::new(),
        });
    }

    fn current(&mut self) -> &mut Group {
        if self.groups.is_empty() {
            self.groups.push(Group::default());
        }
        self.groups.last_mut().unwrap()
    }

    /// Appends glyphs, encoded per `encoding`.
    ///
    /// For [`TextEncoding::TwoByteCid`], `codes` are CIDs; for
    /// [`TextEncoding::Utf8`] they are codepoints.
    pub fn show_glyphs(&mut self, encoding: TextEncoding, codes: &[u32]) {
        self.encoding.get_or_insert(encoding);

        let mut bytes = Vec::with_capacity(codes.len() * 2);
        for &code in codes {
            match encoding {
                TextEncoding::TwoByteCid => {
                    bytes.extend_from_slice(&(code as u16).to_be_bytes());
                }
                TextEncoding::Utf8 => {
                    let mut buf = [0u8; 4];
                    if let Some(len) = crate::unicode::encode_utf8(code, &mut buf) {
                        bytes.extend_from_slice(&buf[..len]);
                    }
                }
            }
        }

        let group = self.current();
        match group.text.last_mut() {
            Some(TextItem::Glyphs(existing)) => existing.extend_from_slice(&bytes),
            _ => group.text.push(TextItem::Glyphs(bytes)),
        }
    }

    /// Appends a kern-style shift in thousandths of text space.
    pub fn shift(&mut self, amount: f32) {
        if amount != 0.0 {
            self.current().text.push(TextItem::Offset(amount));
        }
    }

    /// Emits the accumulated groups as a content stream.
    pub fn emit(&self) -> Vec<u8> {
        let mut content = Content::new();
        content.begin_text();
        for group in &self.groups {
            for command in &group.commands {
                match command {
                    Command::SetFont { resource, size } => {
                        content.set_font(Name(resource.as_bytes()), *size);
                    }
                    Command::Move { dx, dy } => {
                        content.next_line(*dx, *dy);
                    }
                    Command::Rise(rise) => {
                        content.set_rise(*rise);
                    }
                }
            }

            if group.text.is_empty() {
                continue;
            }

            let mut positioned = content.show_positioned();
            let mut items = positioned.items();
            for item in &group.text {
                match item {
                    TextItem::Glyphs(bytes) => {
                        items.show(Str(bytes));
                    }
                    // Positive TJ values move left; reported offsets are
                    // rightward, so negate.
                    TextItem::Offset(amount) => {
                        items.adjust(-amount);
                    }
                }
            }
        }
        content.end_text();
        content.finish().into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_negated() {
        let mut stream = TextStream::new();
        stream.begin_group(vec![Command::SetFont {
            resource: "F0".to_string(),
            size: 12.0,
        }]);
        stream.show_glyphs(TextEncoding::TwoByteCid, &[5]);
        stream.shift(50.0);
        stream.show_glyphs(TextEncoding::TwoByteCid, &[6]);

        let bytes = stream.emit();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/F0 12 Tf"));
        assert!(text.contains("-50"));
        assert!(text.contains("TJ"));
    }

    #[test]
    fn consecutive_glyphs_merge_into_one_string() {
        let mut stream = TextStream::new();
        stream.show_glyphs(TextEncoding::TwoByteCid, &[1]);
        stream.show_glyphs(TextEncoding::TwoByteCid, &[2, 3]);
        let bytes = stream.emit();
        // One TJ with one string operand: a single "(" pair.
        let text = String::from_utf8_lossy(&bytes);
        assert_eq!(text.matches("TJ").count(), 1);
    }

    #[test]
    fn utf8_codes() {
        let mut stream = TextStream::new();
        stream.show_glyphs(TextEncoding::Utf8, &[0x41, 0x2014]);
        let bytes = stream.emit();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains('A'));
    }
}
