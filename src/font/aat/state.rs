//! Extended (32-bit) AAT state tables, as used by `morx`.
//!
//! A state machine is a class table (glyph → class), a state array whose
//! rows hold entry indices, and an entry array. Entries carry two extra
//! per-subtable payload words.

use super::lookup::AatLookup;
use crate::parser::Stream;
use crate::GlyphId;

/// Predefined glyph classes.
pub mod class {
    pub const END_OF_TEXT: u16 = 0;
    pub const OUT_OF_BOUNDS: u16 = 1;
    pub const DELETED_GLYPH: u16 = 2;
}

/// Predefined states.
pub mod state {
    pub const START_OF_TEXT: u16 = 0;
}

/// One state-machine transition.
#[derive(Clone, Copy, Default, Debug)]
pub struct Entry {
    pub new_state: u16,
    pub flags: u16,
    /// Subtable-specific payload (e.g. action indices).
    pub extra: [u16; 2],
}

/// An extended state table.
#[derive(Clone, Debug)]
pub struct StateTable<'a> {
    n_classes: u32,
    class_lookup: AatLookup,
    state_array: &'a [u8],
    entry_table: &'a [u8],
}

impl<'a> StateTable<'a> {
    /// Parses the fixed 16-byte STX header and its three sub-arrays.
    pub fn parse(data: &'a [u8], number_of_glyphs: u16) -> Option<Self> {
        let mut s = Stream::new(data);
        let n_classes: u32 = s.read()?;
        let class_table_offset: u32 = s.read()?;
        let state_array_offset: u32 = s.read()?;
        let entry_table_offset: u32 = s.read()?;

        if n_classes == 0 {
            return None;
        }

        let class_lookup = AatLookup::parse(
            data.get(usize::try_from(class_table_offset).ok()?..)?,
            number_of_glyphs,
        )?;

        Some(StateTable {
            n_classes,
            class_lookup,
            state_array: data.get(usize::try_from(state_array_offset).ok()?..)?,
            entry_table: data.get(usize::try_from(entry_table_offset).ok()?..)?,
        })
    }

    /// The glyph's class; unmapped glyphs are out-of-bounds.
    pub fn class_of(&self, glyph: GlyphId) -> u16 {
        self.class_lookup
            .value(glyph)
            .unwrap_or(class::OUT_OF_BOUNDS)
    }

    /// Resolves the transition for `(state, class)`.
    pub fn entry(&self, state: u16, class: u16) -> Option<Entry> {
        let class = if u32::from(class) >= self.n_classes {
            class::OUT_OF_BOUNDS
        } else {
            class
        };

        let row = usize::from(state) * usize::try_from(self.n_classes).ok()? * 2;
        let entry_index: u16 =
            Stream::read_at(self.state_array, row + usize::from(class) * 2)?;

        // Entries are 8 bytes: newState, flags, and two payload words.
        let mut s = Stream::new_at(self.entry_table, usize::from(entry_index) * 8)?;
        Some(Entry {
            new_state: s.read()?,
            flags: s.read()?,
            extra: [s.read()?, s.read()?],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    // One class (glyph 5 -> class 4), two states; in state 0 class 4 maps
    // to entry 1 which jumps to state 1.
    fn build() -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(5); // nClasses
        w.write_u32(16); // class table offset
        w.write_u32(16 + 10); // state array offset
        w.write_u32(16 + 10 + 20); // entry table offset

        // Class table: lookup format 8.
        w.write_u16(8);
        w.write_u16(5); // first
        w.write_u16(1); // count
        w.write_u16(4); // class of glyph 5
        w.write_u16(0); // padding to offset 26

        // State array: 2 rows x 5 classes.
        for class in 0..5u16 {
            w.write_u16(if class == 4 { 1 } else { 0 });
        }
        for _ in 0..5u16 {
            w.write_u16(0);
        }

        // Entry table: entry 0 stays, entry 1 moves to state 1.
        w.write_u16(0);
        w.write_u16(0);
        w.write_u16(0);
        w.write_u16(0);
        w.write_u16(1); // new state
        w.write_u16(0x8000); // flags
        w.write_u16(7); // payload
        w.write_u16(9);
        w.finish()
    }

    #[test]
    fn transitions() {
        let data = build();
        let table = StateTable::parse(&data, 10).unwrap();
        assert_eq!(table.class_of(GlyphId(5)), 4);
        assert_eq!(table.class_of(GlyphId(6)), class::OUT_OF_BOUNDS);

        let entry = table.entry(state::START_OF_TEXT, 4).unwrap();
        assert_eq!(entry.new_state, 1);
        assert_eq!(entry.flags, 0x8000);
        assert_eq!(entry.extra, [7, 9]);
    }
}
