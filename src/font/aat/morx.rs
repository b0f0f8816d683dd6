//! The `morx` extended metamorphosis table.
//!
//! Chains run in order; within a chain, each subtable whose feature flags
//! survive the selector matching runs its state machine (or lookup) over
//! the glyph string.

use crate::font::aat::lookup::AatLookup;
use crate::font::aat::state::{class, state, StateTable};
use crate::font::layout::ShapedGlyph;
use crate::parser::Stream;
use crate::GlyphId;

// Apple's deleted-glyph marker; filtered out after every subtable run.
const DELETED: GlyphId = GlyphId(0xFFFF);

const DONT_ADVANCE: u16 = 0x4000;

/// A feature selector requested by the caller.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AatFeature {
    pub kind: u16,
    pub setting: u16,
}

#[derive(Clone, Copy, Debug)]
struct FeatureEntry {
    kind: u16,
    setting: u16,
    enable_flags: u32,
    disable_flags: u32,
}

#[derive(Clone, Debug)]
enum SubtableKind<'a> {
    Rearrangement(StateTable<'a>),
    Contextual(StateTable<'a>, &'a [u8]),
    Ligature {
        machine: StateTable<'a>,
        actions: &'a [u8],
        components: &'a [u8],
        ligatures: &'a [u8],
    },
    NonContextual(AatLookup),
    Insertion(StateTable<'a>, &'a [u8]),
}

#[derive(Clone, Debug)]
struct Subtable<'a> {
    kind: SubtableKind<'a>,
    feature_flags: u32,
    vertical_only: bool,
}

#[derive(Clone, Debug)]
struct Chain<'a> {
    default_flags: u32,
    features: Vec<FeatureEntry>,
    subtables: Vec<Subtable<'a>>,
}

/// The parsed `morx` table.
#[derive(Clone, Debug)]
pub struct MorxTable<'a> {
    chains: Vec<Chain<'a>>,
}

impl<'a> MorxTable<'a> {
    pub fn parse(data: &'a [u8], number_of_glyphs: u16) -> Option<Self> {
        let mut s = Stream::new(data);
        let version: u16 = s.read()?;
        s.skip::<u16>(); // unused
        if !(2..=3).contains(&version) {
            return None;
        }

        let chain_count: u32 = s.read()?;
        let mut chains = Vec::with_capacity(chain_count as usize);
        for _ in 0..chain_count {
            let chain_start = s.offset();
            let default_flags: u32 = s.read()?;
            let chain_length: u32 = s.read()?;
            let feature_count: u32 = s.read()?;
            let subtable_count: u32 = s.read()?;

            let mut features = Vec::with_capacity(feature_count as usize);
            for _ in 0..feature_count {
                features.push(FeatureEntry {
                    kind: s.read()?,
                    setting: s.read()?,
                    enable_flags: s.read()?,
                    disable_flags: s.read()?,
                });
            }

            let mut subtables = Vec::with_capacity(subtable_count as usize);
            for _ in 0..subtable_count {
                let subtable_start = s.offset();
                let length: u32 = s.read()?;
                let coverage: u32 = s.read()?;
                let feature_flags: u32 = s.read()?;
                let payload_start = s.offset();
                let payload_end = subtable_start.checked_add(length as usize)?;
                let payload = data.get(payload_start..payload_end)?;

                let vertical_only =
                    coverage & 0x8000_0000 != 0 && coverage & 0x2000_0000 == 0;

                if let Some(kind) = parse_subtable(coverage, payload, number_of_glyphs) {
                    subtables.push(Subtable {
                        kind,
                        feature_flags,
                        vertical_only,
                    });
                }

                s = Stream::new_at(data, payload_end)?;
            }

            chains.push(Chain {
                default_flags,
                features,
                subtables,
            });

            s = Stream::new_at(data, chain_start.checked_add(chain_length as usize)?)?;
        }

        Some(MorxTable { chains })
    }

    /// Runs every enabled chain subtable over the glyph string.
    pub fn apply(&self, mut glyphs: Vec<ShapedGlyph>, enabled: &[AatFeature]) -> Vec<ShapedGlyph> {
        for chain in &self.chains {
            let mut flags = chain.default_flags;
            for feature in &chain.features {
                let requested = enabled
                    .iter()
                    .any(|f| f.kind == feature.kind && f.setting == feature.setting);
                if requested {
                    flags &= feature.disable_flags;
                    flags |= feature.enable_flags;
                }
            }

            for subtable in &chain.subtables {
                if subtable.feature_flags & flags == 0 || subtable.vertical_only {
                    continue;
                }

                match &subtable.kind {
                    SubtableKind::Rearrangement(machine) => {
                        run_rearrangement(machine, &mut glyphs);
                    }
                    SubtableKind::Contextual(machine, substitutions) => {
                        run_contextual(machine, substitutions, &mut glyphs);
                    }
                    SubtableKind::Ligature {
                        machine,
                        actions,
                        components,
                        ligatures,
                    } => {
                        run_ligature(machine, actions, components, ligatures, &mut glyphs);
                    }
                    SubtableKind::NonContextual(lookup) => {
                        for glyph in glyphs.iter_mut() {
                            if let Some(new) = lookup.value(glyph.gid) {
                                glyph.gid = GlyphId::from(new);
                            }
                        }
                    }
                    SubtableKind::Insertion(machine, insertions) => {
                        run_insertion(machine, insertions, &mut glyphs);
                    }
                }

                glyphs.retain(|g| g.gid != DELETED);
            }
        }

        glyphs
    }
}

fn parse_subtable<'a>(
    coverage: u32,
    payload: &'a [u8],
    number_of_glyphs: u16,
) -> Option<SubtableKind<'a>> {
    match coverage & 0xFF {
        0 => Some(SubtableKind::Rearrangement(StateTable::parse(
            payload,
            number_of_glyphs,
        )?)),
        1 => {
            let machine = StateTable::parse(payload, number_of_glyphs)?;
            let substitution_offset: u32 = Stream::read_at(payload, 16)?;
            let substitutions = payload.get(substitution_offset as usize..)?;
            Some(SubtableKind::Contextual(machine, substitutions))
        }
        2 => {
            let machine = StateTable::parse(payload, number_of_glyphs)?;
            let action_offset: u32 = Stream::read_at(payload, 16)?;
            let component_offset: u32 = Stream::read_at(payload, 20)?;
            let ligature_offset: u32 = Stream::read_at(payload, 24)?;
            Some(SubtableKind::Ligature {
                machine,
                actions: payload.get(action_offset as usize..)?,
                components: payload.get(component_offset as usize..)?,
                ligatures: payload.get(ligature_offset as usize..)?,
            })
        }
        4 => Some(SubtableKind::NonContextual(AatLookup::parse(
            payload,
            number_of_glyphs,
        )?)),
        5 => {
            let machine = StateTable::parse(payload, number_of_glyphs)?;
            let insertion_offset: u32 = Stream::read_at(payload, 16)?;
            Some(SubtableKind::Insertion(
                machine,
                payload.get(insertion_offset as usize..)?,
            ))
        }
        other => {
            log::warn!("unknown morx subtable type {}", other);
            None
        }
    }
}

// Shared driver: walks the string (plus the end-of-text pseudo-glyph)
// through the machine, delegating entry effects to `act`.
fn run_machine(
    machine: &StateTable,
    glyphs_len: impl Fn() -> usize,
    class_at: impl Fn(usize) -> u16,
    mut act: impl FnMut(crate::font::aat::state::Entry, usize),
) {
    let mut current_state = state::START_OF_TEXT;
    let mut pos = 0usize;
    // A malformed machine could ping-pong on dontAdvance; bound the walk.
    let mut fuel = glyphs_len() * 4 + 64;

    while pos <= glyphs_len() && fuel > 0 {
        fuel -= 1;
        let glyph_class = if pos == glyphs_len() {
            class::END_OF_TEXT
        } else {
            class_at(pos)
        };

        let Some(entry) = machine.entry(current_state, glyph_class) else {
            return;
        };

        act(entry, pos);
        current_state = entry.new_state;
        if entry.flags & DONT_ADVANCE == 0 {
            pos += 1;
        }
    }
}

fn class_of(machine: &StateTable, glyph: &ShapedGlyph) -> u16 {
    if glyph.gid == DELETED {
        class::DELETED_GLYPH
    } else {
        machine.class_of(glyph.gid)
    }
}

fn run_rearrangement(machine: &StateTable, glyphs: &mut [ShapedGlyph]) {
    const MARK_FIRST: u16 = 0x8000;
    const MARK_LAST: u16 = 0x2000;
    const VERB_MASK: u16 = 0x000F;

    let mut first = 0usize;
    let mut last = 0usize;
    let len = glyphs.len();
    let mut ops: Vec<(usize, usize, u16)> = Vec::new();
    run_machine(
        machine,
        || len,
        |i| class_of(machine, &glyphs[i]),
        |entry, pos| {
            if entry.flags & MARK_FIRST != 0 {
                first = pos;
            }
            if entry.flags & MARK_LAST != 0 {
                last = pos;
            }
            let verb = entry.flags & VERB_MASK;
            if verb != 0 && first <= last && last < len {
                ops.push((first, last, verb));
            }
        },
    );

    for (first, last, verb) in ops {
        rearrange(&mut glyphs[first..=last], verb);
    }
}

// The sixteen rearrangement verbs; x stands for the middle glyphs.
fn rearrange(range: &mut [ShapedGlyph], verb: u16) {
    let n = range.len();
    if n < 2 {
        return;
    }

    match verb {
        1 => range.rotate_left(1),       // Ax -> xA
        2 => range.rotate_right(1),      // xD -> Dx
        3 => {                           // AxD -> DxA
            range.swap(0, n - 1);
        }
        4 if n >= 2 => range.rotate_left(2), // ABx -> xAB
        5 if n >= 2 => {                     // ABx -> xBA
            range.swap(0, 1);
            range.rotate_left(2);
        }
        6 if n >= 2 => range.rotate_right(2), // xCD -> CDx
        7 if n >= 2 => {                      // xCD -> DCx
            range.swap(n - 2, n - 1);
            range.rotate_right(2);
        }
        8..=15 if n >= 3 => {
            // The AB/CD combinations all exchange the end groups around
            // the fixed middle; the wider verbs move two glyphs per end.
            range.swap(0, n - 1);
            if n >= 4 && matches!(verb, 12..=15) {
                range.swap(1, n - 2);
            }
        }
        _ => {}
    }
}

fn run_contextual(machine: &StateTable, substitutions: &[u8], glyphs: &mut [ShapedGlyph]) {
    const SET_MARK: u16 = 0x8000;

    let len = glyphs.len();
    let mut marked = 0usize;
    let mut ops: Vec<(usize, u16)> = Vec::new();

    {
        let glyphs_ref: &[ShapedGlyph] = glyphs;
        run_machine(
            machine,
            || len,
            |i| class_of(machine, &glyphs_ref[i]),
            |entry, pos| {
                let mark_index = entry.extra[0];
                let current_index = entry.extra[1];
                if mark_index != 0xFFFF && marked < len {
                    ops.push((marked, mark_index));
                }
                if current_index != 0xFFFF && pos < len {
                    ops.push((pos, current_index));
                }
                if entry.flags & SET_MARK != 0 {
                    marked = pos;
                }
            },
        );
    }

    for (pos, table_index) in ops {
        let Some(new) = contextual_lookup(substitutions, table_index, glyphs[pos].gid) else {
            continue;
        };
        glyphs[pos].gid = new;
    }
}

fn contextual_lookup(substitutions: &[u8], table_index: u16, glyph: GlyphId) -> Option<GlyphId> {
    let offset: u32 = Stream::read_at(substitutions, usize::from(table_index) * 4)?;
    let lookup_data = substitutions.get(offset as usize..)?;
    // Per-table parse is cheap relative to how rarely contextual
    // substitution fires.
    let lookup = AatLookup::parse(lookup_data, u16::MAX)?;
    lookup.value(glyph).map(GlyphId::from)
}

fn run_ligature(
    machine: &StateTable,
    actions: &[u8],
    components: &[u8],
    ligatures: &[u8],
    glyphs: &mut Vec<ShapedGlyph>,
) {
    const SET_COMPONENT: u16 = 0x8000;
    const PERFORM_ACTION: u16 = 0x2000;
    const LAST: u32 = 0x8000_0000;
    const STORE: u32 = 0x4000_0000;

    let len = glyphs.len();
    let mut stack: Vec<usize> = Vec::new();
    // (positions consumed, ligature glyph) applied after the walk.
    let mut ligature_ops: Vec<(Vec<usize>, GlyphId)> = Vec::new();

    {
        let glyphs_ref: &[ShapedGlyph] = glyphs;
        run_machine(
            machine,
            || len,
            |i| class_of(machine, &glyphs_ref[i]),
            |entry, pos| {
                if entry.flags & SET_COMPONENT != 0 && pos < len {
                    stack.push(pos);
                }

                if entry.flags & PERFORM_ACTION != 0 {
                    let mut action_index = usize::from(entry.extra[0]);
                    let mut accumulated = 0i64;
                    let mut consumed: Vec<usize> = Vec::new();

                    loop {
                        let Some(action) = Stream::read_at::<u32>(actions, action_index * 4)
                        else {
                            return;
                        };
                        action_index += 1;

                        let Some(component_pos) = stack.pop() else { break };
                        consumed.push(component_pos);

                        // Sign-extend the 30-bit offset.
                        let mut offset = (action & 0x3FFF_FFFF) as i64;
                        if offset & 0x2000_0000 != 0 {
                            offset -= 0x4000_0000;
                        }

                        let glyph = glyphs_ref[component_pos].gid.0 as i64;
                        let component_index = glyph + offset;
                        let Ok(component_index) = usize::try_from(component_index) else {
                            break;
                        };
                        let Some(component) =
                            Stream::read_at::<u16>(components, component_index * 2)
                        else {
                            break;
                        };
                        accumulated += i64::from(component);

                        if action & (LAST | STORE) != 0 {
                            let Ok(ligature_index) = usize::try_from(accumulated) else {
                                break;
                            };
                            let Some(ligature) =
                                Stream::read_at::<u16>(ligatures, ligature_index * 2)
                            else {
                                break;
                            };
                            consumed.sort_unstable();
                            ligature_ops
                                .push((core::mem::take(&mut consumed), GlyphId::from(ligature)));
                            break;
                        }
                    }
                }
            },
        );
    }

    for (positions, ligature) in ligature_ops {
        let Some((&first, rest)) = positions.split_first() else {
            continue;
        };

        let mut codepoints = core::mem::take(&mut glyphs[first].codepoints);
        for &pos in rest {
            codepoints.extend(core::mem::take(&mut glyphs[pos].codepoints));
            glyphs[pos].gid = DELETED;
        }
        glyphs[first] = ShapedGlyph {
            gid: ligature,
            codepoints,
        };
    }
}

fn run_insertion(machine: &StateTable, insertions: &[u8], glyphs: &mut Vec<ShapedGlyph>) {
    const CURRENT_INSERT_BEFORE: u16 = 0x0800;
    const CURRENT_INSERT_COUNT: u16 = 0x03E0;
    const MARKED_INSERT_COUNT: u16 = 0x001F;

    let len = glyphs.len();
    let mut warned = false;
    // (insert position, glyph ids)
    let mut ops: Vec<(usize, Vec<GlyphId>)> = Vec::new();

    {
        let glyphs_ref: &[ShapedGlyph] = glyphs;
        run_machine(
            machine,
            || len,
            |i| class_of(machine, &glyphs_ref[i]),
            |entry, pos| {
                let current_count = usize::from((entry.flags & CURRENT_INSERT_COUNT) >> 5);
                let marked_count = usize::from(entry.flags & MARKED_INSERT_COUNT);
                if marked_count != 0 && !warned {
                    // The marked-insertion path has unresolved edge cases;
                    // skip it rather than guess.
                    log::warn!("morx marked-glyph insertion is not applied");
                    warned = true;
                }

                if current_count != 0 && entry.extra[0] != 0xFFFF {
                    let mut inserted = Vec::with_capacity(current_count);
                    for i in 0..current_count {
                        let Some(gid) = Stream::read_at::<u16>(
                            insertions,
                            (usize::from(entry.extra[0]) + i) * 2,
                        ) else {
                            break;
                        };
                        inserted.push(GlyphId::from(gid));
                    }

                    let at = if entry.flags & CURRENT_INSERT_BEFORE != 0 {
                        pos
                    } else {
                        (pos + 1).min(len)
                    };
                    ops.push((at, inserted));
                }
            },
        );
    }

    // Apply from the back so earlier indices stay valid.
    for (at, inserted) in ops.into_iter().rev() {
        let items = inserted.into_iter().map(|gid| ShapedGlyph {
            gid,
            codepoints: Vec::new(),
        });
        glyphs.splice(at..at, items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    // A morx with one chain holding a single non-contextual subtable that
    // maps glyph 4 -> 9, enabled by default flags.
    fn noncontextual_morx() -> Vec<u8> {
        let mut lookup = Writer::new();
        lookup.write_u16(6); // lookup format 6
        lookup.write_u16(4); // unitSize
        lookup.write_u16(1); // nUnits
        lookup.write_zeros(6);
        lookup.write_u16(4); // glyph
        lookup.write_u16(9); // replacement

        let subtable_len = 12 + lookup.len();
        let chain_len = 16 + subtable_len;

        let mut w = Writer::new();
        w.write_u16(2); // version
        w.write_u16(0);
        w.write_u32(1); // one chain
        w.write_u32(1); // defaultFlags
        w.write_u32(chain_len as u32);
        w.write_u32(0); // no features
        w.write_u32(1); // one subtable
        w.write_u32(subtable_len as u32);
        w.write_u32(4); // coverage: non-contextual, horizontal
        w.write_u32(1); // subFeatureFlags
        w.write_bytes(lookup.data());
        w.finish()
    }

    #[test]
    fn noncontextual_substitution() {
        let data = noncontextual_morx();
        let morx = MorxTable::parse(&data, 16).unwrap();
        let glyphs = vec![
            ShapedGlyph::new(GlyphId(4), 'a' as u32),
            ShapedGlyph::new(GlyphId(5), 'b' as u32),
        ];
        let out = morx.apply(glyphs, &[]);
        assert_eq!(out[0].gid, GlyphId(9));
        assert_eq!(out[0].codepoints, ['a' as u32]);
        assert_eq!(out[1].gid, GlyphId(5));
    }

    #[test]
    fn disabled_by_feature_flags() {
        let mut data = noncontextual_morx();
        // Zero the chain's default flags; nothing requests the feature.
        data[8..12].copy_from_slice(&0u32.to_be_bytes());
        let morx = MorxTable::parse(&data, 16).unwrap();
        let glyphs = vec![ShapedGlyph::new(GlyphId(4), 'a' as u32)];
        let out = morx.apply(glyphs, &[]);
        assert_eq!(out[0].gid, GlyphId(4));
    }
}
