//! A Type-2 CharString interpreter.
//!
//! This machine never rasterizes. It exists to
//! (a) track the stem count so `hintmask`/`cntrmask` operand widths are
//!     decoded correctly,
//! (b) follow `callsubr`/`callgsubr` with the subroutine bias, and
//! (c) mark every visited global/local subroutine as used, so subsetting
//!     can blank the rest.

use std::collections::BTreeSet;

// Limits per Adobe TN #5177 Appendix B.
const STACK_LIMIT: u8 = 10;
const MAX_ARGUMENTS_STACK_LEN: usize = 48;

mod operator {
    pub const HORIZONTAL_STEM: u8 = 1;
    pub const VERTICAL_STEM: u8 = 3;
    pub const VERTICAL_MOVE_TO: u8 = 4;
    pub const LINE_TO: u8 = 5;
    pub const HORIZONTAL_LINE_TO: u8 = 6;
    pub const VERTICAL_LINE_TO: u8 = 7;
    pub const CURVE_TO: u8 = 8;
    pub const CALL_LOCAL_SUBROUTINE: u8 = 10;
    pub const RETURN: u8 = 11;
    pub const TWO_BYTE_OPERATOR_MARK: u8 = 12;
    pub const ENDCHAR: u8 = 14;
    pub const HORIZONTAL_STEM_HINT_MASK: u8 = 18;
    pub const HINT_MASK: u8 = 19;
    pub const COUNTER_MASK: u8 = 20;
    pub const MOVE_TO: u8 = 21;
    pub const HORIZONTAL_MOVE_TO: u8 = 22;
    pub const VERTICAL_STEM_HINT_MASK: u8 = 23;
    pub const CURVE_LINE: u8 = 24;
    pub const LINE_CURVE: u8 = 25;
    pub const VV_CURVE_TO: u8 = 26;
    pub const HH_CURVE_TO: u8 = 27;
    pub const SHORT_INT: u8 = 28;
    pub const CALL_GLOBAL_SUBROUTINE: u8 = 29;
    pub const VH_CURVE_TO: u8 = 30;
    pub const HV_CURVE_TO: u8 = 31;
    pub const FIXED_16_16: u8 = 255;
}

mod two_byte_operator {
    pub const AND: u8 = 3;
    pub const OR: u8 = 4;
    pub const NOT: u8 = 5;
    pub const ABS: u8 = 9;
    pub const ADD: u8 = 10;
    pub const SUB: u8 = 11;
    pub const DIV: u8 = 12;
    pub const NEG: u8 = 14;
    pub const EQ: u8 = 15;
    pub const DROP: u8 = 18;
    pub const PUT: u8 = 20;
    pub const GET: u8 = 21;
    pub const IFELSE: u8 = 22;
    pub const RANDOM: u8 = 23;
    pub const MUL: u8 = 24;
    pub const SQRT: u8 = 26;
    pub const DUP: u8 = 27;
    pub const EXCH: u8 = 28;
    pub const INDEX: u8 = 29;
    pub const ROLL: u8 = 30;
    pub const HFLEX: u8 = 34;
    pub const FLEX: u8 = 35;
    pub const HFLEX1: u8 = 36;
    pub const FLEX1: u8 = 37;
}

/// A list of errors that can occur during CharString interpretation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CharStringError {
    #[error("read out of bounds")]
    ReadOutOfBounds,
    #[error("invalid operator")]
    InvalidOperator,
    #[error("subroutine nesting limit reached")]
    NestingLimitReached,
    #[error("arguments stack limit reached")]
    ArgumentsStackLimitReached,
    #[error("invalid subroutine index")]
    InvalidSubroutineIndex,
}

/// The subroutines a glyph's charstring (transitively) calls.
#[derive(Clone, Default, Debug)]
pub struct UsedSubroutines {
    pub global: BTreeSet<usize>,
    pub local: BTreeSet<usize>,
}

/// The index bias applied to subroutine call operands.
pub fn subroutine_bias(len: usize) -> i32 {
    if len < 1240 {
        107
    } else if len < 33900 {
        1131
    } else {
        32768
    }
}

/// Interprets `charstring`, collecting the used subroutines into `used`.
pub fn mark_used(
    charstring: &[u8],
    global_subrs: &[&[u8]],
    local_subrs: &[&[u8]],
    used: &mut UsedSubroutines,
) -> Result<(), CharStringError> {
    let mut machine = Machine {
        global_subrs,
        local_subrs,
        stack: Vec::with_capacity(MAX_ARGUMENTS_STACK_LEN),
        stems: 0,
        used,
    };
    machine.execute(charstring, 0)
}

struct Machine<'a, 'b> {
    global_subrs: &'a [&'a [u8]],
    local_subrs: &'a [&'a [u8]],
    stack: Vec<f64>,
    stems: u32,
    used: &'b mut UsedSubroutines,
}

impl Machine<'_, '_> {
    fn push(&mut self, value: f64) -> Result<(), CharStringError> {
        if self.stack.len() == MAX_ARGUMENTS_STACK_LEN {
            return Err(CharStringError::ArgumentsStackLimitReached);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> f64 {
        self.stack.pop().unwrap_or(0.0)
    }

    fn execute(&mut self, charstring: &[u8], depth: u8) -> Result<(), CharStringError> {
        use operator::*;

        if depth == STACK_LIMIT {
            return Err(CharStringError::NestingLimitReached);
        }

        let mut i = 0usize;
        while i < charstring.len() {
            let b0 = charstring[i];
            i += 1;
            match b0 {
                HORIZONTAL_STEM | VERTICAL_STEM | HORIZONTAL_STEM_HINT_MASK
                | VERTICAL_STEM_HINT_MASK => {
                    self.stems += self.stack.len() as u32 / 2;
                    self.stack.clear();
                }
                HINT_MASK | COUNTER_MASK => {
                    // Leftover arguments are an implicit vstem header.
                    self.stems += self.stack.len() as u32 / 2;
                    self.stack.clear();
                    let mask_len = usize::try_from((self.stems + 7) / 8).unwrap_or(0);
                    i = i
                        .checked_add(mask_len)
                        .filter(|&n| n <= charstring.len())
                        .ok_or(CharStringError::ReadOutOfBounds)?;
                }
                VERTICAL_MOVE_TO | LINE_TO | HORIZONTAL_LINE_TO | VERTICAL_LINE_TO
                | CURVE_TO | MOVE_TO | HORIZONTAL_MOVE_TO | CURVE_LINE | LINE_CURVE
                | VV_CURVE_TO | HH_CURVE_TO | VH_CURVE_TO | HV_CURVE_TO => {
                    self.stack.clear();
                }
                CALL_LOCAL_SUBROUTINE => {
                    let bias = subroutine_bias(self.local_subrs.len());
                    let index = conv_subroutine_index(self.pop(), bias)?;
                    if index >= self.local_subrs.len() {
                        return Err(CharStringError::InvalidSubroutineIndex);
                    }
                    if self.used.local.insert(index) {
                        self.execute(self.local_subrs[index], depth + 1)?;
                    }
                }
                CALL_GLOBAL_SUBROUTINE => {
                    let bias = subroutine_bias(self.global_subrs.len());
                    let index = conv_subroutine_index(self.pop(), bias)?;
                    if index >= self.global_subrs.len() {
                        return Err(CharStringError::InvalidSubroutineIndex);
                    }
                    if self.used.global.insert(index) {
                        self.execute(self.global_subrs[index], depth + 1)?;
                    }
                }
                RETURN => return Ok(()),
                ENDCHAR => {
                    self.stack.clear();
                    return Ok(());
                }
                TWO_BYTE_OPERATOR_MARK => {
                    let b1 = *charstring.get(i).ok_or(CharStringError::ReadOutOfBounds)?;
                    i += 1;
                    self.two_byte_operator(b1)?;
                }
                SHORT_INT => {
                    let bytes = charstring
                        .get(i..i + 2)
                        .ok_or(CharStringError::ReadOutOfBounds)?;
                    i += 2;
                    self.push(f64::from(i16::from_be_bytes([bytes[0], bytes[1]])))?;
                }
                32..=246 => self.push(f64::from(i32::from(b0) - 139))?,
                247..=250 => {
                    let b1 = *charstring.get(i).ok_or(CharStringError::ReadOutOfBounds)?;
                    i += 1;
                    self.push(f64::from(
                        (i32::from(b0) - 247) * 256 + i32::from(b1) + 108,
                    ))?;
                }
                251..=254 => {
                    let b1 = *charstring.get(i).ok_or(CharStringError::ReadOutOfBounds)?;
                    i += 1;
                    self.push(f64::from(
                        -(i32::from(b0) - 251) * 256 - i32::from(b1) - 108,
                    ))?;
                }
                FIXED_16_16 => {
                    let bytes = charstring
                        .get(i..i + 4)
                        .ok_or(CharStringError::ReadOutOfBounds)?;
                    i += 4;
                    let n = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    self.push(f64::from(n) / 65536.0)?;
                }
                _ => return Err(CharStringError::InvalidOperator),
            }
        }

        Ok(())
    }

    fn two_byte_operator(&mut self, b1: u8) -> Result<(), CharStringError> {
        use two_byte_operator::*;

        match b1 {
            HFLEX | FLEX | HFLEX1 | FLEX1 => self.stack.clear(),
            AND | OR | ADD | SUB | MUL | EQ => {
                let (b, a) = (self.pop(), self.pop());
                let r = match b1 {
                    AND => f64::from(a != 0.0 && b != 0.0),
                    OR => f64::from(a != 0.0 || b != 0.0),
                    ADD => a + b,
                    SUB => a - b,
                    MUL => a * b,
                    _ => f64::from(a == b),
                };
                self.push(r)?;
            }
            DIV => {
                let (b, a) = (self.pop(), self.pop());
                self.push(if b != 0.0 { a / b } else { 0.0 })?;
            }
            NOT => {
                let a = self.pop();
                self.push(f64::from(a == 0.0))?;
            }
            ABS => {
                let a = self.pop();
                self.push(a.abs())?;
            }
            NEG => {
                let a = self.pop();
                self.push(-a)?;
            }
            SQRT => {
                let a = self.pop();
                self.push(a.max(0.0).sqrt())?;
            }
            DROP => {
                self.pop();
            }
            PUT => {
                self.pop();
                self.pop();
            }
            GET => {
                // The transient array is not modeled; indices are not
                // meaningful to subroutine resolution.
                self.pop();
                self.push(0.0)?;
            }
            IFELSE => {
                let (v2, v1) = (self.pop(), self.pop());
                let (s2, s1) = (self.pop(), self.pop());
                self.push(if v1 <= v2 { s1 } else { s2 })?;
            }
            RANDOM => self.push(0.5)?,
            DUP => {
                let a = self.pop();
                self.push(a)?;
                self.push(a)?;
            }
            EXCH => {
                let (b, a) = (self.pop(), self.pop());
                self.push(b)?;
                self.push(a)?;
            }
            INDEX => {
                let n = self.pop();
                let idx = if n < 0.0 { 0 } else { n as usize };
                let value = if idx < self.stack.len() {
                    self.stack[self.stack.len() - 1 - idx]
                } else {
                    0.0
                };
                self.push(value)?;
            }
            ROLL => {
                // Pop the two control operands; the remaining stack is
                // left untouched.
                self.pop();
                self.pop();
            }
            _ => return Err(CharStringError::InvalidOperator),
        }

        Ok(())
    }
}

fn conv_subroutine_index(value: f64, bias: i32) -> Result<usize, CharStringError> {
    let index = value as i32 + bias;
    usize::try_from(index).map_err(|_| CharStringError::InvalidSubroutineIndex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(cs: &[u8], global: &[&[u8]], local: &[&[u8]]) -> Result<UsedSubroutines, CharStringError> {
        let mut used = UsedSubroutines::default();
        mark_used(cs, global, local, &mut used)?;
        Ok(used)
    }

    #[test]
    fn bias_values() {
        assert_eq!(subroutine_bias(0), 107);
        assert_eq!(subroutine_bias(1239), 107);
        assert_eq!(subroutine_bias(1240), 1131);
        assert_eq!(subroutine_bias(33899), 1131);
        assert_eq!(subroutine_bias(33900), 32768);
    }

    #[test]
    fn marks_transitive_subroutines() {
        // gsubr 0 calls gsubr 1; the glyph calls gsubr 0 and a local subr.
        let gsubr1: &[u8] = &[11]; // return
        let gsubr0: &[u8] = &[33, 29, 11]; // push -106, callgsubr(-106+107=1), return
        let local0: &[u8] = &[11];
        let glyph = &[
            139 - 107, 29, // push -107 -> gsubr 0
            139 - 107, 10, // push -107 -> local 0
            14, // endchar
        ];

        let used = run(glyph, &[gsubr0, gsubr1], &[local0]).unwrap();
        assert_eq!(used.global.iter().copied().collect::<Vec<_>>(), [0, 1]);
        assert_eq!(used.local.iter().copied().collect::<Vec<_>>(), [0]);
    }

    #[test]
    fn hintmask_consumes_stem_bytes() {
        // 9 stems: 3 from hstem, 6 from the two-byte-per-stem vstem header
        // implicit in hintmask; mask is (9+7)/8 = 2 bytes.
        let glyph = &[
            139, 140, 141, 142, 143, 144, 1, // hstem, 3 stems
            139, 140, 141, 142, 143, 144, 145, 146, 147, 148, 149, 150, // 12 args
            19, 0xFF, 0xFF, // hintmask + 2 mask bytes
            14,
        ];
        assert!(run(glyph, &[], &[]).is_ok());
    }

    #[test]
    fn truncated_hintmask_is_an_error() {
        let glyph = &[139, 140, 1, 19]; // mask byte missing
        assert_eq!(run(glyph, &[], &[]), Err(CharStringError::ReadOutOfBounds));
    }

    #[test]
    fn stack_overflow_is_an_error() {
        let mut glyph = vec![139u8; MAX_ARGUMENTS_STACK_LEN + 1];
        glyph.push(14);
        assert_eq!(
            run(&glyph, &[], &[]),
            Err(CharStringError::ArgumentsStackLimitReached)
        );
    }

    #[test]
    fn unbounded_recursion_is_an_error() {
        // subr 0 calls itself; the used-set guard keeps it from being
        // followed twice, so build a chain longer than the nesting limit.
        let subrs: Vec<Vec<u8>> = (0..12)
            .map(|i| vec![(i + 1 - 107i32 + 139) as u8, 10, 11])
            .collect();
        let subr_refs: Vec<&[u8]> = subrs.iter().map(|s| s.as_slice()).collect();
        let glyph = &[139 - 107, 10, 14];
        assert_eq!(
            run(glyph, &[], &subr_refs),
            Err(CharStringError::NestingLimitReached)
        );
    }

    #[test]
    fn invalid_subroutine_index() {
        let glyph = &[139, 10, 14]; // index 0+107 with no subrs
        assert_eq!(
            run(glyph, &[], &[]),
            Err(CharStringError::InvalidSubroutineIndex)
        );
    }

    #[test]
    fn roll_leaves_rest_of_stack() {
        // push 1 2 3, roll(2, 1) pops only its control operands, then
        // hstem sees one remaining pair.
        let glyph = &[140, 141, 142, 12, 30, 1, 14];
        assert!(run(glyph, &[], &[]).is_ok());
    }
}
