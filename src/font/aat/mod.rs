//! Apple Advanced Typography fallback shaping.
//!
//! Used only when a font carries neither GSUB nor GPOS: `morx` supplies
//! substitutions and `kern` supplies pair positioning.

pub mod kern;
pub mod lookup;
pub mod morx;
pub mod state;

pub use kern::KernTable;
pub use morx::{AatFeature, MorxTable};
