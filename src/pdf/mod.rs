//! The PDF text-output boundary: font embedding and text-showing streams.
//!
//! Everything here drives `pdf-writer`; object-graph concerns beyond text
//! and font resources belong to the outer driver.

pub mod cmap;
pub mod font;
pub mod text;

use pdf_writer::Ref;

/// Hands out object ids.
#[derive(Clone, Debug)]
pub struct RefAllocator {
    next: i32,
}

impl RefAllocator {
    pub fn new() -> Self {
        RefAllocator { next: 1 }
    }

    pub fn bump(&mut self) -> Ref {
        let id = Ref::new(self.next);
        self.next += 1;
        id
    }
}

impl Default for RefAllocator {
    fn default() -> Self {
        Self::new()
    }
}
