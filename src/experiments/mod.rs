pub mod glyphs;
pub mod trials;
