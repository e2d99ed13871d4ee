mod loader;
mod model;

pub use loader::{layout_candidates, load_layout, parse_layout};
pub use model::{FitPolicy, HAlign, Layout, PixelRect, Rect, Slot, SlotKind, VAlign};
