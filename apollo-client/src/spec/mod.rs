//! Field-selection descriptors of operations.

mod selection;

pub use selection::Argument;
pub use selection::Field;
pub use selection::FieldKind;
pub use selection::Fragment;
pub use selection::Selection;
