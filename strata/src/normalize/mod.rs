//! Document normalization: naming rules and the unpacker that turns nested
//! documents into flat rows plus a schema diff.

pub mod naming;
pub mod unpacker;

pub use naming::{PATH_SEPARATOR, normalize_column_name, normalize_table_name};
pub use unpacker::{UnpackedDocument, Unpacker};
