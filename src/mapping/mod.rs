pub mod codec;
pub mod entity;
pub mod registry;

pub use codec::{decode, decode_row, encode, encode_row};
pub use entity::{take_field, Entity};
pub use registry::SchemaRegistry;
