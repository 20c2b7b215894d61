mod order;
mod value;

pub use order::compare_values;
pub use value::{decode_map_fields, encode_map_fields, FieldValue, ValueKind};
