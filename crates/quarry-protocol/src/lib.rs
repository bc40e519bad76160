mod compare;
mod naming;
mod path;
mod row;
mod value;

pub use compare::{compare_numeric, compare_values, value_eq};
pub use naming::is_memory_field;
pub use path::get_path;
pub use row::{Row, RowBuilder};
pub use value::Value;
