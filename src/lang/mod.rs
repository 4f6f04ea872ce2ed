pub mod node;
pub mod value;

pub use value::Value;
