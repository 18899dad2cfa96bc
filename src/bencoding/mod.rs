mod decoder;
mod encoder;
pub mod value;

pub use decoder::Parser;
pub use encoder::Encoder;
pub use value::Value;
