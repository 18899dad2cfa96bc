mod layout;
mod persister;
mod pieces;

pub use layout::*;
pub use persister::*;
pub use pieces::*;
