mod hash;
mod peer_id;

pub use hash::*;
pub use peer_id::*;
