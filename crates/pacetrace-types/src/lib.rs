mod event;
mod hook;
mod pacing;
mod tokens;

pub use event::*;
pub use hook::*;
pub use pacing::*;
pub use tokens::*;
