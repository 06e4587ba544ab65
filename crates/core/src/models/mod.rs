//! Data models for Billboard

mod change;
mod claim;
mod identity;
mod slot;
mod song;
mod window;

pub use change::*;
pub use claim::*;
pub use identity::*;
pub use slot::*;
pub use song::*;
pub use window::*;
