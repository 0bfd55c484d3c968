mod error;
mod event;
mod pending;
mod store;

pub use error::*;
pub use event::*;
pub use pending::*;
pub use store::*;
