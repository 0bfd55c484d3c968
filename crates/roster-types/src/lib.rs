mod field;
mod user;
mod view;

pub use field::*;
pub use user::*;
pub use view::*;

pub const DEFAULT_STORAGE_KEY: &str = "usersData";
