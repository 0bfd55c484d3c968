mod image;
mod validate;

pub use image::*;
pub use validate::*;
