pub mod cell_ref;
pub mod image_ref;

pub use cell_ref::*;
pub use image_ref::*;
