pub mod conv;
pub mod roi_align;
pub mod upsample;

pub use conv::{conv2d, ConvBnRelu, Padding};
pub use roi_align::PyramidRoiAlign;
pub use upsample::Upsample2d;
