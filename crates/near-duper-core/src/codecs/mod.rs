pub mod audio;
mod dct;
mod image;

pub use self::dct::DctKernel;
pub use self::image::ImageCodec;
