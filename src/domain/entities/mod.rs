//! Domain entity definitions.

mod image;

pub use self::image::{
    AvailableSet, BUNDLED_PREFIX, ImageEvent, ImageId, ImageRoot, ImageStatus, image_cost,
};
