//! Domain layer with core entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{AvailableSet, ImageEvent, ImageId, ImageRoot, ImageStatus};
pub use errors::ImageError;
pub use ports::ImageDecoder;
