mod image_decoder_port;

pub use image_decoder_port::ImageDecoder;
