pub mod frame_buffer;
pub mod sample_format;
