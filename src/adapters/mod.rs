pub mod ffmpeg;
pub mod fs;
pub mod http;
pub mod onnx;
pub mod v4l2;
