//! Browser demo for YOLO object detection on webcam, video and image input.
//!
//! `domain` holds the plain types, `application` the use cases and the ports
//! they depend on, and `adapters` the ONNX, ffmpeg, V4L2, filesystem and HTTP
//! implementations.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
