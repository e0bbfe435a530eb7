pub mod dto;
pub mod model;
pub mod ports;
pub mod render;
pub mod services;
pub mod webcam;
