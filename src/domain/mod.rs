pub mod camera;
pub mod detection;
pub mod errors;
pub mod mode;
pub mod model;
pub mod stream;
