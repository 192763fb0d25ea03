pub mod devices;
pub mod pipeline;
