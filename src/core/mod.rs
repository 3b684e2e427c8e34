pub mod frame_processor;
pub mod parameter;
pub mod quantum;
pub mod ring;
