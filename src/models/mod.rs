// Data models for the detection pipeline

pub mod analysis;
pub mod batch;
pub mod exercise;
pub mod landmark;
pub mod session;

pub use analysis::*;
pub use batch::*;
pub use exercise::*;
pub use landmark::*;
pub use session::*;
