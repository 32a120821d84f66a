pub mod catalog;
pub mod distortion;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod scene;
pub mod transform;
