pub mod probe;
pub mod thresholds;
