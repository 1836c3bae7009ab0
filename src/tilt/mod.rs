pub mod constants;
pub mod estimator;
pub mod task;
pub mod types;
