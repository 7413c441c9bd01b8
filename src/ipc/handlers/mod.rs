pub mod billing;
pub mod certificates;
pub mod core;
pub mod grading;
pub mod roster;
