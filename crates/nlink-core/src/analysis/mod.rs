pub mod branches;
pub mod cache;
pub mod chase;
pub mod dashboard;
pub mod signal;
pub mod tunneling;
