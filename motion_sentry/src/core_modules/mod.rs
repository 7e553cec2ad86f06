pub mod capture;
pub mod frame;
pub mod inactivity;
pub mod motion_detector;
pub mod region_detector;
pub mod schedule;
