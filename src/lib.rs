pub mod config;
pub mod drive;
pub mod hardware;
pub mod imu;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod sim;
