pub mod check;
pub mod check_host;
pub mod config;
pub mod download;
pub mod hosts;
pub mod task;

pub use check::run as check;
pub use check_host::run as check_host;
pub use download::run as download;
pub use hosts::run as hosts;
