pub mod device;
pub mod frame;
pub mod session;
