pub mod board;
pub mod constants;
pub mod device;
pub mod egv;
pub mod error;
pub mod frame;
pub mod link;
pub mod speed;

// Re-export the session type for easy access
pub use device::LhySession;
pub use error::LhyError;
