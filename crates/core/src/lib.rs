pub mod config;
pub mod error;
pub mod notification;
pub mod recipient;

pub use config::Config;
pub use error::*;
pub use notification::*;
pub use recipient::*;
