pub mod config;
pub mod data_dir;
pub mod logger;

pub use config::*;
pub use data_dir::get_data_dir;
pub use logger::init_logger;
