pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{EnrollError, EvidenceError, Result, SubmitError};
pub use paths::{find_config_file, system_config_file, system_data_dir};
