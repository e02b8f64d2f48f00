mod config_cmd;
mod holiday;

pub use config_cmd::ConfigCommand;
pub use holiday::HolidayCommand;
