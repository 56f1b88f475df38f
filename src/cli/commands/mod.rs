pub mod config;
pub mod simulate;
pub mod stages;

pub use config::ConfigCommand;
pub use simulate::{SimulateCommand, SimulationReport};
pub use stages::StagesCommand;
