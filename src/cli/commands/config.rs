use anyhow::Result;

use crate::config::PipelineConfig;

pub struct ConfigCommand {
    config: PipelineConfig,
}

impl ConfigCommand {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        println!("# Effective ballot-pipeline configuration");
        print!("{}", self.config.to_toml()?);
        Ok(())
    }
}
