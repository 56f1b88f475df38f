use anyhow::Result;
use clap::Parser;

use ballot_pipeline::cli::commands::{ConfigCommand, SimulateCommand, StagesCommand};
use ballot_pipeline::cli::{Cli, Commands};
use ballot_pipeline::config::PipelineConfig;
use ballot_pipeline::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    PipelineConfig::load_env_file()?;
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if cli.json_logs {
        config.observability.json_logs = true;
    }
    init_telemetry(&config.observability)?;

    match cli.command {
        Some(Commands::Simulate {
            polls,
            voters,
            local_trustees,
            trustees,
            workers,
            duplicate_rate,
            fail_poll,
            fail_stage,
            notify,
        }) => {
            if let Some(workers) = workers {
                config.queue.workers = workers;
            }
            if let Some(rate) = duplicate_rate {
                config.queue.redelivery_probability = rate;
            }
            config.validate()?;

            SimulateCommand {
                polls,
                voters,
                local_trustees,
                trustees,
                fail_poll,
                fail_stage,
                notify,
            }
            .execute(&config)
            .await
        }
        Some(Commands::Config) => ConfigCommand::new(config).execute(),
        Some(Commands::Stages) | None => StagesCommand.execute(),
    }
}
