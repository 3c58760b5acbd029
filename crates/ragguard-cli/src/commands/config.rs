//! Config command

use crate::app::{ConfigAction, ConfigArgs, OutputFormat};
use crate::output;
use anyhow::{bail, Result};
use ragguard_core::Config;
use std::path::Path;

const REDACTED: &str = "<redacted>";

pub async fn run(args: ConfigArgs, path: &Path, format: OutputFormat) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let mut config = Config::load_from(path)?;
            if config.llm_service.api_key.is_some() {
                config.llm_service.api_key = Some(REDACTED.to_string());
            }
            match output::structured(&config, format)? {
                Some(rendered) => println!("{}", rendered),
                None => {
                    println!("# {}", path.display());
                    print!("{}", serde_yaml::to_string(&config)?);
                }
            }
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            // Keys picked up from the environment stay out of the file
            let mut config = Config::default();
            config.llm_service.api_key = None;
            config.save_to(path)?;
            println!("Wrote default config to {}", path.display());
        }
    }
    Ok(())
}
