//! Configuration management commands.

use toolhub_core::Config;

use crate::ConfigAction;

pub fn handle(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load().map_err(|e| toolhub_core::Error::Config(e.to_string()))?;
            let result = config.validate();
            print!("{}", config.to_toml_string()?);

            for issue in &result.issues {
                eprintln!("{:?} - {}: {}", issue.severity, issue.field, issue.message);
            }
        }
        ConfigAction::Path => {
            println!("User config:    {}", Config::config_dir().join("config.toml").display());
            println!("Project config: .toolhub/config.toml");
            println!("Local config:   .toolhub/config.local.toml");
            println!("Data directory: {}", Config::data_dir().display());
        }
    }
    Ok(())
}
