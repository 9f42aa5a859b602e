//! Show or initialize the configuration file.

use postfully_common::config::{config_file_path, AppConfig};

pub fn run(app: &AppConfig, init: bool) -> anyhow::Result<()> {
    let path = config_file_path();

    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            app.save()?;
            println!("Config written to {}", path.display());
        }
    }

    println!("{}", serde_json::to_string_pretty(app)?);
    Ok(())
}
