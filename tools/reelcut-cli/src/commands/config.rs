//! Print the effective configuration.

use reelcut_common::config::EngineConfig;

pub fn run() -> anyhow::Result<()> {
    let config = EngineConfig::load();
    if let Err(e) = config.validate() {
        println!("[WARN] {e}");
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
