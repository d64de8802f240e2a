//! `chatgate config` -- show the effective configuration.

use std::path::Path;

use chatgate_types::config::ServiceConfig;

/// Print `config` as TOML (or JSON with `--json`), noting where it came from.
pub fn show_config(config: &ServiceConfig, source: Option<&Path>, json: bool) -> anyhow::Result<()> {
    if json {
        let out = serde_json::json!({
            "source": source.map(|p| p.display().to_string()),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# built-in defaults (no config.toml found)"),
    }
    print!("{}", render_toml(config)?);
    Ok(())
}

fn render_toml(config: &ServiceConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
