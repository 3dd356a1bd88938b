use anyhow::{Context, Result};
use console::{Emoji, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::time::Duration;

use crate::config::Config;

static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");
static KEY: Emoji<'_, '_> = Emoji("🔑 ", "");

pub async fn run(force: bool) -> Result<()> {
    println!();
    println!("{}", style(" SourceLens - Initialization ").bold().reverse());
    println!();

    let config_dir = Config::config_dir()?;
    let config_path = Config::config_path()?;

    if config_path.exists() && !force {
        println!(
            "{}Configuration already exists at {}",
            WARN,
            style(config_path.display()).cyan()
        );
        println!("  Use {} to overwrite", style("--force").yellow());
        return Ok(());
    }

    fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner().template(&format!("{}{{spinner:.green}} {{msg}}", GEAR))?,
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Creating configuration...");

    let config_content = toml::to_string_pretty(&Config::builtin())?;
    fs::write(&config_path, config_content).context("Failed to write config file")?;
    spinner.finish_and_clear();

    println!(
        "{}Created configuration at {}",
        CHECK,
        style(config_path.display()).cyan()
    );

    println!();
    println!("{}", style("━".repeat(50)).dim());
    println!();
    println!("{}Next steps:", ROCKET);
    println!();
    println!("  {}Export the API keys of the backends you want to use:", KEY);
    println!("    {} export OPENAI_API_KEY=your-key", style("$").dim());
    println!("    {} export ANTHROPIC_API_KEY=your-key", style("$").dim());
    println!("    {} export GOOGLE_API_KEY=your-key", style("$").dim());
    println!();
    println!("  {}Add a [providers.ollama] section to use a local model.", GEAR);
    println!();
    println!("  {}Check which backends are ready:", GEAR);
    println!("    {} sourcelens providers", style("$").dim());
    println!();
    println!("  {}Run your first analysis:", ROCKET);
    println!(
        "    {} sourcelens analyze \"Which online bank is best?\" --context France",
        style("$").dim()
    );
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_config_parses_back() {
        let content = toml::to_string_pretty(&Config::builtin()).unwrap();
        assert!(content.contains("${OPENAI_API_KEY}"));
        assert!(content.contains("[pipeline]"));

        let parsed = Config::from_toml(&content).unwrap();
        assert!(parsed.providers.ollama.is_none());
        assert_eq!(parsed.pipeline.deadline_secs, 300);
    }
}
