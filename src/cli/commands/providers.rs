use anyhow::Result;
use console::{Emoji, style};

use crate::config::Config;
use crate::llm::registry::describe_configured;

static KEY: Emoji<'_, '_> = Emoji("🔑 ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[X] ");
static ROBOT: Emoji<'_, '_> = Emoji("🤖 ", "");

pub async fn run() -> Result<()> {
    println!();
    println!("{}", style(" SourceLens - Backends ").bold().reverse());
    println!();

    let config = Config::load()?;
    let backends = describe_configured(&config);

    println!("{}Configured LLM backends", ROBOT);
    println!();

    if backends.is_empty() {
        println!(
            "{}",
            style("No backend configured. Run 'sourcelens init' first.").yellow()
        );
        return Ok(());
    }

    for backend in &backends {
        let (icon, status) = if backend.available {
            (CHECK, style("Available").green())
        } else {
            (CROSS, style("No credentials").red())
        };
        println!(
            "  {}{:<12} {} {}",
            icon,
            backend.id,
            status,
            style(&backend.model).dim()
        );
    }

    let available = backends.iter().filter(|b| b.available).count();
    println!();
    println!(
        "  {} of {} backend(s) will be queried by {}",
        style(available).cyan().bold(),
        backends.len(),
        style("sourcelens analyze").cyan()
    );

    if available < backends.len() {
        println!();
        println!("{}Set API keys with environment variables:", KEY);
        println!("  {} export OPENAI_API_KEY=your-key", style("$").dim());
        println!("  {} export ANTHROPIC_API_KEY=your-key", style("$").dim());
        println!("  {} export GOOGLE_API_KEY=your-key", style("$").dim());
    }
    println!();

    Ok(())
}
