//! relaybot setup wizard.
//!
//! Asks for the Telegram token, the allow-list and the chat backend settings
//! on the terminal, then writes `config.toml` into the project root
//! (`RELAYBOT_ROOT`, or the current directory).

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    tg_token: &'a str,
    user_ids: &'a str,
    provider: &'a str,
    api_key: &'a str,
    model: &'a str,
    max_tokens: u32,
}

/// Escapes a value for a basic TOML string.
fn toml_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    // The bot compares ids verbatim, so drop the spaces people type after commas.
    let user_ids = if p.user_ids.trim().is_empty() {
        "*".to_owned()
    } else {
        p.user_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    };

    let key_line = if p.api_key.is_empty() {
        "# api_key = \"sk-...\"  (or set LLM_API_KEY)".to_owned()
    } else {
        format!("api_key = \"{}\"", toml_escape(p.api_key))
    };

    let tg_token = toml_escape(p.tg_token);
    let provider = toml_escape(p.provider);
    let model = toml_escape(p.model);
    let max_tokens = p.max_tokens;

    format!(
        r#"[telegram]
bot_token = "{tg_token}"
allowed_user_ids = "{user_ids}"

[llm]
provider = "{provider}"
model = "{model}"
{key_line}
max_tokens = {max_tokens}
"#
    )
}

// ── CLI mode ───────────────────────────────────────────────────────────────────

fn run_cli(project_root: &Path, input: &mut impl BufRead) -> Result<PathBuf> {
    println!("=== relaybot setup ===\n");

    let mut read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        input.read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let or_default = |s: String, default: &str| {
        if s.is_empty() {
            default.to_owned()
        } else {
            s
        }
    };

    let tg_token = read_line("Telegram bot token: ")?;
    if tg_token.is_empty() {
        anyhow::bail!("A Telegram bot token is required");
    }
    let user_ids = or_default(
        read_line("Allowed user IDs (comma-separated, * for everyone) [*]: ")?,
        "*",
    );
    let provider = or_default(
        read_line("Provider (openai, openrouter, ollama) [openai]: ")?,
        "openai",
    );
    let api_key = read_line("API key (leave empty for ollama): ")?;
    let model = or_default(read_line("Model [gpt-4o-mini]: ")?, "gpt-4o-mini");

    let config = format_config(&ConfigParams {
        tg_token: &tg_token,
        user_ids: &user_ids,
        provider: &provider,
        api_key: &api_key,
        model: &model,
        max_tokens: 1024,
    });

    let config_path = project_root.join("config.toml");
    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    Ok(config_path)
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Resolve project root: prefer RELAYBOT_ROOT env, fall back to cwd.
    let project_root =
        PathBuf::from(std::env::var("RELAYBOT_ROOT").unwrap_or_else(|_| ".".to_string()));

    let stdin = io::stdin();
    let config_path = run_cli(&project_root, &mut stdin.lock())?;

    println!("\n✓  config.toml saved to {}", config_path.display());
    println!("   Run the bot with:  cargo run");
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
