use clap::Parser;
use savant::prelude::*;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "savant")]
#[command(about = "Render a template found on the template search path")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Template name (defaults to the configured template)
    template: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Template search path, leftmost directory first
    #[arg(short = 't', long)]
    template_path: Option<String>,

    /// Resource search path, leftmost directory first
    #[arg(short = 'r', long)]
    resource_path: Option<String>,

    /// Bind a variable, the value is parsed as JSON when possible
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Bind every field of a JSON object file
    #[arg(long = "vars", value_name = "FILE")]
    vars_file: Option<PathBuf>,

    /// Expose bindings to scripts by bare name
    #[arg(long)]
    extract: bool,

    /// Raise errors instead of returning error values
    #[arg(long)]
    exceptions: bool,

    /// Escape chain stage, repeat to build a chain
    #[arg(short, long = "escape", value_name = "NAME")]
    escape: Vec<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            log::error!("{}", err);
            eprintln!("savant: {}", err);
            ExitCode::from(2)
        }
    }
}

fn load_config(cli: &Cli) -> Result<SavantConfig> {
    let mut config = match &cli.config {
        Some(path) => SavantConfig::from_file(path)?,
        None => SavantConfig::from_env()?,
    };

    if let Some(dirs) = &cli.template_path {
        config.template_path = PathSpec::Delimited(dirs.clone());
    }
    if let Some(dirs) = &cli.resource_path {
        config.resource_path = PathSpec::Delimited(dirs.clone());
    }
    if !cli.escape.is_empty() {
        config.escape = cli.escape.clone();
    }
    config.extract |= cli.extract;
    config.exceptions |= cli.exceptions;

    Ok(config)
}

fn bind_vars(engine: &mut Savant, cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.vars_file {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read vars file '{}': {}", path.display(), e))
        })?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(fields) => {
                engine.assign_map(fields);
            }
            _ => {
                return Err(Error::config(format!(
                    "Vars file '{}' must hold a JSON object",
                    path.display()
                )))
            }
        }
    }

    for pair in &cli.vars {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| Error::config(format!("Expected KEY=VALUE, got '{}'", pair)))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        if !engine.assign(key, value) {
            log::warn!("Cannot bind reserved name '{}'", key);
        }
    }

    Ok(())
}

fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli)?;
    let mut engine = Savant::from_config(&config)?;
    bind_vars(&mut engine, &cli)?;

    let mut stdout = std::io::stdout().lock();
    match engine.render(cli.template.as_deref())? {
        Ok(output) => {
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
            Ok(true)
        }
        Err(err) => {
            eprintln!("savant: {}", err);
            stdout.write_all(engine.escape(engine.error_text()).as_bytes())?;
            stdout.flush()?;
            Ok(false)
        }
    }
}
