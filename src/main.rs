#![allow(clippy::result_large_err)]

use anyhow::Context;
use readygate::app::ReadygateApp;
use readygate::config::Settings;
use readygate::telemetry;
use std::path::PathBuf;

enum CliCommand {
    Run { config_path: Option<PathBuf> },
    CheckConfig { config_path: Option<PathBuf> },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Run { config_path } => {
            let settings = load_settings(config_path.as_ref())?;
            telemetry::init_tracing(
                &settings.telemetry.service_name,
                &settings.telemetry.log_filter,
            )
            .context("failed to initialise telemetry")?;

            let app = ReadygateApp::initialise(settings)
                .context("failed to construct application")?;
            app.run().await.context("application runtime error")
        }
        CliCommand::CheckConfig { config_path } => {
            let settings = load_settings(config_path.as_ref())?;
            print_resolved(&settings);
            Ok(())
        }
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    Settings::load_with(path.map(PathBuf::as_path), None).context("failed to load configuration")
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let check_config = match args.peek().map(String::as_str) {
        Some("check-config") => {
            args.next();
            true
        }
        Some("run") => {
            args.next();
            false
        }
        _ => false,
    };

    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(PathBuf::from(value));
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(if check_config {
        CliCommand::CheckConfig { config_path }
    } else {
        CliCommand::Run { config_path }
    })
}

fn print_help() {
    println!(
        "\
Usage: readygate [run] [OPTIONS]
       readygate check-config [OPTIONS]

Commands:
  run             Probe dependencies and serve health endpoints (default)
  check-config    Load and validate settings, print the resolved dependencies

Options:
  -c, --config <PATH>    Settings file (overrides config/readygate)
  -h, --help             Print this help message

Environment variables prefixed READYGATE__ override file values,
e.g. READYGATE__BOOTSTRAP__TIMEOUT=90s.
"
    );
}

fn print_resolved(settings: &Settings) {
    println!("configuration ok");
    println!("  service:   {}", settings.service.name);
    println!("  listen:    {}", settings.bind_addr());
    println!(
        "  bootstrap: timeout={} max_attempts={} backoff={}..{} jitter={}",
        humantime::format_duration(settings.bootstrap.timeout),
        settings.bootstrap.max_attempts,
        humantime::format_duration(settings.bootstrap.backoff_base),
        humantime::format_duration(settings.bootstrap.backoff_ceiling),
        settings.bootstrap.jitter.as_str(),
    );

    let dependencies = settings.dependencies();
    if dependencies.is_empty() {
        println!("  dependencies: none");
        return;
    }
    println!("  dependencies:");
    for dependency in dependencies {
        println!(
            "    - {} [{}] {}",
            dependency.name,
            dependency.kind,
            dependency.targets.join(", ")
        );
    }
}
