use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use vbm::cli::{Cli, Command, OutputFormat};
use vbm::config::{self, Config};
use vbm::error::VbmError;
use vbm::facade::{Facade, Outcome};
use vbm::request::{CloneOptions, CommandRequest, CreateSpec, InfoFormat, Operation};
use vbm::{logging, paths, render, util};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_handle = logging::init(cli.verbose, cli.output);

    match run(cli, &log_handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli, log_handle: &logging::LogFileHandle) -> Result<(), VbmError> {
    let config: Config = config::load_config(cli.config.as_deref())?
        .with_overrides(cli.tool.as_deref(), cli.timeout)?;

    let log_path = config
        .log_file()
        .or_else(|| cli.log.then(paths::log_file));
    if let Some(path) = log_path {
        // A log file we cannot open never blocks the command itself.
        if let Err(e) = log_handle.open(&path) {
            tracing::warn!(path = %path.display(), "cannot open log file: {e}");
        }
    }

    let facade = Facade::new(config.facade_config()?);

    // Every parameter is validated here, before anything is spawned.
    let request = build_request(cli.command, cli.output, &facade)?;
    let operation = request.operation();
    let target = request.target_label().to_string();
    tracing::debug!(%operation, vm = %target, steps = request.steps().len(), "request built");

    let spinner = spinner_for(&request, cli.output);
    let result = tokio::select! {
        result = probe_and_execute(&facade, &request) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%operation, vm = %target, "interrupted");
            Err(VbmError::Cancelled { operation, target })
        }
    };
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    let outcome: Outcome = result?;
    let tool = facade.config().tool.display().to_string();
    print!("{}", render::render(&outcome, cli.output, &tool)?);
    Ok(())
}

/// Confirm the tool runs, then execute. `check` is itself the probe.
async fn probe_and_execute(facade: &Facade, request: &CommandRequest) -> Result<Outcome, VbmError> {
    if request.operation() != Operation::Probe {
        let version = facade.probe().await?;
        tracing::debug!(%version, "VBoxManage available");
    }
    facade.execute(request).await
}

fn build_request(
    command: Command,
    output: OutputFormat,
    facade: &Facade,
) -> Result<CommandRequest, VbmError> {
    match command {
        Command::Create {
            name,
            os_type,
            memory,
            cpus,
            disk_gb,
            disk_format,
            iso,
            network,
            start,
            headless,
        } => {
            let memory_mb =
                util::parse_size_mb(&memory).map_err(|message| VbmError::InvalidParameter {
                    operation: Operation::Create,
                    target: name.clone(),
                    message: format!("memory: {message}"),
                })?;
            let spec = CreateSpec {
                name,
                os_type,
                memory_mb,
                cpu_count: cpus,
                disk_gb,
                disk_format,
                iso_path: iso,
                network,
                start_after: start,
                headless,
            };
            CommandRequest::create(&spec, &facade.config().defaults)
        }
        Command::Delete { name, keep_disks } => CommandRequest::delete(&name, !keep_disks),
        Command::Start { name, headless } => CommandRequest::start(&name, headless),
        Command::Stop { name, force } => CommandRequest::stop(&name, force),
        Command::Clone {
            source,
            new_name,
            linked,
            snapshot,
        } => CommandRequest::clone_vm(&source, &new_name, &CloneOptions { linked, snapshot }),
        Command::List { detailed } => Ok(CommandRequest::list(detailed)),
        Command::Info { name } => {
            let format = match output {
                OutputFormat::Json => InfoFormat::Structured,
                OutputFormat::Text => InfoFormat::Text,
            };
            CommandRequest::info(&name, format)
        }
        Command::Check => Ok(CommandRequest::probe()),
    }
}

/// Spinner on stderr for the operations that can take a while, only when a
/// human is watching.
fn spinner_for(request: &CommandRequest, output: OutputFormat) -> Option<ProgressBar> {
    let slow = matches!(
        request.operation(),
        Operation::Create | Operation::Clone | Operation::Stop
    );
    if !slow || output != OutputFormat::Text || !std::io::stderr().is_terminal() {
        return None;
    }

    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_message(format!(
        "{} {}",
        request.operation(),
        request.target_label()
    ));
    bar.enable_steady_tick(Duration::from_millis(80));
    Some(bar)
}
