use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use grantseq_core::simulator::{run_scenario_with_presenter, Scenario, ScenarioReport};
use grantseq_core::{RationalePresenter, RationalePrompt, RationaleReply};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Asks on the terminal instead of the simulated user
struct ConsolePresenter;

impl RationalePresenter for ConsolePresenter {
    fn present(&self, prompt: RationalePrompt, reply: RationaleReply) {
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "\n{}\n{}", prompt.title, prompt.message);
            let _ = write!(stdout, "Continue to request {}? [y/N] ", prompt.capabilities.join(", "));
            let _ = stdout.flush();

            let mut line = String::new();
            let proceed = std::io::stdin().lock().read_line(&mut line).is_ok()
                && matches!(line.trim(), "y" | "Y" | "yes");
            reply.answer(proceed);
        });
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn scenario_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
        .arg(
            Arg::new("interactive")
                .long("interactive")
                .action(ArgAction::SetTrue)
                .help("Answer rationale prompts on the terminal"),
        )
}

async fn run(mut scenario: Scenario, args: &ArgMatches) -> Result<ScenarioReport> {
    let presenter: Option<Arc<dyn RationalePresenter>> = if args.get_flag("interactive") {
        // a person is typing, give them time
        scenario.settle_ms = scenario.settle_ms.max(600_000);
        Some(Arc::new(ConsolePresenter))
    } else {
        None
    };

    let report = run_scenario_with_presenter(scenario, presenter)
        .await
        .context("scenario could not be started")?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Command::new("grantseq")
        .version(grantseq_core::VERSION)
        .about("Capability grant sequencing simulator")
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("warn")
                .help("Log filter, overridden by RUST_LOG"),
        )
        .subcommand(scenario_args(
            Command::new("simulate").about("Run a scenario file").arg(
                Arg::new("scenario")
                    .long("scenario")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .help("Scenario TOML file"),
            ),
        ))
        .subcommand(scenario_args(Command::new("demo").about("Run the built-in demo scenario")));

    let matches = cli.get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map_or("warn", String::as_str);
    init_logging(level);

    let report = match matches.subcommand() {
        Some(("simulate", args)) => {
            let path = args
                .get_one::<PathBuf>("scenario")
                .context("--scenario is required")?;
            let scenario = Scenario::from_file(path)
                .with_context(|| format!("failed to load scenario {}", path.display()))?;
            run(scenario, args).await?
        }
        Some(("demo", args)) => run(Scenario::demo(), args).await?,
        _ => return Ok(()),
    };

    std::process::exit(if report.passed() { 0 } else { 1 });
}
