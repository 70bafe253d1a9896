use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use pilot::engine::{CommandOracle, PlanEngine, PlanEvent};
use pilot::{logging, ActivityLog, EngineError, Language, PilotConfig, PlanStore, ProcessRunner};

#[derive(Parser)]
#[command(name = "pilot", version, about = "Plan and execute objectives step by step")]
struct Cli {
    /// Directory holding config.json, plan.json and logs
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Agent used as the decision oracle (see config.json)
    #[arg(long, global = true)]
    agent: Option<String>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a plan for an objective
    Plan {
        #[arg(required = true)]
        objective: Vec<String>,
    },
    /// Run the stored plan, or plan and run a new objective
    Run { objective: Vec<String> },
    /// Show the stored plan
    Show,
    /// Ask the oracle for suggestions on the stored plan
    Feedback,
    /// Forget the stored plan
    Reset,
    /// Run a code snippet in the sandbox
    Exec {
        #[arg(short, long, value_enum)]
        language: Language,
        /// Timeout in seconds (defaults to the configured value)
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Inline source code
        #[arg(short = 'c', long, conflicts_with = "file")]
        code: Option<String>,
        /// Source file
        file: Option<PathBuf>,
    },
    /// Print the activity log
    Log,
}

/// Shared wiring for the subcommands
struct App {
    config: PilotConfig,
    store: PlanStore,
    activity: ActivityLog,
}

impl App {
    fn new(home: PathBuf) -> Result<Self> {
        let config = PilotConfig::load(&home)?;
        let store = PlanStore::new(&home)?;
        let activity = ActivityLog::new().with_file(store.activity_file());
        Ok(Self {
            config,
            store,
            activity,
        })
    }

    fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(self.config.runner.clone()).with_activity(self.activity.clone())
    }

    fn engine(&self, agent: Option<&str>) -> Result<PlanEngine> {
        let oracle = CommandOracle::from_config(&self.config.oracle, agent)?;
        Ok(
            PlanEngine::new(Arc::new(oracle), self.config.engine.clone())
                .with_runner(self.runner())
                .with_activity(self.activity.clone()),
        )
    }

    /// Engine with the stored plan restored
    async fn engine_with_stored_plan(&self, agent: Option<&str>) -> Result<PlanEngine> {
        let plan = self
            .store
            .load()?
            .ok_or_else(|| anyhow::anyhow!("No stored plan. Run `pilot plan <objective>` first"))?;
        let engine = self.engine(agent)?;
        engine.restore(plan).await;
        Ok(engine)
    }
}

/// Print engine events as they happen
fn spawn_progress_printer(mut events: broadcast::Receiver<PlanEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PlanEvent::StepStarted {
                    index, description, ..
                }) => eprintln!("▶ Step {}: {}", index + 1, description),
                Ok(PlanEvent::StepFinished {
                    index, status, next, ..
                }) => eprintln!(
                    "  Step {} {} (next: {:?})",
                    index + 1,
                    status.display_name(),
                    next
                ),
                Ok(PlanEvent::PlanRevised { from_index, steps }) => eprintln!(
                    "✎ Plan revised from step {}: now {} steps",
                    from_index + 1,
                    steps
                ),
                Ok(PlanEvent::PlanFinished { .. }) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("  ({} progress events skipped)", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn run_command(app: &App, agent: Option<&str>, objective: Vec<String>) -> Result<ExitCode> {
    let engine = if objective.is_empty() {
        app.engine_with_stored_plan(agent).await?
    } else {
        let engine = app.engine(agent)?;
        let plan = engine.create_plan(&objective.join(" ")).await?;
        app.store.save(&plan)?;
        println!("{}", plan.summary());
        engine
    };

    let printer = spawn_progress_printer(engine.events());
    let outcome = engine.run_plan().await;
    if outcome.is_ok() {
        // Ends at PlanFinished
        let _ = printer.await;
    } else {
        printer.abort();
    }

    // Persist whatever progress was published, including on failure
    if let Some(plan) = engine.plan().await {
        app.store.save(&plan)?;
        println!("{}", plan.summary());
    }

    match outcome {
        Ok(output) => {
            println!("{}", output);
            Ok(ExitCode::SUCCESS)
        }
        Err(EngineError::NoActivePlan) => bail!("Stored plan is already complete"),
        Err(e) => Err(e.into()),
    }
}

async fn exec_command(
    app: &App,
    language: Language,
    timeout: Option<u64>,
    code: Option<String>,
    file: Option<PathBuf>,
) -> Result<ExitCode> {
    let source = match (code, file) {
        (Some(code), _) => code,
        (None, Some(file)) => std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?,
        (None, None) => bail!("Provide source with --code or a file path"),
    };

    let runner = app.runner();
    let timeout = timeout.unwrap_or(runner.default_timeout_secs());
    let result = runner.run(&source, language, timeout).await?;

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if result.timed_out {
        eprintln!("⏱ timed out after {}s", timeout);
    }

    Ok(if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1).max(1))
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let home = cli.home.unwrap_or_else(PilotConfig::default_home);
    let app = App::new(home)?;
    let agent = cli.agent.as_deref();

    match cli.command {
        Command::Plan { objective } => {
            let engine = app.engine(agent)?;
            let plan = engine.create_plan(&objective.join(" ")).await?;
            app.store.save(&plan)?;
            println!("{}", plan.summary());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { objective } => run_command(&app, agent, objective).await,
        Command::Show => {
            match app.store.load()? {
                Some(plan) => println!("{}", plan.summary()),
                None => println!("No stored plan"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Feedback => {
            let engine = app.engine_with_stored_plan(agent).await?;
            for suggestion in engine.request_feedback().await? {
                println!("- {}", suggestion);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset => {
            app.store.clear()?;
            app.activity.record("Stored plan cleared");
            println!("Plan cleared");
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec {
            language,
            timeout,
            code,
            file,
        } => exec_command(&app, language, timeout, code, file).await,
        Command::Log => {
            let path = app.store.activity_file();
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                print!("{}", content);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
