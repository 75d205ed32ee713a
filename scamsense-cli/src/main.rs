mod drill;
mod play;
mod policy;
mod reports;
mod util;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use scamsense_engine::{
    CommandGenerator, EngineConfig, FileStore, GenerationGateway, GenerationRequest, Locale,
    MemoryStore, PlaySession, Scenario, ScenarioStore, TrainingEngine, normalize_str,
};

use drill::{DrillResult, DrillRunner};
use play::{InteractivePlayer, Narrated, PolicyPlayer, ScriptedPlayer, play_out};
use policy::PlayStrategy;
use util::{parse_seeds, split_csv};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Debug, Parser)]
#[command(name = "scamsense", version)]
#[command(about = "Branching social-engineering drills: validate, play, drill and generate scenarios")]
struct Args {
    /// Engine configuration file (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for stored scenarios and play records (in-memory when omitted)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the built-in scenarios and any stored ones
    Catalog,

    /// Normalize a scenario document and report what was repaired
    Validate {
        file: PathBuf,

        /// Print the canonical scenario JSON instead of the report
        #[arg(long)]
        canonical: bool,
    },

    /// Play a scenario file or a scenario id
    Play {
        scenario: String,

        /// Option ids to pick at each choice step (comma-separated); the script
        /// must play the scenario to its end
        #[arg(long, conflicts_with = "policy")]
        choices: Option<String>,

        /// Automated player: cautious, reckless or random
        #[arg(long)]
        policy: Option<String>,

        /// Seed for the random policy
        #[arg(long, default_value_t = 1337)]
        seed: u64,

        /// Answer prompts on stdin (the default without --choices or --policy)
        #[arg(long)]
        interactive: bool,

        /// Locale used for the scenario title
        #[arg(long, default_value = "en")]
        locale: String,
    },

    /// Run automated drills and check determinism and scoring
    Drill {
        /// Scenario ids (comma-separated), or "all"
        #[arg(long, default_value = "all")]
        scenarios: String,

        /// Policies to run (comma-separated)
        #[arg(long, default_value = "cautious,reckless,random")]
        policies: String,

        /// Seeds to run (comma-separated, decimal or 0x hex)
        #[arg(long, default_value = "1337")]
        seeds: String,

        /// Output report format
        #[arg(long, value_enum, default_value_t = ReportFormat::Console)]
        report: ReportFormat,

        /// Optional path to write the report output instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate a scenario through an external generator command and store it
    Generate {
        #[arg(long)]
        topic: String,

        /// Language of the generated scenario: en or id
        #[arg(long, default_value = "en")]
        locale: String,

        /// Program (with arguments) that reads the prompt on stdin and
        /// prints the scenario document on stdout
        #[arg(long)]
        generator_cmd: String,

        /// Also write the canonical scenario JSON here
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let passed = match &args.store {
        Some(root) => {
            let store = FileStore::open(root)
                .with_context(|| format!("failed to open store {}", root.display()))?;
            run(TrainingEngine::new(store, config), args.command).await?
        }
        None => run(TrainingEngine::new(MemoryStore::new(), config), args.command).await?,
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

/// Dispatch one subcommand. Returns `false` when a drill run failed.
async fn run<S>(engine: TrainingEngine<S>, command: Command) -> Result<bool>
where
    S: ScenarioStore,
{
    match command {
        Command::Catalog => list_catalog(&engine)?,
        Command::Validate { file, canonical } => validate(&file, canonical)?,
        Command::Play {
            scenario,
            choices,
            policy,
            seed,
            interactive,
            locale,
        } => {
            let mode = PlayMode::from_args(choices.as_deref(), policy.as_deref(), interactive)?;
            play_scenario(&engine, &scenario, mode, seed, &locale)?;
        }
        Command::Drill {
            scenarios,
            policies,
            seeds,
            report,
            output,
        } => return run_drills(&engine, &scenarios, &policies, &seeds, report, output),
        Command::Generate {
            topic,
            locale,
            generator_cmd,
            output,
        } => generate(&engine, topic, &locale, &generator_cmd, output).await?,
    }
    Ok(true)
}

fn announce_banner() {
    println!("{}", "🛡️  Scamsense Drill Runner".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn list_catalog<S: ScenarioStore>(engine: &TrainingEngine<S>) -> Result<()> {
    let mut out = OutputTarget::new(None)?;
    writeln!(out, "Available scenarios:")?;
    for id in engine.list_scenarios()? {
        let scenario = engine.scenario(&id)?;
        writeln!(
            out,
            "  {id:25} - {} ({} steps)",
            scenario.title,
            scenario.steps.len()
        )?;
    }
    out.flush_inner()?;
    Ok(())
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn validate(file: &Path, canonical: bool) -> Result<()> {
    let text = read_document(file)?;
    let normalized =
        normalize_str(&text).with_context(|| format!("{} is not a usable scenario", file.display()))?;
    let mut out = OutputTarget::new(None)?;
    if canonical {
        writeln!(out, "{}", serde_json::to_string_pretty(&normalized.scenario)?)?;
    } else {
        let scenario = &normalized.scenario;
        let status = if normalized.report.is_clean() {
            "✅ clean".green()
        } else {
            "🔧 repaired".yellow()
        };
        writeln!(out, "{status} {} ({})", scenario.title.bold(), scenario.id)?;
        writeln!(
            out,
            "   Steps: {} | options: {} | entry: {}",
            scenario.steps.len(),
            scenario.option_count(),
            scenario.entry_step_id
        )?;
        writeln!(out, "   Repairs: {}", normalized.report)?;
    }
    out.flush_inner()?;
    Ok(())
}

enum PlayMode {
    Scripted(Vec<String>),
    Policy(PlayStrategy),
    Interactive,
}

impl PlayMode {
    fn from_args(choices: Option<&str>, policy: Option<&str>, interactive: bool) -> Result<Self> {
        match (choices, policy, interactive) {
            (Some(_), _, true) | (_, Some(_), true) => {
                bail!("--interactive cannot be combined with --choices or --policy")
            }
            (Some(list), _, false) => Ok(Self::Scripted(split_csv(list))),
            (None, Some(name), false) => PlayStrategy::parse(name)
                .map(Self::Policy)
                .ok_or_else(|| anyhow!("unknown policy '{name}' (cautious, reckless, random)")),
            (None, None, _) => Ok(Self::Interactive),
        }
    }
}

/// A path to a document, or else an id known to the engine.
fn resolve_scenario<S: ScenarioStore>(
    engine: &TrainingEngine<S>,
    reference: &str,
) -> Result<Arc<Scenario>> {
    let path = Path::new(reference);
    if path.is_file() {
        let normalized = normalize_str(&read_document(path)?)
            .with_context(|| format!("{reference} is not a usable scenario"))?;
        if !normalized.report.is_clean() {
            log::warn!("{reference}: {}", normalized.report);
        }
        return Ok(Arc::new(normalized.scenario));
    }
    Ok(engine.scenario(reference)?)
}

fn play_scenario<S: ScenarioStore>(
    engine: &TrainingEngine<S>,
    reference: &str,
    mode: PlayMode,
    seed: u64,
    locale: &str,
) -> Result<()> {
    let scenario = resolve_scenario(engine, reference)?;
    let title = scenario.title_for(locale).to_string();
    let mut session = PlaySession::new(scenario);
    let first = session.start()?;
    let mut out = stdout();
    writeln!(out, "{}", title.bright_cyan().bold())?;

    match mode {
        PlayMode::Scripted(choices) => {
            let mut player = Narrated::new(ScriptedPlayer::new(choices), &mut out);
            play_out(&mut session, first, &mut player)?;
            play::check_script(&session, &player.into_inner())?;
        }
        PlayMode::Policy(strategy) => {
            let mut policy = strategy.create_policy(seed);
            let mut player = Narrated::new(PolicyPlayer::new(policy.as_mut()), &mut out);
            play_out(&mut session, first, &mut player)?;
        }
        PlayMode::Interactive => {
            let input = std::io::stdin().lock();
            let mut player = Narrated::new(InteractivePlayer::new(input, stdout()), &mut out);
            play_out(&mut session, first, &mut player)?;
        }
    }

    let record = engine.finish_session(&session)?;
    play::write_result_card(&mut out, &title, &record)?;
    out.flush()?;
    Ok(())
}

fn expand_scenarios<S: ScenarioStore>(
    engine: &TrainingEngine<S>,
    scenarios_arg: &str,
) -> Result<Vec<String>> {
    let mut scenarios = split_csv(scenarios_arg);
    if scenarios.iter().any(|s| s == "all") {
        scenarios.retain(|s| s != "all");
        for id in engine.list_scenarios()? {
            if !scenarios.contains(&id) {
                scenarios.push(id);
            }
        }
    }
    Ok(scenarios)
}

fn parse_policies(policies_arg: &str) -> Result<Vec<PlayStrategy>> {
    split_csv(policies_arg)
        .iter()
        .map(|name| {
            PlayStrategy::parse(name).ok_or_else(|| anyhow!("unknown policy '{name}'"))
        })
        .collect()
}

fn run_drills<S: ScenarioStore>(
    engine: &TrainingEngine<S>,
    scenarios_arg: &str,
    policies_arg: &str,
    seeds_arg: &str,
    report: ReportFormat,
    output: Option<PathBuf>,
) -> Result<bool> {
    let start_time = Instant::now();
    let scenarios = expand_scenarios(engine, scenarios_arg)?;
    let policies = parse_policies(policies_arg)?;
    let seeds = parse_seeds(seeds_arg)?;
    if report == ReportFormat::Console && output.is_none() {
        announce_banner();
    }

    let runner = DrillRunner::new(engine.config().score.clone());
    let mut results: Vec<DrillResult> = Vec::new();
    for scenario_id in &scenarios {
        let scenario = match engine.scenario(scenario_id) {
            Ok(scenario) => scenario,
            Err(err) => {
                eprintln!("⚠️  Unknown scenario: {} ({err})", scenario_id.yellow());
                continue;
            }
        };
        for &strategy in &policies {
            for &seed in &seeds {
                results.push(runner.run(&scenario, strategy, seed));
            }
        }
    }

    let mut output_target = OutputTarget::new(output)?;
    match report {
        ReportFormat::Json => reports::write_json_report(&mut output_target, &results)?,
        ReportFormat::Markdown => reports::write_markdown_report(&mut output_target, &results)?,
        ReportFormat::Console => {
            reports::write_console_report(&mut output_target, &results, start_time.elapsed())?;
        }
    }
    output_target.flush_inner()?;

    Ok(results.iter().all(|r| r.passed))
}

async fn generate<S: ScenarioStore>(
    engine: &TrainingEngine<S>,
    topic: String,
    locale: &str,
    generator_cmd: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let locale =
        Locale::parse(locale).ok_or_else(|| anyhow!("unsupported locale '{locale}' (en, id)"))?;
    let generator = CommandGenerator::from_command_line(generator_cmd)
        .context("--generator-cmd must name a program")?;
    let gateway = GenerationGateway::new(generator, engine.config().retry.clone());
    let request = GenerationRequest::new(topic, locale);

    println!("🧪 Generating '{}' ({locale})...", request.topic);
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let document = gateway.generate_until(&request, cancel).await?;
    let normalized = engine.import_str(&document)?;
    let scenario = &normalized.scenario;

    println!(
        "✅ Stored {} - {} ({} steps, repairs: {})",
        scenario.id.green(),
        scenario.title,
        scenario.steps.len(),
        normalized.report
    );
    if let Some(path) = output {
        let mut target = OutputTarget::new(Some(path))?;
        writeln!(target, "{}", serde_json::to_string_pretty(scenario)?)?;
        target.flush_inner()?;
    }
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}
