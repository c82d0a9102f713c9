//! Structured Prefill CLI
//!
//! Compile reply templates into wire constraints, check candidates against
//! them, decode payloads, and replay recorded streams.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use structured_prefill::pattern::plan_constraint;
use structured_prefill::slot::{load_template, TemplateValidator};
use structured_prefill::stream::{decoder, DecodeOutcome, Decoder};
use structured_prefill::{
    Controller, Dialect, GenerationRequest, GuardTrip, Host, PrefillConfig, StreamEvent,
    TurnTarget,
};

#[derive(Parser)]
#[command(name = "prefill")]
#[command(version)]
#[command(about = "Constrained reply starts for chat models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: prefill.toml in this directory or a parent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a candidate reply satisfies the assembled pattern
    Check {
        #[command(flatten)]
        template: TemplateArgs,

        #[command(flatten)]
        constraint: ConstraintArgs,

        /// Candidate reply text
        #[arg(long, conflicts_with = "candidate_file")]
        candidate: Option<String>,

        /// Read the candidate reply from a file
        #[arg(long)]
        candidate_file: Option<PathBuf>,
    },

    /// Compile a template and print the wire constraint
    Compile {
        #[command(flatten)]
        template: TemplateArgs,

        #[command(flatten)]
        constraint: ConstraintArgs,
    },

    /// Decode a raw structured payload
    Decode {
        /// Payload file (default: stdin)
        input: Option<PathBuf>,

        /// Newline token used when the payload was generated
        #[arg(long, default_value = "<br>")]
        newline_token: String,

        /// Map curly quotes back to straight quotes
        #[arg(long)]
        curly: bool,
    },

    /// Replay recorded payload snapshots through a session
    Replay {
        /// File with one JSON string per line, each the cumulative payload
        input: PathBuf,

        #[command(flatten)]
        template: TemplateArgs,

        #[command(flatten)]
        constraint: ConstraintArgs,

        /// Simulated time between snapshots
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },

    /// Validate a template
    Validate {
        #[command(flatten)]
        template: TemplateArgs,

        /// Pattern dialect
        #[arg(long)]
        dialect: Option<Dialect>,
    },
}

#[derive(Args)]
struct TemplateArgs {
    /// Template text
    #[arg(conflicts_with = "template_file")]
    template: Option<String>,

    /// Read the template from a file
    #[arg(long)]
    template_file: Option<PathBuf>,
}

#[derive(Args)]
struct ConstraintArgs {
    /// Pattern dialect (default, conservative)
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Minimum continuation length after the template
    #[arg(long)]
    min_chars: Option<usize>,

    /// File of banned phrases, one per line
    #[arg(long)]
    ban_file: Option<PathBuf>,

    /// Names accepted by [[name]] slots
    #[arg(long, value_delimiter = ',')]
    names: Vec<String>,

    /// Existing message to continue
    #[arg(long)]
    continue_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Check {
            template,
            constraint,
            candidate,
            candidate_file,
        } => cmd_check(
            cli.config.as_ref(),
            &template,
            &constraint,
            candidate,
            candidate_file.as_ref(),
        ),
        Commands::Compile {
            template,
            constraint,
        } => cmd_compile(cli.config.as_ref(), &template, &constraint),
        Commands::Decode {
            input,
            newline_token,
            curly,
        } => cmd_decode(input.as_ref(), &newline_token, curly, cli.verbose),
        Commands::Replay {
            input,
            template,
            constraint,
            interval_ms,
        } => cmd_replay(
            cli.config.as_ref(),
            &input,
            &template,
            &constraint,
            interval_ms,
        ),
        Commands::Validate { template, dialect } => {
            cmd_validate(cli.config.as_ref(), &template, dialect)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

// =============================================================================
// Shared setup
// =============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<PrefillConfig> {
    match path {
        Some(path) => PrefillConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => PrefillConfig::load_from_cwd().context("Failed to load prefill.toml"),
    }
}

fn read_template(args: &TemplateArgs) -> Result<String> {
    if let Some(path) = &args.template_file {
        return load_template(path)
            .with_context(|| format!("Failed to read template: {}", path.display()));
    }
    Ok(args.template.clone().unwrap_or_default())
}

fn read_text(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text.strip_suffix('\n').unwrap_or(&text).to_string())
}

/// Fold command-line overrides into the loaded config
fn apply_overrides(config: &mut PrefillConfig, args: &ConstraintArgs) -> Result<()> {
    if let Some(dialect) = args.dialect {
        config.compiler.dialect = dialect;
    }
    if let Some(min) = args.min_chars {
        config.assembly.min_continuation_chars = min;
    }
    if let Some(path) = &args.ban_file {
        let phrases = read_text(path)?;
        if !config.ban_list.text.is_empty() {
            config.ban_list.text.push('\n');
        }
        config.ban_list.text.push_str(&phrases);
    }
    config.compiler.known_names.extend(args.names.iter().cloned());
    Ok(())
}

fn read_continuation(args: &ConstraintArgs) -> Result<Option<String>> {
    args.continue_file.as_deref().map(read_text).transpose()
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_compile(
    config: Option<&PathBuf>,
    template: &TemplateArgs,
    args: &ConstraintArgs,
) -> Result<()> {
    let mut config = load_config(config)?;
    apply_overrides(&mut config, args)?;
    let template = read_template(template)?;
    let base = read_continuation(args)?;

    let plan = plan_constraint(&template, base.as_deref(), &config);
    for diagnostic in &plan.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
    println!(
        "{}",
        plan.wire
            .to_json_pretty()
            .context("Failed to serialize constraint")?
    );
    Ok(())
}

fn cmd_check(
    config: Option<&PathBuf>,
    template: &TemplateArgs,
    args: &ConstraintArgs,
    candidate: Option<String>,
    candidate_file: Option<&PathBuf>,
) -> Result<()> {
    let candidate = match (candidate, candidate_file) {
        (Some(text), _) => text,
        (None, Some(path)) => read_text(path)?,
        (None, None) => anyhow::bail!("check requires --candidate or --candidate-file"),
    };

    let mut config = load_config(config)?;
    apply_overrides(&mut config, args)?;
    let template = read_template(template)?;
    let base = read_continuation(args)?;

    let plan = plan_constraint(&template, base.as_deref(), &config);
    for diagnostic in &plan.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
    let matcher = plan
        .constraint
        .matcher()
        .context("Assembled pattern does not compile")?;

    if matcher.is_match(&candidate) {
        println!("✓ Candidate MATCHES ({} chars)", candidate.chars().count());
        return Ok(());
    }

    println!("✗ Candidate does NOT match");
    if let Some(phrase) = config.ban_list().first_banned(&candidate) {
        println!("    contains banned phrase {:?}", phrase);
    }
    anyhow::bail!("Candidate does not satisfy the constraint")
}

fn cmd_decode(
    input: Option<&PathBuf>,
    newline_token: &str,
    curly: bool,
    verbose: bool,
) -> Result<()> {
    let raw = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read stdin")?;
            raw
        }
    };

    if verbose {
        match decoder::extract(&raw) {
            Some((layer, _)) => eprintln!("layer: {:?}", layer),
            None => eprintln!("layer: none"),
        }
    }

    let mut decoder = Decoder::new(newline_token, curly);
    match decoder.decode(&raw) {
        DecodeOutcome::Text(text) => {
            println!("{}", text);
            Ok(())
        }
        DecodeOutcome::Pending => anyhow::bail!("Payload contains no decodable text yet"),
    }
}

/// Host that records the displayed text and reports guard trips
struct ReplayHost {
    text: String,
    applies: usize,
    trip: Option<String>,
}

impl Host for ReplayHost {
    fn target(&self) -> TurnTarget {
        TurnTarget::default()
    }

    fn apply(&mut self, _target: TurnTarget, text: &str) {
        self.applies += 1;
        self.text = text.to_string();
    }

    fn abort(&mut self, trip: &GuardTrip) {
        eprintln!("⚠ {}", trip);
        self.trip = Some(trip.to_string());
    }
}

fn cmd_replay(
    config: Option<&PathBuf>,
    input: &Path,
    template: &TemplateArgs,
    args: &ConstraintArgs,
    interval_ms: u64,
) -> Result<()> {
    let mut config = load_config(config)?;
    apply_overrides(&mut config, args)?;
    let template = read_template(template)?;
    let base = read_continuation(args)?;

    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let snapshots = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<String>(line)
                .with_context(|| format!("Line {} is not a JSON string", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    let grace = Duration::from_millis(config.session.grace_ms);
    let mut host = ReplayHost {
        text: base.clone().unwrap_or_default(),
        applies: 0,
        trip: None,
    };
    let mut controller = Controller::new(config);
    let mut request = GenerationRequest::new(template, TurnTarget::default());
    if let Some(base) = base {
        request = request.continuing(base);
    }

    let start = Instant::now();
    controller.begin(request, start, &mut host);
    let mut now = start;
    let mut fed = 0;
    for raw in snapshots {
        now += Duration::from_millis(interval_ms);
        controller.handle(StreamEvent::Chunk(raw), now, &mut host);
        controller.tick(now, &mut host);
        fed += 1;
        if host.trip.is_some() {
            break;
        }
    }

    if host.trip.is_some() {
        controller.handle(StreamEvent::Stopped, now, &mut host);
        controller.tick(now + grace, &mut host);
    } else {
        controller.handle(StreamEvent::Finalized, now, &mut host);
    }

    log::info!("replayed {} snapshots, {} applies", fed, host.applies);
    println!("{}", host.text);
    Ok(())
}

fn cmd_validate(
    config: Option<&PathBuf>,
    template: &TemplateArgs,
    dialect: Option<Dialect>,
) -> Result<()> {
    let config = load_config(config)?;
    let dialect = dialect.unwrap_or(config.compiler.dialect);

    let mut validator = TemplateValidator::new(dialect);
    let result = match &template.template_file {
        Some(path) => validator
            .validate_file(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?,
        None => validator.validate(template.template.as_deref().unwrap_or_default()),
    };

    println!("{}", result.summary());

    if !result.errors.is_empty() {
        println!("\n  Errors ({}):", result.errors.len());
        for error in &result.errors {
            println!("    ✗ {}", error);
        }
    }

    if !result.warnings.is_empty() {
        println!("\n  Warnings ({}):", result.warnings.len());
        for warning in &result.warnings {
            println!("    ⚠ {}", warning);
        }
    }

    if !result.is_valid() {
        anyhow::bail!(
            "Template validation failed with {} errors",
            result.errors.len()
        );
    }
    Ok(())
}
