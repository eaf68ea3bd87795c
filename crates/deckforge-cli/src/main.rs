use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use deckforge_contracts::deck::{DeckStyle, DECK_SIZE};
use deckforge_contracts::events::EventWriter;
use deckforge_contracts::styles::{
    backgrounds, format_menu, resolve_choice, techniques, StyleCatalogue,
};
use deckforge_engine::batch::DEFAULT_MODEL;
use deckforge_engine::local::{
    render_test_card, DEFAULT_LOCAL_BACKGROUND, DEFAULT_LOCAL_TECHNIQUE, DEFAULT_LOCAL_THEME,
};
use deckforge_engine::retry::DEFAULT_MAX_RETRY_ROUNDS;
use deckforge_engine::{
    run_deck_batch, BatchContext, BatchSettings, Device, DiffusionPipeline, DryrunPipeline,
    GeminiBatchService, GenerationMode, LocalDeckRunner, OutputLayout, PollSettings,
    RenderSettings, RetryController, WebUiPipeline,
};
use serde_json::json;

const DEFAULT_BATCH_THEME: &str = "Baseball";

#[derive(Debug, Parser)]
#[command(name = "deckforge", version, about = "Themed playing-card deck generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a full deck through the Gemini Batch API.
    Batch(BatchArgs),
    /// Render cards one at a time on a local diffusion backend.
    Local(LocalArgs),
    /// Report the device, probe the backend and render one test card.
    CheckSetup(CheckSetupArgs),
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[arg(long)]
    theme: Option<String>,
    /// Technique menu number (1-16).
    #[arg(long)]
    technique: Option<String>,
    /// Background menu number (1-16).
    #[arg(long)]
    background: Option<String>,
    /// Skip prompts: defaults for anything missing, yes to every question.
    #[arg(long)]
    yes: bool,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// Seconds between status polls.
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,
    /// Give up waiting after this many seconds.
    #[arg(long)]
    poll_timeout: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_MAX_RETRY_ROUNDS)]
    max_retries: usize,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Webui,
    Dryrun,
}

#[derive(Debug, Parser)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["single_card", "card_back", "full_deck"])
))]
struct LocalArgs {
    #[arg(long, default_value = "card_images_local")]
    output_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_LOCAL_THEME)]
    theme: String,
    #[arg(long, default_value = DEFAULT_LOCAL_TECHNIQUE)]
    technique: String,
    #[arg(long, default_value = DEFAULT_LOCAL_BACKGROUND)]
    background: String,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    seed: Option<i64>,
    /// cuda, mps or cpu; detected when omitted.
    #[arg(long)]
    device: Option<String>,
    #[arg(long, value_enum, default_value_t = Backend::Webui)]
    backend: Backend,
    #[arg(long)]
    webui_url: Option<String>,
    /// 512x896 at 4 steps unless overridden.
    #[arg(long)]
    fast: bool,
    #[arg(long)]
    yes: bool,
    #[arg(long, num_args = 2, value_names = ["VALUE", "SUIT"])]
    single_card: Option<Vec<String>>,
    #[arg(long)]
    card_back: bool,
    #[arg(long)]
    full_deck: bool,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct CheckSetupArgs {
    #[arg(long, value_enum, default_value_t = Backend::Webui)]
    backend: Backend,
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    webui_url: Option<String>,
    #[arg(long, default_value = "test_output")]
    output_dir: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("deckforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Batch(args) => run_batch(args),
        Command::Local(args) => run_local(args),
        Command::CheckSetup(args) => run_check_setup(args),
    }
}

/// Line-oriented questions over any reader/writer pair.
struct Prompter<R, W> {
    input: R,
    output: W,
    assume_yes: bool,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    fn new(input: R, output: W, assume_yes: bool) -> Self {
        Self {
            input,
            output,
            assume_yes,
        }
    }

    /// Trimmed answer; `None` on end of input or when prompts are skipped.
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        if self.assume_yes {
            return Ok(None);
        }
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Yes/no question. `empty_means_yes` lets a bare Enter accept.
    fn confirm(&mut self, question: &str, empty_means_yes: bool) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let Some(answer) = self.ask(question)? else {
            return Ok(false);
        };
        Ok(match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => true,
            "" => empty_means_yes,
            _ => false,
        })
    }

    fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }

    fn choose(
        &mut self,
        preset: Option<&str>,
        title: &str,
        question: &str,
        catalogue: &StyleCatalogue,
    ) -> Result<(String, &'static str, &'static str)> {
        let choice = match preset {
            Some(choice) => choice.to_string(),
            None => {
                if !self.assume_yes {
                    self.say(&format_menu(title, catalogue))?;
                }
                self.ask(question)?.unwrap_or_default()
            }
        };
        let (key, option) = resolve_choice(catalogue, &choice);
        self.say(&format!("  → Selected: {}", option.label))?;
        Ok((key, option.label, option.description))
    }
}

/// Deck style plus the labels shown back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BatchSelection {
    style: DeckStyle,
    technique_label: &'static str,
    background_label: &'static str,
}

fn select_batch_style<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    args: &BatchArgs,
) -> Result<BatchSelection> {
    let theme = match args.theme.as_deref().map(str::trim) {
        Some(theme) if !theme.is_empty() => theme.to_string(),
        Some(_) => DEFAULT_BATCH_THEME.to_string(),
        None => prompter
            .ask("\nEnter theme for your deck (e.g., Pirates, Cyberpunk, Medieval, Cats): ")?
            .filter(|theme| !theme.is_empty())
            .unwrap_or_else(|| DEFAULT_BATCH_THEME.to_string()),
    };
    let (_, technique_label, technique) = prompter.choose(
        args.technique.as_deref(),
        "ART TECHNIQUES",
        "Select technique (1-16): ",
        &techniques(),
    )?;
    let (_, background_label, background) = prompter.choose(
        args.background.as_deref(),
        "BACKGROUND STYLES",
        "Select background (1-16): ",
        &backgrounds(),
    )?;
    Ok(BatchSelection {
        style: DeckStyle::new(theme, technique, background),
        technique_label,
        background_label,
    })
}

fn batch_settings(args: &BatchArgs) -> BatchSettings {
    BatchSettings {
        model: args.model.clone(),
        poll: PollSettings {
            interval: Duration::from_secs(args.poll_interval),
            timeout: args.poll_timeout.map(Duration::from_secs),
        },
        max_retry_rounds: args.max_retries,
    }
}

fn new_event_writer(path: Option<PathBuf>, default_dir: &Path, prefix: &str) -> EventWriter {
    let run_id = format!("{prefix}-{}", uuid::Uuid::new_v4());
    EventWriter::new(
        path.unwrap_or_else(|| default_dir.join("events.jsonl")),
        run_id,
    )
}

/// Marks `flag` on the first Ctrl-C. Returns `true` when it was already set,
/// i.e. the user pressed Ctrl-C twice.
fn on_interrupt(flag: &AtomicBool) -> bool {
    let repeated = flag.swap(true, Ordering::SeqCst);
    if repeated {
        eprintln!("\nInterrupted again, exiting.");
    } else {
        eprintln!("\nInterrupt received. Stopping after the current step.");
        eprintln!("Press Ctrl-C again to quit immediately.");
    }
    repeated
}

/// Routes Ctrl-C into a stop flag shared with the running pipeline.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    let installed = ctrlc::set_handler(move || {
        if on_interrupt(&handler_flag) {
            std::process::exit(130);
        }
    });
    if let Err(err) = installed {
        eprintln!("Warning: Ctrl-C will not stop the run cleanly: {err}");
    }
    flag
}

/// Shows the failed cards and asks for another round. An unreadable answer
/// is reported and treated as "no".
fn ask_retry<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    round: usize,
    max_rounds: usize,
    failed: &[String],
) -> bool {
    let rule = "═".repeat(60);
    let header = format!(
        "\n{rule}\n  {} cards failed. Retry {round}/{max_rounds}\n{rule}\n  Failed cards: {}",
        failed.len(),
        failed.join(", ")
    );
    let answer = prompter
        .say(&header)
        .and_then(|()| prompter.confirm("\nRetry failed cards? (y/n): ", false));
    match answer {
        Ok(answer) => answer,
        Err(err) => {
            eprintln!("Could not read retry answer, skipping retries: {err:#}");
            false
        }
    }
}

fn run_batch(args: BatchArgs) -> Result<i32> {
    let stdin = io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), io::stdout(), args.yes);
    let rule = "─".repeat(60);

    println!("\n{}", "═".repeat(60));
    println!("  PLAYING CARD DECK GENERATOR");
    println!("{}", "═".repeat(60));

    let selection = select_batch_style(&mut prompter, &args)?;
    println!("\n{rule}\n  SUMMARY\n{rule}");
    println!("  Theme:      {}", selection.style.theme);
    println!("  Technique:  {}", selection.technique_label);
    println!("  Background: {}", selection.background_label);
    println!("  Cards:      {} fronts + 1 card back design", DECK_SIZE - 1);
    println!("{rule}\n");
    if !prompter.confirm("Ready to generate? (y/n): ", true)? {
        println!("Cancelled.");
        return Ok(0);
    }

    let settings = batch_settings(&args);
    let service = GeminiBatchService::from_env()?;
    let events = new_event_writer(args.events.clone(), &args.workdir, "deck");
    events.emit_json(
        "run_started",
        json!({
            "pipeline": "batch",
            "theme": selection.style.theme,
            "technique": selection.style.technique,
            "background": selection.style.background,
            "model": settings.model,
        }),
    )?;

    let ctx = BatchContext::new(
        Box::new(service),
        OutputLayout::new(&args.workdir),
        settings.model.clone(),
        events.clone(),
    )
    .with_poll(settings.poll)
    .with_cancel_flag(install_interrupt_handler());
    println!("Batch service: {} (run {})", ctx.service_name(), events.run_id());
    let retry = RetryController::new(settings.max_retry_rounds);
    let max_rounds = settings.max_retry_rounds;

    let outcome = run_deck_batch(&ctx, &selection.style, &retry, &mut |round, failed| {
        ask_retry(&mut prompter, round, max_rounds, failed)
    })?;

    events.emit_json(
        "run_finished",
        json!({
            "pipeline": "batch",
            "job": outcome.job_name,
            "state": outcome.job_state.as_str(),
            "images_written": outcome.images_written,
            "failed": outcome.failed_keys.len(),
        }),
    )?;
    Ok(if outcome.produced_images() { 0 } else { 1 })
}

fn resolve_device(raw: Option<&str>) -> Result<Device> {
    match raw {
        Some(value) => value.parse(),
        None => Ok(Device::detect()),
    }
}

fn build_pipeline(
    backend: Backend,
    device: Device,
    webui_url: Option<&str>,
) -> Box<dyn DiffusionPipeline> {
    match backend {
        Backend::Webui => {
            let pipeline = match webui_url {
                Some(url) => WebUiPipeline::new(url, device),
                None => WebUiPipeline::from_env(device),
            };
            println!("WebUI endpoint: {}", pipeline.base_url());
            Box::new(pipeline)
        }
        Backend::Dryrun => Box::new(DryrunPipeline::new(device)),
    }
}

fn render_settings(args: &LocalArgs) -> RenderSettings {
    let base = if args.fast {
        RenderSettings::fast()
    } else {
        RenderSettings::default()
    };
    RenderSettings {
        width: args.width.unwrap_or(base.width),
        height: args.height.unwrap_or(base.height),
        steps: args.steps.unwrap_or(base.steps),
        seed: args.seed,
        ..base
    }
}

fn generation_mode(args: &LocalArgs) -> Result<GenerationMode> {
    if let Some(card) = &args.single_card {
        let [value, suit] = card.as_slice() else {
            bail!("--single-card takes VALUE and SUIT");
        };
        return Ok(GenerationMode::SingleCard {
            value: value.clone(),
            suit: suit.clone(),
        });
    }
    if args.card_back {
        return Ok(GenerationMode::CardBack);
    }
    if args.full_deck {
        return Ok(GenerationMode::FullDeck);
    }
    bail!("choose one of --single-card VALUE SUIT, --card-back or --full-deck")
}

fn run_local(args: LocalArgs) -> Result<i32> {
    let device = resolve_device(args.device.as_deref())?;
    let mode = generation_mode(&args)?;
    let settings = render_settings(&args);
    println!("Using device: {device}");

    if device == Device::Cpu && args.backend == Backend::Webui {
        println!("Warning: rendering on CPU is very slow (minutes per card).");
        let stdin = io::stdin();
        let mut prompter = Prompter::new(stdin.lock(), io::stdout(), args.yes);
        if !prompter.confirm("\nContinue anyway? (y/n): ", false)? {
            println!("Cancelled.");
            return Ok(0);
        }
    }

    let events = new_event_writer(args.events.clone(), &args.output_dir, "local");
    let pipeline = build_pipeline(args.backend, device, args.webui_url.as_deref());
    events.emit_json(
        "run_started",
        json!({
            "pipeline": pipeline.name(),
            "device": device.as_str(),
            "theme": args.theme,
            "width": settings.width,
            "height": settings.height,
            "steps": settings.steps,
        }),
    )?;

    let runner = LocalDeckRunner::new(
        pipeline,
        settings,
        DeckStyle::new(&args.theme, &args.technique, &args.background),
        &args.output_dir,
        events.clone(),
    )
    .with_stop_flag(install_interrupt_handler());
    println!("Run id: {}", events.run_id());
    let summary = runner.run(&mode)?;
    events.emit_json(
        "run_finished",
        json!({
            "pipeline": summary.pipeline,
            "completed": summary.completed,
            "failed": summary.failed,
            "interrupted": summary.interrupted,
            "total_time": summary.total_time,
        }),
    )?;
    Ok(if summary.completed > 0 { 0 } else { 1 })
}

fn run_check_setup(args: CheckSetupArgs) -> Result<i32> {
    let device = resolve_device(args.device.as_deref())?;
    println!("Detected device: {device}");
    let pipeline = build_pipeline(args.backend, device, args.webui_url.as_deref());
    let status = pipeline
        .probe()
        .with_context(|| format!("{} backend is not ready", pipeline.name()))?;
    println!("{status}");
    let path = render_test_card(pipeline.as_ref(), &RenderSettings::fast(), &args.output_dir)?;
    println!("Setup OK. Inspect {}", path.display());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn batch_args(extra: &[&str]) -> BatchArgs {
        let mut argv = vec!["deckforge", "batch"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Batch(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn local_args(extra: &[&str]) -> Result<LocalArgs, clap::Error> {
        let mut argv = vec!["deckforge", "local"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv)?.command {
            Command::Local(args) => Ok(args),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn interactive_selection_reads_theme_and_menu_choices() -> Result<()> {
        let input = Cursor::new("Pirates\n7\n99\n");
        let mut output = Vec::new();
        let mut prompter = Prompter::new(input, &mut output, false);

        let selection = select_batch_style(&mut prompter, &batch_args(&[]))?;
        assert_eq!(selection.style.theme, "Pirates");
        assert_eq!(selection.technique_label, "Japanese Ukiyo-e");
        assert_eq!(selection.background_label, "Parchment");
        assert!(selection.style.background.contains("parchment"));

        let shown = String::from_utf8(output)?;
        assert!(shown.contains("ART TECHNIQUES"));
        assert!(shown.contains("Select background (1-16): "));
        Ok(())
    }

    #[test]
    fn blank_answers_fall_back_to_defaults() -> Result<()> {
        let mut output = Vec::new();
        let mut prompter = Prompter::new(Cursor::new("\n\n\n"), &mut output, false);
        let selection = select_batch_style(&mut prompter, &batch_args(&[]))?;
        assert_eq!(selection.style.theme, DEFAULT_BATCH_THEME);
        assert_eq!(selection.technique_label, "Vintage Lithograph");
        assert_eq!(selection.background_label, "Parchment");
        Ok(())
    }

    #[test]
    fn flags_skip_prompts() -> Result<()> {
        let args = batch_args(&[
            "--theme",
            "Cats",
            "--technique",
            "16",
            "--background",
            "12",
            "--yes",
        ]);
        let mut output = Vec::new();
        let mut prompter = Prompter::new(Cursor::new(""), &mut output, args.yes);
        let selection = select_batch_style(&mut prompter, &args)?;
        assert_eq!(selection.style.theme, "Cats");
        assert_eq!(selection.technique_label, "Tarot Card");
        assert_eq!(selection.background_label, "Starry Night");
        assert!(!String::from_utf8(output)?.contains("ART TECHNIQUES"));
        Ok(())
    }

    #[test]
    fn confirm_distinguishes_generation_and_retry_answers() -> Result<()> {
        let mut output = Vec::new();
        let mut prompter = Prompter::new(Cursor::new("\nYES\nn\n\n"), &mut output, false);
        assert!(prompter.confirm("go? ", true)?);
        assert!(prompter.confirm("go? ", false)?);
        assert!(!prompter.confirm("go? ", true)?);
        assert!(!prompter.confirm("retry? ", false)?);
        assert!(!prompter.confirm("eof? ", true)?);
        Ok(())
    }

    /// Reader whose every read fails, like a closed terminal.
    struct BrokenInput;

    impl io::Read for BrokenInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "terminal went away"))
        }
    }

    #[test]
    fn unreadable_retry_answer_means_no() {
        let failed = vec!["Hearts_01_Ace".to_string(), "Clubs_02_2".to_string()];
        let mut output = Vec::new();
        let mut prompter = Prompter::new(io::BufReader::new(BrokenInput), &mut output, false);

        assert!(!ask_retry(&mut prompter, 1, 3, &failed));
        let shown = String::from_utf8_lossy(&output);
        assert!(shown.contains("2 cards failed. Retry 1/3"));
        assert!(shown.contains("Failed cards: Hearts_01_Ace, Clubs_02_2"));
    }

    #[test]
    fn retry_answers_follow_input_and_yes_flag() {
        let failed = vec!["Hearts_01_Ace".to_string()];
        let mut output = Vec::new();
        let mut prompter = Prompter::new(Cursor::new("y\n\n"), &mut output, false);
        assert!(ask_retry(&mut prompter, 1, 3, &failed));
        assert!(!ask_retry(&mut prompter, 2, 3, &failed));

        let mut prompter = Prompter::new(io::BufReader::new(BrokenInput), Vec::new(), true);
        assert!(ask_retry(&mut prompter, 1, 3, &failed));
    }

    #[test]
    fn second_interrupt_requests_exit() {
        let flag = AtomicBool::new(false);
        assert!(!on_interrupt(&flag));
        assert!(flag.load(Ordering::SeqCst));
        assert!(on_interrupt(&flag));
    }

    #[test]
    fn event_writer_run_ids_carry_the_pipeline_prefix() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events = new_event_writer(None, temp.path(), "deck");
        assert!(events.run_id().starts_with("deck-"));
        assert_eq!(events.run_id().len(), "deck-".len() + 36);
        assert_ne!(
            events.run_id(),
            new_event_writer(None, temp.path(), "deck").run_id()
        );
        Ok(())
    }

    #[test]
    fn batch_flags_map_to_settings() {
        let args = batch_args(&[
            "--poll-interval",
            "3",
            "--poll-timeout",
            "600",
            "--max-retries",
            "1",
        ]);
        let settings = batch_settings(&args);
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.poll.interval, Duration::from_secs(3));
        assert_eq!(settings.poll.timeout, Some(Duration::from_secs(600)));
        assert_eq!(settings.max_retry_rounds, 1);
        assert_eq!(batch_settings(&batch_args(&[])).poll.timeout, None);
    }

    #[test]
    fn local_flags_pick_mode_and_render_settings() -> Result<()> {
        let args = local_args(&["--single-card", "Queen", "Clubs", "--fast", "--steps", "6"])
            .map_err(anyhow::Error::new)?;
        assert_eq!(
            generation_mode(&args)?,
            GenerationMode::SingleCard {
                value: "Queen".to_string(),
                suit: "Clubs".to_string()
            }
        );
        let settings = render_settings(&args);
        assert_eq!((settings.width, settings.height, settings.steps), (512, 896, 6));
        assert_eq!(args.theme, DEFAULT_LOCAL_THEME);
        assert_eq!(args.backend, Backend::Webui);

        let full = local_args(&["--full-deck", "--backend", "dryrun", "--seed", "42"])
            .map_err(anyhow::Error::new)?;
        assert_eq!(generation_mode(&full)?, GenerationMode::FullDeck);
        assert_eq!(render_settings(&full).seed, Some(42));
        assert_eq!(render_settings(&full).width, 640);
        Ok(())
    }

    #[test]
    fn local_requires_exactly_one_mode() {
        assert!(local_args(&[]).is_err());
        assert!(local_args(&["--card-back", "--full-deck"]).is_err());
        assert!(local_args(&["--single-card", "Ace"]).is_err());
    }

    #[test]
    fn explicit_device_overrides_detection() -> Result<()> {
        assert_eq!(resolve_device(Some("mps"))?, Device::Mps);
        assert!(resolve_device(Some("gpu")).is_err());
        Ok(())
    }

    #[test]
    fn dryrun_local_run_writes_cards_and_events() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("cards");
        let out_arg = out.to_string_lossy().to_string();
        let args = local_args(&[
            "--card-back",
            "--backend",
            "dryrun",
            "--device",
            "cpu",
            "--width",
            "16",
            "--height",
            "28",
            "--output-dir",
            &out_arg,
        ])
        .map_err(anyhow::Error::new)?;

        assert_eq!(run_local(args)?, 0);
        assert!(out.join("ZZ_ZZ_00_Card-Back.png").exists());
        assert!(out.join("batch_results.json").exists());
        let events = std::fs::read_to_string(out.join("events.jsonl"))?;
        assert!(events.contains("\"type\":\"run_started\""));
        assert!(events.contains("\"type\":\"local_card\""));
        assert!(events.contains("\"type\":\"run_finished\""));
        Ok(())
    }
}
