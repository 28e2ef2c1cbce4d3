use clap::{Args, Parser, Subcommand, ValueEnum};
use prose_adapters::{create_llm_adapter, AdapterError, LanguageModelError, ProfileModelProvider};
use prose_core::experiment::RESULTS_FILE;
use prose_core::report::{EXPERIMENT_REPORT_FILE, RANKING_REPORT_FILE};
use prose_core::text::last_words;
use prose_core::{
    gather_final_versions, load_rankings, render_editor_report, render_experiment_report,
    render_ranking_report, validate_revision, write_report, ChangeList, ChapterRewrite,
    ConfigError, ConfigStore, DraftError, DraftMode, DraftRequest, DraftService, DraftVersion,
    EditorError, EditorPanel, EditorRequest, ExperimentError, ExperimentPlan, ExperimentResult,
    ExperimentRunner, ExperimentStatus, FeedbackError, LanguageModel, LogLevel, LogRecord,
    LogSink, PromptError, PromptRegistry, Ranker, RankingError, ReportError, RevisionRequest,
    RevisionService, SanityChecker, SanityRequest, SegmentError, SegmentOptions, Segmenter,
    SharedLogSink, SinkLogger, SmartOptions, SourceLoader, SplitMode, StdoutLogSink, VoiceSpec,
    VoiceSpecError,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const RAW_ENDING_WORDS: usize = 60;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let (min_level, filter) = if cli.verbose {
        (LogLevel::Debug, log::LevelFilter::Debug)
    } else {
        (LogLevel::Info, log::LevelFilter::Info)
    };
    let shared: SharedLogSink = Arc::new(StdoutLogSink::with_min_level(min_level));
    if SinkLogger::new(Arc::clone(&shared), filter).install().is_err() {
        shared.log(LogRecord::new(
            LogLevel::Warn,
            "a logger was already installed; adapter logs keep their previous destination",
        ));
    }
    let sink = shared.as_ref();

    match cli.command {
        Command::Config(command) => handle_config(&cli.config, command, sink),
        Command::Segment(args) => run_segment(&cli.config, args, sink),
        Command::Draft(args) => run_draft(&cli.config, args, sink),
        Command::Revise(args) => run_revise(&cli.config, args, sink),
        Command::Validate(args) => run_validate(args, sink),
        Command::Editor(args) => run_editor(&cli.config, args, sink),
        Command::Sanity(args) => run_sanity(&cli.config, args, sink),
        Command::Rank(args) => run_rank(&cli.config, args, sink),
        Command::Experiment(command) => handle_experiment(&cli.config, command, sink),
        Command::Report(command) => handle_report(&cli.config, command, sink),
    }
}

fn handle_config(
    config_path: &Path,
    command: ConfigCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::TestLlm(args) => run_test_llm(config_path, args, sink),
    }
}

fn handle_experiment(
    config_path: &Path,
    command: ExperimentCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ExperimentCommand::Run(args) => run_experiments(config_path, args, sink),
        ExperimentCommand::List(args) => run_list_experiments(args, sink),
    }
}

fn handle_report(
    config_path: &Path,
    command: ReportCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ReportCommand::Ranking(args) => run_ranking_report(config_path, args, sink),
        ReportCommand::Experiments(args) => run_experiment_report(config_path, args, sink),
    }
}

fn run_test_llm(config_path: &Path, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.interface)?;
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| CliError::UnknownInterface(selected.clone()))?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Testing LLM profile: {selected}"),
    ));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!(
            "model: {} | interface: {} | base url: {}",
            profile.model_name, profile.interface_format, profile.base_url
        ),
    ));

    let adapter = create_llm_adapter(store.config(), &selected)?;
    let response = adapter.invoke("Please reply 'OK'")?;
    if response.trim().is_empty() {
        sink.log(LogRecord::new(
            LogLevel::Error,
            "LLM test failed: empty response",
        ));
        return Err(CliError::TestFailed(
            "LLM test failed: empty response".to_string(),
        ));
    }

    sink.log(LogRecord::new(LogLevel::Info, "LLM test succeeded."));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!("reply: {response}"),
    ));

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_segment(config_path: &Path, args: SegmentArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let paths = &store.config().paths;
    let input = args.input.unwrap_or_else(|| paths.raw_dir.clone());
    let output = args.output.unwrap_or_else(|| paths.segments_dir.clone());

    let options = SegmentOptions {
        mode: args.mode.into(),
        write_csv: args.csv,
    };
    let outputs = Segmenter::new(sink)
        .with_options(options)
        .segment_path(&input, &output)?;

    let total: usize = outputs.iter().map(|o| o.segments.len()).sum();
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Segmented {} file(s) into {total} segment(s) under {}",
            outputs.len(),
            output.display()
        ),
    ));
    Ok(())
}

fn run_draft(config_path: &Path, args: DraftArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.llm.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let voice = VoiceSpec::load(&args.voice)?;
    let loader = SourceLoader::from_paths(&store.config().paths);

    let previous = args
        .previous
        .as_deref()
        .map(read_text)
        .transpose()?;
    let feedback = args
        .feedback
        .as_deref()
        .map(ChangeList::load)
        .transpose()?;
    let output_dir = args.output.clone().unwrap_or_else(|| {
        store
            .config()
            .paths
            .auditions_dir
            .join(&voice.persona)
    });

    let mut service = DraftService::new(&prompts, sink)
        .with_settings(store.config().writer.clone())
        .with_prompt_log(store.config().paths.prompt_log_dir());
    if let Some(retries) = args.llm.max_retries {
        service = service.with_max_retries(retries);
    }
    if let Some(temperature) = args.temperature {
        service = service.with_temperature(temperature);
    }

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Using LLM profile: {selected}"),
    ));
    let model = create_llm_adapter(store.config(), &selected)?;

    for chapter in &args.chapters {
        let source = loader.load(chapter)?;
        let draft = service.generate(
            model.as_ref(),
            &DraftRequest {
                chapter_id: &source.chapter_id,
                source: &source.text,
                voice: &voice,
                output_dir: output_dir.clone(),
                mode: args.mode.into(),
                previous_final: previous.as_deref(),
                feedback: feedback.as_ref(),
            },
        )?;
        sink.log(LogRecord::new(
            LogLevel::Info,
            format!(
                "{}: {} → {} words, written to {}",
                draft.chapter_id,
                draft.source_words,
                draft.draft_words,
                draft.path.display()
            ),
        ));
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_revise(config_path: &Path, args: ReviseArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.llm.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let voice = VoiceSpec::load(&args.voice)?;
    let draft = read_text(&args.draft)?;
    let change_list = ChangeList::load(&args.feedback)?;
    let raw_ending = load_raw_ending(&store, &args.chapter, sink);

    let output_path = args.output.clone().unwrap_or_else(|| {
        args.draft
            .with_file_name(format!("{}_revised.txt", args.chapter))
    });

    let mut service = RevisionService::new(&prompts, sink)
        .with_prompt_log(store.config().paths.prompt_log_dir());
    if let Some(retries) = args.llm.max_retries {
        service = service.with_max_retries(retries);
    }

    let model = create_llm_adapter(store.config(), &selected)?;
    let revised = service.revise(
        model.as_ref(),
        &RevisionRequest {
            chapter_id: &args.chapter,
            voice: &voice,
            current_draft: &draft,
            change_list: &change_list,
            raw_ending: raw_ending.as_deref(),
            output_path,
        },
    )?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Revision written to {} ({:+.1}% words)",
            revised.path.display(),
            revised.report.percent_change
        ),
    ));
    for warning in &revised.report.warnings {
        sink.log(LogRecord::new(LogLevel::Warn, warning.clone()));
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_validate(args: ValidateArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let original = read_text(&args.original)?;
    let revised = read_text(&args.revised)?;
    let change_list = match args.feedback.as_deref() {
        Some(path) => ChangeList::load(path)?,
        None => ChangeList::default(),
    };

    let report = validate_revision(&original, &revised, &change_list);
    println!("{}", serde_json::to_string_pretty(&report)?);
    for warning in &report.warnings {
        sink.log(LogRecord::new(LogLevel::Warn, warning.clone()));
    }
    Ok(())
}

fn run_editor(config_path: &Path, args: EditorArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.llm.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let voice = VoiceSpec::load(&args.voice)?;
    let sources = SourceLoader::from_paths(&store.config().paths);
    let chapters = ChapterRewrite::collect(&args.drafts, &sources)?;
    let output_dir = args.output.clone().unwrap_or_else(|| args.drafts.clone());

    let mut panel = EditorPanel::new(&prompts, sink)
        .with_context_limit(store.config().writer.context_limit_tokens);
    if let Some(retries) = args.llm.max_retries {
        panel = panel.with_max_retries(retries);
    }

    let model = create_llm_adapter(store.config(), &selected)?;
    let output = panel.review(
        model.as_ref(),
        &EditorRequest {
            voice: &voice,
            chapters: &chapters,
            round: args.round,
            output_dir,
        },
    )?;

    let report = &output.report;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Editor round {}: {} must / {} nice, accepted: {}",
            report.round,
            report.change_list.must.len(),
            report.change_list.nice.len(),
            report.accepted
        ),
    ));
    if args.html {
        let html_path = output.path.with_extension("html");
        write_report(&html_path, &render_editor_report(report))?;
        sink.log(LogRecord::new(
            LogLevel::Info,
            format!("Editor report written to {}", html_path.display()),
        ));
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_sanity(config_path: &Path, args: SanityArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.llm.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let previous = read_text(&args.previous)?;
    let current = read_text(&args.current)?;
    let change_list = ChangeList::load(&args.feedback)?;
    let raw_ending = load_raw_ending(&store, &args.chapter, sink);

    let mut checker = SanityChecker::new(&prompts, sink);
    if let Some(retries) = args.llm.max_retries {
        checker = checker.with_max_retries(retries);
    }

    let model = create_llm_adapter(store.config(), &selected)?;
    let outcome = checker.check(
        model.as_ref(),
        &SanityRequest {
            chapter_id: &args.chapter,
            previous_draft: &previous,
            new_draft: &current,
            change_list: &change_list,
            raw_ending: raw_ending.as_deref(),
            status_path: args.status.clone(),
        },
    )?;

    println!("{}", outcome.assessment);
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("{}: {}", args.chapter, outcome.verdict.as_str()),
    ));

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_rank(config_path: &Path, args: RankArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.llm.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let paths = store.config().paths.clone();
    let auditions_dir = args.auditions.clone().unwrap_or(paths.auditions_dir.clone());
    let reports_dir = args.output.clone().unwrap_or(paths.reports_dir.clone());
    let loader = SourceLoader::from_paths(&paths);

    let mut library = gather_final_versions(&auditions_dir)?;
    if !args.chapters.is_empty() {
        library.retain(|chapter, _| args.chapters.contains(chapter));
    }
    if library.is_empty() {
        return Err(CliError::NothingToRank(auditions_dir));
    }

    let mut ranker = Ranker::new(&prompts, sink).with_log_dir(paths.logs_dir.join("rankings"));
    if let Some(retries) = args.llm.max_retries {
        ranker = ranker.with_max_retries(retries);
    }
    let options = SmartOptions {
        initial_runs: args.runs.max(1),
        top_candidates: args.top.max(2),
        ..SmartOptions::default()
    };

    let model = create_llm_adapter(store.config(), &selected)?;
    let mut rng = rand::thread_rng();
    let mut results = Vec::with_capacity(library.len());
    for (chapter, finals) in library {
        if finals.len() < 2 {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("{chapter}: only one final version, skipping"),
            ));
            continue;
        }

        let versions: Vec<DraftVersion> = finals
            .into_iter()
            .map(|v| DraftVersion::new(v.experiment, v.text))
            .collect();
        let original = loader.load(&chapter).ok().map(|source| source.text);

        let result = match args.method {
            RankMethodArg::Simple => {
                ranker.rank(model.as_ref(), &chapter, &versions, original.as_deref())?
            }
            RankMethodArg::Smart => ranker.smart_rank(
                model.as_ref(),
                &chapter,
                &versions,
                original.as_deref(),
                &options,
                &mut rng,
            )?,
        };
        let saved = result.save(&reports_dir)?;
        if let Some(winner) = result.winner() {
            sink.log(LogRecord::new(
                LogLevel::Info,
                format!(
                    "{chapter}: winner {} ({})",
                    winner.label(),
                    saved.display()
                ),
            ));
        }
        results.push(result);
    }

    if !results.is_empty() {
        let html_path = reports_dir.join(RANKING_REPORT_FILE);
        write_report(&html_path, &render_ranking_report(&results))?;
        sink.log(LogRecord::new(
            LogLevel::Info,
            format!("Ranking report written to {}", html_path.display()),
        ));
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_experiments(
    config_path: &Path,
    args: ExperimentRunArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let plan = ExperimentPlan::load(&args.plan)?;
    let experiments = plan.select(args.filter.as_deref())?;
    if experiments.is_empty() {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            "no experiments match the filter",
        ));
        return Ok(());
    }

    let selected = select_llm_interface(&store, args.llm.llm_interface.clone())?;
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| CliError::UnknownInterface(selected.clone()))?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let paths = store.config().paths.clone();
    let auditions_dir = args.output.clone().unwrap_or(paths.auditions_dir.clone());

    let mut runner = ExperimentRunner::new(
        &prompts,
        sink,
        SourceLoader::from_paths(&paths),
        &auditions_dir,
    )
    .with_settings(store.config().writer.clone())
    .with_prompt_log(paths.prompt_log_dir());
    if let Some(retries) = args.llm.max_retries {
        runner = runner.with_max_retries(retries);
    }

    let provider = ProfileModelProvider::new(profile);
    let results = runner.run_all(&provider, &experiments)?;

    let html_path = paths.reports_dir.join(EXPERIMENT_REPORT_FILE);
    write_report(&html_path, &render_experiment_report(&results))?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Experiment report written to {}", html_path.display()),
    ));

    store.touch_llm_interface(selected);
    store.save()?;

    let failed = results
        .iter()
        .filter(|r| r.status == ExperimentStatus::Failed)
        .count();
    if failed > 0 {
        return Err(CliError::ExperimentsFailed(failed));
    }
    Ok(())
}

fn run_list_experiments(args: ExperimentListArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let plan = ExperimentPlan::load(&args.plan)?;
    let experiments = plan.select(args.filter.as_deref())?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("{} experiment(s) in {}", experiments.len(), args.plan.display()),
    ));
    for experiment in &experiments {
        println!("{}", experiment.summary());
    }
    Ok(())
}

fn run_ranking_report(
    config_path: &Path,
    args: ReportArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let reports_dir = store.config().paths.reports_dir.clone();
    let input = args.input.unwrap_or_else(|| reports_dir.clone());
    let output = args
        .output
        .unwrap_or_else(|| reports_dir.join(RANKING_REPORT_FILE));

    let rankings = load_rankings(&input)?;
    if rankings.is_empty() {
        return Err(CliError::NothingToReport(input));
    }
    write_report(&output, &render_ranking_report(&rankings))?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Ranking report for {} chapter(s) written to {}",
            rankings.len(),
            output.display()
        ),
    ));
    Ok(())
}

fn run_experiment_report(
    config_path: &Path,
    args: ReportArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let paths = &store.config().paths;
    let input = args
        .input
        .unwrap_or_else(|| paths.auditions_dir.join(RESULTS_FILE));
    let output = args
        .output
        .unwrap_or_else(|| paths.reports_dir.join(EXPERIMENT_REPORT_FILE));

    let results = ExperimentResult::load_all(&input)?;
    write_report(&output, &render_experiment_report(&results))?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Experiment report for {} run(s) written to {}",
            results.len(),
            output.display()
        ),
    ));
    Ok(())
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Closing words of the raw chapter, or `None` when the source cannot be found.
fn load_raw_ending(store: &ConfigStore, chapter: &str, sink: &dyn LogSink) -> Option<String> {
    match SourceLoader::from_paths(&store.config().paths).load(chapter) {
        Ok(source) => Some(last_words(&source.text, RAW_ENDING_WORDS)),
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("raw ending unavailable for {chapter}: {err}"),
            ));
            None
        }
    }
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().llm_profiles.contains_key(&name) {
            return Ok(name);
        }
        return Err(CliError::UnknownInterface(name));
    }

    if let Some(name) = store.last_llm_interface() {
        return Ok(name.to_string());
    }

    if let Some(name) = store.config().llm_profiles.keys().next() {
        return Ok(name.clone());
    }

    Err(CliError::MissingLlmProfile)
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("no LLM profile is configured")]
    MissingLlmProfile,
    #[error("no LLM profile named `{0}`")]
    UnknownInterface(String),
    #[error("failed to read `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("no final versions found under {0}")]
    NothingToRank(PathBuf),
    #[error("no ranking files found under {0}")]
    NothingToReport(PathBuf),
    #[error("{0} experiment(s) failed")]
    ExperimentsFailed(usize),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
    #[error("voice spec error: {0}")]
    Voice(#[from] VoiceSpecError),
    #[error("feedback error: {0}")]
    Feedback(#[from] FeedbackError),
    #[error("segmentation failed: {0}")]
    Segment(#[from] SegmentError),
    #[error("drafting failed: {0}")]
    Draft(#[from] DraftError),
    #[error("editor panel failed: {0}")]
    Editor(#[from] EditorError),
    #[error("ranking failed: {0}")]
    Ranking(#[from] RankingError),
    #[error("experiment failed: {0}")]
    Experiment(#[from] ExperimentError),
    #[error("report failed: {0}")]
    Report(#[from] ReportError),
    #[error("failed to serialise output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(name = "forgectl", about = "Segment, rewrite, critique and rank chapter drafts", version)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Log debug messages, including adapter retries
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Config related commands
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Split raw chapters into segments with stable ids
    Segment(SegmentArgs),
    /// Draft chapters in a voice
    Draft(DraftArgs),
    /// Apply an editor change list to a draft
    Revise(ReviseArgs),
    /// Compare an original and a revised draft without calling a model
    Validate(ValidateArgs),
    /// Run the two-critic editor panel over a drafts directory
    Editor(EditorArgs),
    /// Check that a new draft applied the change list
    Sanity(SanityArgs),
    /// Rank the final versions produced by experiments
    Rank(RankArgs),
    /// Run or inspect an experiment plan
    #[command(subcommand)]
    Experiment(ExperimentCommand),
    /// Render HTML reports from saved results
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send a test prompt through an LLM profile
    TestLlm(TestLlmArgs),
}

#[derive(Subcommand)]
enum ExperimentCommand {
    /// Run every selected experiment and write the results file
    Run(ExperimentRunArgs),
    /// Print the experiments a plan declares
    List(ExperimentListArgs),
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Ranking report from `*_ranking.json` files
    Ranking(ReportArgs),
    /// Experiment summary from the results file
    Experiments(ReportArgs),
}

#[derive(Args)]
struct LlmArgs {
    /// LLM profile to use; defaults to the most recently used one
    #[arg(long)]
    llm_interface: Option<String>,
    /// Attempts per model call (default 3)
    #[arg(long, value_name = "N")]
    max_retries: Option<usize>,
}

#[derive(Args)]
struct TestLlmArgs {
    /// Profile to test; defaults to the most recently used one
    #[arg(long)]
    interface: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitModeArg {
    Paragraph,
    Sentence,
}

impl From<SplitModeArg> for SplitMode {
    fn from(mode: SplitModeArg) -> Self {
        match mode {
            SplitModeArg::Paragraph => SplitMode::Paragraph,
            SplitModeArg::Sentence => SplitMode::Sentence,
        }
    }
}

#[derive(Args)]
struct SegmentArgs {
    /// Source file or directory; defaults to `paths.raw_dir`
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,
    /// Output directory; defaults to `paths.segments_dir`
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "paragraph")]
    mode: SplitModeArg,
    /// Also write a `seg_id,text` CSV per source
    #[arg(long)]
    csv: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DraftModeArg {
    Full,
    Segmented,
}

impl From<DraftModeArg> for DraftMode {
    fn from(mode: DraftModeArg) -> Self {
        match mode {
            DraftModeArg::Full => DraftMode::Full,
            DraftModeArg::Segmented => DraftMode::Segmented,
        }
    }
}

#[derive(Args)]
struct DraftArgs {
    /// Chapter ids or source paths
    #[arg(required = true, value_name = "CHAPTER")]
    chapters: Vec<String>,
    /// Voice spec (.md, .txt, .yaml)
    #[arg(long, value_name = "FILE")]
    voice: PathBuf,
    #[arg(long, value_enum, default_value = "full")]
    mode: DraftModeArg,
    /// Output directory; defaults to `{auditions_dir}/{persona}`
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Previous final chapter to iterate on
    #[arg(long, value_name = "FILE")]
    previous: Option<PathBuf>,
    /// Editor feedback (change list JSON) for the previous draft
    #[arg(long, value_name = "FILE")]
    feedback: Option<PathBuf>,
    #[arg(long)]
    temperature: Option<f32>,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct ReviseArgs {
    /// Chapter id, used for the raw ending and output name
    #[arg(long)]
    chapter: String,
    /// Draft to revise
    #[arg(long, value_name = "FILE")]
    draft: PathBuf,
    /// Change list JSON (`must`/`nice`, top-level or under `change_list`)
    #[arg(long, value_name = "FILE")]
    feedback: PathBuf,
    #[arg(long, value_name = "FILE")]
    voice: PathBuf,
    /// Defaults to `{chapter}_revised.txt` next to the draft
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(long, value_name = "FILE")]
    original: PathBuf,
    #[arg(long, value_name = "FILE")]
    revised: PathBuf,
    /// Change list used to count requested edits
    #[arg(long, value_name = "FILE")]
    feedback: Option<PathBuf>,
}

#[derive(Args)]
struct EditorArgs {
    /// Directory holding `{chapter}.txt` drafts
    #[arg(long, value_name = "DIR")]
    drafts: PathBuf,
    #[arg(long, value_name = "FILE")]
    voice: PathBuf,
    #[arg(long, default_value_t = 1)]
    round: u32,
    /// Where `editor_round{n}.json` goes; defaults to the drafts directory
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Also render the report as HTML
    #[arg(long)]
    html: bool,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct SanityArgs {
    #[arg(long)]
    chapter: String,
    #[arg(long, value_name = "FILE")]
    previous: PathBuf,
    #[arg(long, value_name = "FILE")]
    current: PathBuf,
    #[arg(long, value_name = "FILE")]
    feedback: PathBuf,
    /// File receiving the verifier's assessment
    #[arg(long, value_name = "FILE")]
    status: Option<PathBuf>,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum RankMethodArg {
    Simple,
    Smart,
}

#[derive(Args)]
struct RankArgs {
    /// Limit ranking to these chapters
    #[arg(long = "chapter", value_name = "ID")]
    chapters: Vec<String>,
    #[arg(long, value_enum, default_value = "simple")]
    method: RankMethodArg,
    /// Initial shuffled runs for smart ranking
    #[arg(long, default_value_t = 3)]
    runs: usize,
    /// Candidates compared head-to-head in smart ranking
    #[arg(long, default_value_t = 4)]
    top: usize,
    /// Defaults to `paths.auditions_dir`
    #[arg(long, value_name = "DIR")]
    auditions: Option<PathBuf>,
    /// Defaults to `paths.reports_dir`
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct ExperimentRunArgs {
    /// Experiment plan YAML
    plan: PathBuf,
    /// Case-insensitive regex over names and spec paths
    #[arg(long)]
    filter: Option<String>,
    /// Defaults to `paths.auditions_dir`
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct ExperimentListArgs {
    plan: PathBuf,
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Args)]
struct ReportArgs {
    /// Input directory or results file; defaults from `paths`
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}
