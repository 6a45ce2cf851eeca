use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;

use chapter_translator::pipeline::{
    default_output_for, init_default_config, ChapterPipeline, CliOverrides, RunConfig,
    SegmentResolver, TraceWriter,
};
use chapter_translator::progress::RunProgress;
use chapter_translator::textutil::{decode_text, normalize_blank_lines};

#[derive(Parser, Debug)]
#[command(name = "chapter-translator")]
#[command(about = "Web-novel chapter translator (EN -> RU) with translation memory and quality checks", long_about = None)]
struct Args {
    /// Generate default config + reference data files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input chapter text file
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output file (default: <input_stem>-ru.txt)
    #[arg(short, long, value_name = "TXT")]
    output: Option<PathBuf>,

    /// Config file path (default: search for chapter-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chapter id used for phrase tables and memory records (default: input stem)
    #[arg(long)]
    chapter: Option<String>,

    /// Scene label selecting a scene substitution table (e.g. боевая)
    #[arg(long)]
    scene: Option<String>,

    /// Tone label selecting a tone substitution table (e.g. напряженный)
    #[arg(long)]
    tone: Option<String>,

    /// Style label
    #[arg(long)]
    style: Option<String>,

    /// Source language code (default: EN)
    #[arg(long)]
    source_lang: Option<String>,

    /// Target language code (default: RU)
    #[arg(long)]
    target_lang: Option<String>,

    /// Concurrent translate calls
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Use the echo backend instead of the translation API
    #[arg(long)]
    dry_run: bool,

    /// Validate an existing translation of INPUT and print the report (no translation)
    #[arg(long, value_name = "TXT")]
    validate: Option<PathBuf>,

    /// Write the segmentation of INPUT as JSON, then exit
    #[arg(long, value_name = "JSON")]
    segments_json: Option<PathBuf>,

    /// Print translation memory statistics, then exit
    #[arg(long)]
    memory_stats: bool,

    /// Export the translation memory as a JSON array, then exit
    #[arg(long, value_name = "JSON")]
    export_memory: Option<PathBuf>,

    /// Merge records from an exported JSON array, then exit
    #[arg(long, value_name = "JSON")]
    import_memory: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let overrides = CliOverrides {
        chapter: args.chapter.clone(),
        scene: args.scene.clone(),
        tone: args.tone.clone(),
        style: args.style.clone(),
        source_lang: args.source_lang.clone(),
        target_lang: args.target_lang.clone(),
        max_concurrent: args.max_concurrent,
        dry_run: args.dry_run,
    };

    if args.memory_stats || args.export_memory.is_some() || args.import_memory.is_some() {
        let anchor = args
            .input
            .clone()
            .unwrap_or_else(|| PathBuf::from("memory"));
        let cfg = RunConfig::from_paths_and_args(&anchor, args.config.clone(), overrides)
            .context("build config")?;
        return manage_memory(&cfg, &args);
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  chapter-translator <chapter.txt>\n\nTIPS:\n  - Default config search: chapter-translator.toml (upwards), or set CHAPTER_TRANSLATOR_CONFIG.\n  - --init-config writes a config and the reference data to start from.\n"
            );
            return Ok(());
        }
    };

    let cfg = RunConfig::from_paths_and_args(&input, args.config.clone(), overrides)
        .context("build config")?;
    let source = read_text(&input)?;
    let reference = cfg.load_reference();

    if let Some(path) = args.segments_json.as_ref() {
        let segments = reference.segmenter().segment(&source, cfg.segment_mode);
        let json = serde_json::to_string_pretty(&segments).context("serialize segments")?;
        std::fs::write(path, json).with_context(|| format!("write segments: {}", path.display()))?;
        eprintln!("Wrote {} segments: {}", segments.len(), path.display());
        return Ok(());
    }

    if let Some(translated_path) = args.validate.as_ref() {
        let translated = read_text(translated_path)?;
        let validator = chapter_translator::quality::ChapterValidator::new(reference);
        let result = validator.validate(&source, &translated);
        println!("{}", result.render());
        return Ok(());
    }

    let progress = Arc::new(RunProgress::new(true));
    let memory = cfg.open_memory();
    let translator = cfg.build_translator()?;
    let resolver = SegmentResolver::new(
        reference.clone(),
        memory.clone(),
        translator,
        cfg.resolver_settings(),
    );
    let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace).context("trace dir")?;
    let pipeline = ChapterPipeline::new(reference, resolver, cfg.segment_mode)
        .with_trace(trace)
        .with_progress(progress.clone());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; finishing with the segments resolved so far");
            on_ctrl_c.cancel();
        }
    });

    let out = pipeline
        .translate_chapter(&source, &cfg.resolve_context(), &cancel)
        .await;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_for(&input, &cfg.target_lang));
    let text = if cfg.normalize_blank_lines {
        normalize_blank_lines(&out.text).into_owned()
    } else {
        out.text.clone()
    };
    std::fs::write(&output, text).with_context(|| format!("write output: {}", output.display()))?;
    progress.info(format!("Wrote: {}", output.display()));

    println!("{}", out.validation.render());
    println!("{}", out.stats.render());
    println!("memory: {}", memory.stats());
    Ok(())
}

fn manage_memory(cfg: &RunConfig, args: &Args) -> anyhow::Result<()> {
    let memory = chapter_translator::memory::TranslationMemory::open(&cfg.memory_path, cfg.memory_backend)
        .with_context(|| format!("open translation memory: {}", cfg.memory_path.display()))?;
    if let Some(path) = args.import_memory.as_ref() {
        let n = memory
            .import(path)
            .with_context(|| format!("import memory: {}", path.display()))?;
        eprintln!("Imported {n} records from {}", path.display());
    }
    if let Some(path) = args.export_memory.as_ref() {
        let n = memory
            .export(path)
            .with_context(|| format!("export memory: {}", path.display()))?;
        eprintln!("Exported {n} records to {}", path.display());
    }
    if args.memory_stats {
        println!("{}: {}", cfg.memory_path.display(), memory.stats());
    }
    Ok(())
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read input: {}", path.display()))?;
    let (text, had_errors) = decode_text(&bytes);
    if had_errors {
        tracing::warn!(path = %path.display(), "input is not clean unicode; invalid bytes replaced");
    }
    Ok(text)
}
