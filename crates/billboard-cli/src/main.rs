use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use billboard_contracts::content::PosterContent;
use billboard_contracts::events::EventSink;
use billboard_contracts::prompts::normalize_prompt_bundle;
use billboard_contracts::providers::RenderMode;
use billboard_contracts::records::{AssetPayload, VariantSlot};
use billboard_engine::{EngineConfig, PosterEngine, PosterRequest};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "billboard", version, about = "Template poster compositor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate posters through the full pipeline.
    Render(RenderArgs),
    /// Write the locked frame for a template and content file.
    Frame(FrameArgs),
    /// Write the edit mask for a template (white = editable).
    Mask(MaskArgs),
    /// Print the normalized prompt bundle for raw JSON input.
    Prompts(PromptsArgs),
    /// Store an image as a template variant override.
    UploadVariant(UploadVariantArgs),
    /// List stored template variants.
    Variants,
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long)]
    template: String,
    #[arg(long)]
    content: PathBuf,
    /// JSON file or inline JSON with per-slot prompts.
    #[arg(long)]
    prompts: Option<String>,
    #[arg(long, default_value = "locked")]
    mode: RenderMode,
    #[arg(long, default_value_t = 1)]
    count: usize,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    no_background: bool,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct FrameArgs {
    #[arg(long)]
    template: String,
    #[arg(long)]
    content: PathBuf,
    #[arg(long)]
    no_background: bool,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct MaskArgs {
    #[arg(long)]
    template: String,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct PromptsArgs {
    /// JSON file or inline JSON.
    input: String,
}

#[derive(Debug, Parser)]
struct UploadVariantArgs {
    #[arg(long)]
    slot: VariantSlot,
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    content_type: Option<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("billboard error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => run_render(args),
        Command::Frame(args) => run_frame(args),
        Command::Mask(args) => run_mask(args),
        Command::Prompts(args) => run_prompts(args),
        Command::UploadVariant(args) => run_upload_variant(args),
        Command::Variants => run_variants(),
    }
}

fn open_engine(events: Option<&Path>) -> Result<PosterEngine> {
    let config = EngineConfig::from_env()?;
    let run_id = compact_timestamp();
    let sink = match events {
        Some(path) => EventSink::new(path, run_id),
        None => EventSink::disabled(run_id),
    };
    Ok(PosterEngine::from_config(config, sink)?)
}

fn run_render(args: RenderArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let engine = open_engine(Some(&events_path))?;
    let request = PosterRequest {
        template_id: args.template.clone(),
        content: read_content(&args.content)?,
        prompts: match args.prompts.as_deref() {
            Some(raw) => read_json_arg(raw)?,
            None => Value::Null,
        },
        mode: args.mode,
        desired_count: args.count.max(1),
        seed: args.seed,
        fill_background: !args.no_background,
    };
    let assets = engine.generate_posters(&request)?;
    tracing::info!(
        template_id = %request.template_id,
        count = assets.len(),
        out = %args.out.display(),
        "posters ready"
    );

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    for asset in assets {
        let mut described = asset.describe();
        if let AssetPayload::Inline(bytes) = &asset.payload {
            let path = args.out.join(&asset.filename);
            fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
            described.insert("path".to_string(), json!(path.display().to_string()));
        }
        println!("{}", Value::Object(described));
    }
    Ok(0)
}

fn run_frame(args: FrameArgs) -> Result<i32> {
    let engine = open_engine(None)?;
    let content = read_content(&args.content)?;
    let frame = engine.render_frame(&args.template, &content, !args.no_background)?;
    save_image(&DynamicImage::ImageRgba8(frame), &args.out)?;
    println!("Wrote {}", args.out.display());
    Ok(0)
}

fn run_mask(args: MaskArgs) -> Result<i32> {
    let engine = open_engine(None)?;
    let mask = engine.build_mask(&args.template)?;
    save_image(&DynamicImage::ImageLuma8(mask.as_gray().clone()), &args.out)?;
    println!(
        "Wrote {} ({} editable, {} protected pixels)",
        args.out.display(),
        mask.editable_count(),
        mask.protected_count()
    );
    Ok(0)
}

fn run_prompts(args: PromptsArgs) -> Result<i32> {
    let raw = read_json_arg(&args.input)?;
    let bundle = normalize_prompt_bundle(&raw);
    println!("{}", serde_json::to_string_pretty(&bundle.to_value())?);
    Ok(0)
}

fn run_upload_variant(args: UploadVariantArgs) -> Result<i32> {
    let engine = open_engine(None)?;
    let bytes = fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let content_type = args
        .content_type
        .clone()
        .unwrap_or_else(|| content_type_for_path(&args.file).to_string());
    let filename = args
        .file
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("upload");
    let record = engine.upload_variant(args.slot, filename, &content_type, &bytes)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(0)
}

fn run_variants() -> Result<i32> {
    let engine = open_engine(None)?;
    let records = engine.variants().list()?;
    if records.is_empty() {
        println!("No stored variants in {}", engine.variants().dir().display());
        return Ok(0);
    }
    for record in records {
        println!(
            "{}\t{}\t{}x{}\t{}",
            record.slot, record.filename, record.width, record.height, record.updated_at
        );
    }
    Ok(0)
}

fn read_content(path: &Path) -> Result<PosterContent> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid poster content in {}", path.display()))
}

/// Inline JSON, or a path to a JSON file. Unparseable text is passed on as a
/// string so the prompt normalizer can degrade it.
fn read_json_arg(raw: &str) -> Result<Value> {
    let path = Path::new(raw);
    let text = if path.is_file() {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    } else {
        raw.to_string()
    };
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn save_image(image: &DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))
}

fn content_type_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn compact_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
