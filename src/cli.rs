use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser, ValueEnum};
use dialoguer::Confirm;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use mindcanvas::references::{ReferenceClient, ReferenceConfig};
#[cfg(feature = "server")]
use mindcanvas::serve::{ServeArgs, run_serve};
use mindcanvas::storage::Storage;
use mindcanvas::{Document, DiagramStore, export_json, export_outline, fit_document, render_svg};

const DEFAULT_NEW_DOCUMENT_NAME: &str = "mindmap.json";

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
enum OutputDestination {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Parser)]
#[command(
    name = "mindcanvas export",
    about = "Export a mind map document as an outline, JSON, SVG or PNG."
)]
pub struct ExportArgs {
    /// Path to the mind map JSON document. Use '-' to read from stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Output format (defaults to the output file extension or outline).
    #[arg(short = 'e', long = "output-format")]
    output_format: Option<ExportFormat>,

    /// Scale factor when rasterizing PNG output.
    #[arg(long = "scale", default_value_t = 2.0)]
    scale: f32,

    /// Background color for SVG and PNG output.
    #[arg(long = "background-color", default_value = "white")]
    background_color: String,

    /// Suppress the confirmation line after writing a file.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

#[derive(Debug, Parser)]
#[command(
    name = "mindcanvas import",
    about = "Replace the stored mind map with an exported JSON document."
)]
pub struct ImportArgs {
    /// Path to the exported JSON document. Use '-' to read from stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// SQLite database to import into.
    #[arg(long = "db", conflicts_with = "file")]
    db: Option<PathBuf>,

    /// Plain JSON file to import into instead of SQLite.
    #[arg(long = "file")]
    file: Option<PathBuf>,

    /// Replace the stored document without asking.
    #[arg(short = 'y', long = "yes", action = ArgAction::SetTrue)]
    yes: bool,
}

#[derive(Debug, Parser)]
#[command(
    name = "mindcanvas references",
    about = "Suggest bibliographic references for a mind map."
)]
pub struct ReferencesArgs {
    /// Path to the mind map JSON document. Use '-' to read from stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Gemini API key (falls back to GEMINI_API_KEY).
    #[arg(long = "api-key")]
    api_key: Option<String>,
}

#[derive(Debug, Parser)]
#[command(
    name = "mindcanvas new",
    about = "Write the starter mind map document."
)]
pub struct NewArgs {
    /// Where to write the document. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum ExportFormat {
    Outline,
    Json,
    Svg,
    Png,
}

impl ExportFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
        {
            Some(ext) if ext == "txt" => Some(ExportFormat::Outline),
            Some(ext) if ext == "json" => Some(ExportFormat::Json),
            Some(ext) if ext == "svg" => Some(ExportFormat::Svg),
            Some(ext) if ext == "png" => Some(ExportFormat::Png),
            _ => None,
        }
    }

    fn default_file_name(self) -> &'static str {
        match self {
            ExportFormat::Outline => "mindmap-outline.txt",
            ExportFormat::Json => "mindmap.json",
            ExportFormat::Svg => "mindmap.svg",
            ExportFormat::Png => "mindmap.png",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Outline => "txt",
            ExportFormat::Json => "json",
            ExportFormat::Svg => "svg",
            ExportFormat::Png => "png",
        }
    }
}

fn ensure_unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mindmap".to_string());
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(String::from);

    let mut counter = 1;
    loop {
        let mut candidate = path.clone();
        let name = match &extension {
            Some(ext) => format!("{stem}{counter}.{ext}"),
            None => format!("{stem}{counter}"),
        };
        candidate.set_file_name(&name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn subcommand_args(args: &[String]) -> impl Iterator<Item = String> + '_ {
    std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned())
}

pub async fn dispatch() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            #[cfg(feature = "server")]
            {
                let serve_args = ServeArgs::parse_from(subcommand_args(&args));
                run_serve(serve_args).await
            }
            #[cfg(not(feature = "server"))]
            {
                Err(anyhow!(
                    "'serve' command requires the 'server' feature to be enabled"
                ))
            }
        }
        Some("export") => run_export(ExportArgs::parse_from(subcommand_args(&args))),
        Some("import") => run_import(ImportArgs::parse_from(subcommand_args(&args))).await,
        Some("references") => {
            run_references(ReferencesArgs::parse_from(subcommand_args(&args))).await
        }
        Some("new") => run_new(NewArgs::parse_from(subcommand_args(&args))),
        _ => run_export(ExportArgs::parse_from(args)),
    }
}

fn run_export(cli: ExportArgs) -> Result<()> {
    let input = parse_input(cli.input.as_deref())?;
    let document = load_document(&input)?;
    let output = parse_output(cli.output.as_deref(), &input, cli.output_format)?;
    let format = determine_format(cli.output_format, &output)?;

    let bytes = match format {
        ExportFormat::Outline => export_outline(&document.nodes).into_bytes(),
        ExportFormat::Json => export_json(&document.nodes, &document.groups)?.into_bytes(),
        ExportFormat::Svg => {
            let (viewport, options) = fit_document(&document, &cli.background_color);
            render_svg(&document, &[], &viewport, &options)?.into_bytes()
        }
        ExportFormat::Png => render_png_bytes(&document, &cli.background_color, cli.scale)?,
    };

    write_output(output, &bytes, cli.quiet)
}

#[cfg(feature = "png")]
fn render_png_bytes(document: &Document, background: &str, scale: f32) -> Result<Vec<u8>> {
    let (viewport, options) = fit_document(document, background);
    mindcanvas::render_png(document, &[], &viewport, &options, scale)
}

#[cfg(not(feature = "png"))]
fn render_png_bytes(_document: &Document, _background: &str, _scale: f32) -> Result<Vec<u8>> {
    bail!("PNG export requires the 'png' feature to be enabled")
}

async fn run_import(cli: ImportArgs) -> Result<()> {
    let input = parse_input(cli.input.as_deref())?;
    let document = load_document(&input)?;

    let storage = Storage::open(cli.db, cli.file).await?;
    let location = storage.location().display().to_string();

    if !cli.yes && storage.load().await?.is_some() {
        let existing = storage.load_document().await;
        let saved = storage
            .updated_at()
            .await?
            .map(|at| format!(", last saved {}", at.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Replace the mind map stored in {location} ({} nodes{saved})?",
                existing.nodes.len()
            ))
            .default(false)
            .interact()
            .context("import confirmation was cancelled")?;
        if !confirmed {
            println!("Import cancelled.");
            return Ok(());
        }
    }

    let (node_count, group_count) = (document.nodes.len(), document.groups.len());
    storage.save_store(&DiagramStore::new(document)).await?;
    println!("Imported {node_count} nodes and {group_count} groups into {location}");
    Ok(())
}

async fn run_references(cli: ReferencesArgs) -> Result<()> {
    let input = parse_input(cli.input.as_deref())?;
    let document = load_document(&input)?;
    let text = DiagramStore::new(document).full_text();

    let mut config = ReferenceConfig::default();
    if cli.api_key.is_some() {
        config.api_key = cli.api_key;
    }
    let references = ReferenceClient::new(config).suggest(&text, None).await?;

    if references.is_empty() {
        println!("No references suggested.");
    }
    for reference in references {
        println!("{reference}");
    }
    Ok(())
}

fn run_new(cli: NewArgs) -> Result<()> {
    let document = Document::starter();
    let json = export_json(&document.nodes, &document.groups)?;

    let destination = match cli.output.as_deref() {
        Some("-") => OutputDestination::Stdout,
        Some(path) => OutputDestination::File(PathBuf::from(path)),
        None => OutputDestination::File(ensure_unique_path(PathBuf::from(
            DEFAULT_NEW_DOCUMENT_NAME,
        ))),
    };
    if let OutputDestination::File(path) = &destination {
        if path.exists() {
            bail!("'{}' already exists", path.display());
        }
    }

    write_output(destination, json.as_bytes(), false)
}

fn parse_input(input: Option<&str>) -> Result<InputSource> {
    match input {
        Some("-") => Ok(InputSource::Stdin),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                return Err(anyhow!("input file '{path_str}' does not exist"));
            }
            Ok(InputSource::File(path))
        }
        None => Ok(InputSource::Stdin),
    }
}

fn parse_output(
    output: Option<&str>,
    input: &InputSource,
    format_hint: Option<ExportFormat>,
) -> Result<OutputDestination> {
    match output {
        Some("-") => Ok(OutputDestination::Stdout),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(anyhow!(
                        "output directory '{}' does not exist",
                        parent.display()
                    ));
                }
            }
            Ok(OutputDestination::File(path))
        }
        None => {
            let format = format_hint.unwrap_or(ExportFormat::Outline);
            match input {
                InputSource::File(path) => {
                    let stem = path
                        .file_stem()
                        .and_then(|name| name.to_str())
                        .unwrap_or("mindmap");
                    let mut default_path = path.to_path_buf();
                    default_path.set_file_name(format!("{stem}.{}", format.extension()));
                    if default_path == *path {
                        default_path.set_file_name(format.default_file_name());
                    }
                    Ok(OutputDestination::File(default_path))
                }
                InputSource::Stdin => Ok(OutputDestination::File(PathBuf::from(
                    format.default_file_name(),
                ))),
            }
        }
    }
}

fn determine_format(
    preference: Option<ExportFormat>,
    output: &OutputDestination,
) -> Result<ExportFormat> {
    if let Some(fmt) = preference {
        return Ok(fmt);
    }

    match output {
        OutputDestination::Stdout => Ok(ExportFormat::Outline),
        OutputDestination::File(path) => ExportFormat::from_path(path).ok_or_else(|| {
            anyhow!(
                "unable to determine output format from '{}'; please specify --output-format",
                path.display()
            )
        }),
    }
}

/// Reads and parses a document. Unlike the server's import, a malformed
/// file is reported instead of silently becoming an empty map.
fn load_document(source: &InputSource) -> Result<Document> {
    let (contents, label) = match source {
        InputSource::Stdin => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            (buffer, "stdin".to_string())
        }
        InputSource::File(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            (contents, format!("'{}'", path.display()))
        }
    };

    if contents.trim().is_empty() {
        bail!("no mind map document supplied on {label}");
    }
    mindcanvas::try_import_json(&contents)
        .with_context(|| format!("failed to import mind map from {label}"))
}

fn write_output(dest: OutputDestination, bytes: &[u8], quiet: bool) -> Result<()> {
    match dest {
        OutputDestination::Stdout => {
            let mut stdout = io::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
        OutputDestination::File(path) => {
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if !quiet {
                println!("Generated mind map -> {}", path.display());
            }
        }
    }
    Ok(())
}
