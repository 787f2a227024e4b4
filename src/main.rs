//! Notebook Preview - diagnostic host
//!
//! Opens a markdown file in a preview session, resolves every image it
//! references and reports how each one loads.

use anyhow::Context;
use notebook_preview::images::{DirectAccess, LoadResult};
use notebook_preview::markdown::CommonMarkParser;
use notebook_preview::{Config, DocumentSession};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Application name for logging
const APP_NAME: &str = "notebook-preview";

/// Parsed command line
#[derive(Debug, Default)]
struct Flags {
    file: Option<PathBuf>,
    offline: bool,
    json: bool,
}

/// One line of the report
#[derive(Debug, Serialize)]
struct ImageReport {
    destination: String,
    alt: String,
    source: &'static str,
    target: String,
    status: &'static str,
    width: Option<u32>,
    height: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let flags = parse_args();
    let Some(file) = flags.file else {
        eprintln!("Error: no markdown file given");
        eprintln!("Use --help for usage information");
        std::process::exit(1);
    };

    log::info!("Starting {} for {}", APP_NAME, file.display());

    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("Using default configuration: {}", e);
        Config::default()
    });

    let text = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Could not read {}", file.display()))?;

    let mut session = DocumentSession::new(config, Arc::new(CommonMarkParser::new()), Arc::new(DirectAccess));
    session.open(&file).await;

    let document = session.render(&text).await?;
    let mut reports = Vec::new();

    for image in session.image_references(&document) {
        let result = if flags.offline && image.source.is_remote() {
            None
        } else {
            Some(session.load(&image, None).await)
        };

        let (status, width, height) = match &result {
            Some(LoadResult::Success(decoded)) => ("ok", Some(decoded.width()), Some(decoded.height())),
            Some(other) => (other.label(), None, None),
            None => ("skipped", None, None),
        };

        reports.push(ImageReport {
            destination: image.reference.destination.clone(),
            alt: image.reference.alt.clone(),
            source: image.source.kind(),
            target: image.source.display_target(),
            status,
            width,
            height,
        });
    }

    session.close().await;

    if flags.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    Ok(())
}

/// Initialize the logging system
fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,notebook_preview=debug");
    }

    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();
}

/// Parse command line arguments
fn parse_args() -> Flags {
    let args: Vec<String> = std::env::args().collect();
    let mut flags = Flags::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--offline" => flags.offline = true,
            "--json" => flags.json = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
            _ => {
                if flags.file.is_some() {
                    eprintln!("Error: only one markdown file can be inspected at a time");
                    std::process::exit(1);
                }
                flags.file = Some(PathBuf::from(&args[i]));
            }
        }
        i += 1;
    }

    flags
}

fn print_reports(reports: &[ImageReport]) {
    if reports.is_empty() {
        println!("No images referenced");
        return;
    }

    for report in reports {
        let size = match (report.width, report.height) {
            (Some(w), Some(h)) => format!(" {}x{}", w, h),
            _ => String::new(),
        };
        println!(
            "{:<8} {:<18} {}{}",
            report.status, report.source, report.target, size
        );
    }
}

/// Print help message
fn print_help() {
    println!(
        r#"Notebook Preview - inspect how a Markdown document's images resolve

USAGE:
    notebook-preview [OPTIONS] FILE

OPTIONS:
    -h, --help          Show this help message
    -v, --version       Show version information
        --offline       Do not fetch remote images
        --json          Print the report as JSON

EXAMPLES:
    notebook-preview README.md
    notebook-preview --offline --json notes.md
"#
    );
}

/// Print version information
fn print_version() {
    println!("{} {}", APP_NAME, env!("CARGO_PKG_VERSION"));
}
