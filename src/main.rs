//! strand - structure-aware string extraction CLI
//!
//! Extract strings from binaries with layout context and knowledge-base
//! tags, so the signal is readable without paging through the noise.

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use strand::{
    analyze, AnalysisOptions, Databases, Disposition, ExtractionMode, Layout, LayoutKind, NodeId,
    TaggedString,
};

#[derive(Parser, Debug)]
#[command(name = "strand")]
#[command(
    author,
    version,
    about = "Structure-aware string extraction for malware triage"
)]
#[command(long_about = "
strand extracts strings from binaries together with the context an analyst
needs to triage them: where each string lives in the image layout, and
which knowledge base recognizes it (common runtime noise, open-source
library baggage, known-bad indicators, Windows API names).

EXAMPLES:
    strand sample.exe                       # grouped, annotated output
    strand --data-dir db/ sample.exe        # with knowledge bases loaded
    strand --blob rust_sample.exe           # packed string blob extraction
    strand --json sample.exe                # machine-readable output
")]
struct Cli {
    /// Target binary file to analyze
    #[arg(required = true)]
    target: String,

    /// Minimum string length to extract
    #[arg(short = 'n', long, default_value_t = strand::DEFAULT_MIN_LEN)]
    min_length: usize,

    /// Extract from the packed string blob section instead of scanning the
    /// whole file
    #[arg(long)]
    blob: bool,

    /// Directory holding the knowledge bases (expert/, gp/, oss/, winapi/)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Don't group strings by image region (flat output)
    #[arg(long)]
    flat: bool,

    /// Keep strings whose disposition is hide
    #[arg(long)]
    show_hidden: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable debugging output on stderr
    #[arg(short = 'd', long)]
    debug: bool,
}

// ANSI color codes
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let path = Path::new(&cli.target);
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", cli.target);
    }
    let data = fs::read(path).with_context(|| format!("reading {}", cli.target))?;

    let databases = match &cli.data_dir {
        Some(dir) => Databases::load_dir(dir),
        None => Databases::empty(),
    };

    let mode = if cli.blob {
        ExtractionMode::Blob
    } else {
        ExtractionMode::Direct
    };
    let opts = AnalysisOptions::new(cli.min_length).with_mode(mode);

    let analysis = analyze(&data, &databases, &opts)
        .with_context(|| format!("analyzing {}", cli.target))?;

    let strings: Vec<&TaggedString> = if cli.show_hidden {
        analysis.strings.iter().collect()
    } else {
        analysis.visible_strings()
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&strings)?);
        return Ok(());
    }

    let use_color = !cli.no_color && io::stdout().is_terminal();

    if cli.flat {
        for s in &strings {
            print_string(s, analysis.disposition(s), 0, use_color);
        }
    } else {
        render_node(&analysis, &strings, analysis.layout.root(), 0, use_color);
    }

    eprintln!("\n{} strings", strings.len());
    Ok(())
}

/// Print one region of the layout: its own strings interleaved with its
/// children, in ascending file-offset order.
fn render_node(
    analysis: &strand::Analysis,
    strings: &[&TaggedString],
    node: NodeId,
    depth: usize,
    use_color: bool,
) {
    let layout: &Layout = &analysis.layout;
    let region = layout.node(node);

    let in_range: Vec<&TaggedString> = strings
        .iter()
        .copied()
        .filter(|s| region.range.contains(s.string.range.offset))
        .collect();
    if in_range.is_empty() {
        // don't render regions with no strings
        return;
    }

    // the top-level image node is the whole display, no header for it
    let own_header = !(region.kind == LayoutKind::Image && depth == 0);
    if own_header {
        let indent = "  ".repeat(depth.saturating_sub(1));
        if use_color {
            println!("{indent}{DIM}── {BLUE}{}{RESET}{DIM} ──{RESET}", region.name);
        } else {
            println!("{indent}── {} ──", region.name);
        }
    }
    let child_depth = if own_header { depth + 1 } else { depth };

    let mut idx = 0;
    for &child in layout.children(node) {
        let child_range = layout.node(child).range;
        while idx < in_range.len() && in_range[idx].string.range.offset < child_range.offset {
            print_string(in_range[idx], analysis.disposition(in_range[idx]), depth, use_color);
            idx += 1;
        }
        render_node(analysis, &in_range, child, child_depth, use_color);
        while idx < in_range.len() && child_range.contains(in_range[idx].string.range.offset) {
            idx += 1;
        }
    }
    while idx < in_range.len() {
        print_string(in_range[idx], analysis.disposition(in_range[idx]), depth, use_color);
        idx += 1;
    }
}

fn print_string(s: &TaggedString, disposition: Disposition, depth: usize, use_color: bool) {
    let indent = "  ".repeat(depth);
    let offset = format!("{:08x}", s.string.range.offset);

    // render like JSON minus the quotes so the value stays on one line
    let escaped = serde_json::to_string(&s.string.text).unwrap_or_default();
    let text = escaped.trim_matches('"');

    // don't show #common next to more specific tags
    let mut tags: Vec<&str> = s.tags.iter().map(String::as_str).collect();
    if tags.len() > 1 {
        tags.retain(|t| *t != strand::tag::TAG_COMMON);
    }
    let tags = tags.join(" ");

    let structure = s
        .structure
        .as_deref()
        .map(|name| format!("/{name}"))
        .unwrap_or_default();

    if !use_color {
        println!("{indent}{offset}  {structure:<16} {text}  {tags}");
        return;
    }

    let style = match disposition {
        Disposition::Highlight => YELLOW,
        Disposition::Mute | Disposition::Hide => DIM,
        Disposition::Default => "",
    };
    println!(
        "{indent}{DIM}{offset}{RESET}  {DIM}{structure:<16}{RESET} {style}{text}{RESET}  {DIM}{tags}{RESET}"
    );
}
