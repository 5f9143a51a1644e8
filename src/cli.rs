use std::error::Error;
use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand};
use serde_json::json;
use shakesearch_rs::{DuplicateTitlePolicy, SearchConfig, SearchResultPage, Searcher};
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shakesearch-rs",
    about = "Fuzzy search over the complete works",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// Corpus file to index; `.zst` files are decompressed on the fly.
    #[arg(
        long,
        global = true,
        env = "SHAKESEARCH_CORPUS",
        default_value = "completeworks.txt"
    )]
    corpus: PathBuf,

    /// Marker that precedes every work title in the corpus.
    #[arg(long, global = true)]
    title_marker: Option<String>,

    /// Minimum number of lines in a preview.
    #[arg(long, global = true)]
    min_preview_lines: Option<usize>,

    /// Fail instead of renaming when two works share a title.
    #[arg(long, global = true)]
    reject_duplicate_titles: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search block text, relaxing to fuzzy matching when nothing matches exactly.
    Search {
        /// Query text.
        query: String,
        /// Zero-based page number.
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        /// Results per page.
        #[arg(short, long)]
        length: Option<usize>,
    },
    /// Show the reading window around a block, e.g. "THE TEMPEST-4".
    Preview {
        /// Block identifier as returned by `search`.
        id: String,
    },
    /// List works and their block counts.
    Works,
    /// Run the HTTP server.
    #[cfg(feature = "web")]
    Serve {
        /// Interface to bind.
        #[arg(long, default_value = "0.0.0.0")]
        host: std::net::IpAddr,
        /// Port to bind.
        #[arg(long, env = "PORT", default_value_t = 3001)]
        port: u16,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();

    let searcher = Searcher::new(search_config(&cli));
    searcher.load_file(&cli.corpus)?;

    match cli.command {
        Command::Search {
            query,
            page,
            length,
        } => {
            let length = length.unwrap_or(searcher.config().default_page_length);
            handle_search(&searcher, &query, page, length, cli.json)
        }
        Command::Preview { id } => handle_preview(&searcher, &id, cli.json),
        Command::Works => handle_works(&searcher, cli.json),
        #[cfg(feature = "web")]
        Command::Serve { host, port } => handle_serve(searcher, host, port),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn search_config(cli: &Cli) -> SearchConfig {
    let mut config = SearchConfig::default();
    if let Some(marker) = &cli.title_marker {
        config = config.with_title_marker(marker.clone());
    }
    if let Some(lines) = cli.min_preview_lines {
        config = config.with_min_preview_lines(lines);
    }
    if cli.reject_duplicate_titles {
        config = config.with_duplicate_titles(DuplicateTitlePolicy::Reject);
    }
    config
}

fn handle_search(
    searcher: &Searcher,
    query: &str,
    page: usize,
    length: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if query.trim().is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let results = searcher.search(query, page, length)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(query, &results);
    }
    Ok(())
}

fn handle_preview(searcher: &Searcher, id: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let preview = searcher.preview(id)?;
    if as_json {
        let payload = json!({ "id": id, "preview": preview });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{id}");
        println!("{}", "-".repeat(id.chars().count()));
        println!("{preview}");
    }
    Ok(())
}

fn handle_works(searcher: &Searcher, as_json: bool) -> Result<(), Box<dyn Error>> {
    let works = searcher.works()?;
    if as_json {
        let payload = json!({
            "works": works.iter().collect::<Vec<_>>(),
            "total_blocks": works.total_blocks(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    if works.is_empty() {
        println!("No works found in the corpus.");
        return Ok(());
    }
    let width = works
        .iter()
        .map(|work| work.title.chars().count())
        .max()
        .unwrap_or(5)
        .max("TITLE".len());
    println!("{:<width$}  {}", "TITLE", "BLOCKS", width = width);
    println!("{:-<width$}  {}", "", "------", width = width);
    for work in works.iter() {
        println!("{:<width$}  {}", work.title, work.blocks, width = width);
    }
    println!("\n{} works, {} blocks", works.len(), works.total_blocks());
    Ok(())
}

#[cfg(feature = "web")]
fn handle_serve(
    searcher: Searcher,
    host: std::net::IpAddr,
    port: u16,
) -> Result<(), Box<dyn Error>> {
    use shakesearch_rs::web::{WebConfig, serve};
    use std::net::SocketAddr;
    use std::sync::Arc;

    let config = WebConfig {
        addr: SocketAddr::new(host, port),
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(Arc::new(searcher), config))?;
    Ok(())
}

fn print_results(query: &str, page: &SearchResultPage) {
    if page.results.is_empty() {
        println!("No passages matched \"{query}\".");
        return;
    }
    let first = page.page * page.length + 1;
    let last = first + page.results.len() - 1;
    let fuzzy = if page.fuzziness > 0 {
        format!(" (fuzziness {})", page.fuzziness)
    } else {
        String::new()
    };
    println!(
        "Matches {first}-{last} of {} for \"{query}\"{fuzzy}:",
        page.total
    );
    for result in &page.results {
        println!("\n[{}] {} lines", result.id, result.lines);
        let body = result
            .fragments
            .iter()
            .map(|fragment| fragment_to_markdown(fragment))
            .collect::<Vec<_>>()
            .join("\n\n");
        render_markdown_block(&body);
    }
}

/// Highlight markers become bold text and HTML entities are decoded.
fn fragment_to_markdown(fragment: &str) -> String {
    fragment
        .replace("<mark>", "**")
        .replace("</mark>", "**")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

fn render_markdown_block(body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    if stdout_is_tty() {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
