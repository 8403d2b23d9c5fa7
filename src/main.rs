use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use url::Url;

use blogpull::{FeedClient, FeedEvent, FeedItem, HttpClient, ReqwestClient};

// Emoji with fallback for terminals without Unicode support
static NEWSPAPER: Emoji<'_, '_> = Emoji("📰 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static PICTURE: Emoji<'_, '_> = Emoji("🖼️  ", "[i] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");

/// Fetch and inspect a blog RSS feed
#[derive(Parser, Debug)]
#[command(name = "blogpull")]
#[command(about = "Fetch and inspect a blog RSS feed")]
#[command(version)]
struct Args {
    /// RSS feed URL
    feed: String,

    /// Maximum number of items to display
    #[arg(short, long)]
    limit: Option<usize>,

    /// Resolve item thumbnails and report their dimensions
    #[arg(short, long)]
    images: bool,

    /// Maximum number of concurrent thumbnail fetches
    #[arg(short = 'c', long, default_value = "4")]
    concurrent_images: usize,

    /// Emit the parsed items as JSON instead of formatted text
    #[arg(long)]
    json: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let feed_url = Url::parse(&args.feed).context("invalid feed URL")?;

    let client = FeedClient::new(ReqwestClient::new(), feed_url)
        .max_inflight_images(args.concurrent_images);
    let mut events = client.subscribe();

    let spinner = if args.quiet || args.json {
        None
    } else {
        let spinner = make_spinner();
        spinner.set_message(format!("{SEARCH}Fetching feed: {}", args.feed.cyan()));
        Some(spinner)
    };

    client.fetch_feed();

    let event = events.recv().await.context("feed event channel closed")?;
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }

    let items = match event {
        FeedEvent::ItemsReady(items) => items,
        FeedEvent::FetchError(message) => bail!("{message}"),
    };

    let shown: Vec<&FeedItem> = match args.limit {
        Some(limit) => items.iter().take(limit).collect(),
        None => items.iter().collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    match shown.split_first() {
        None => println!("Feed contains no items."),
        Some((header, rest)) => {
            print_header_item(header);
            if !rest.is_empty() {
                println!("{}", "Older posts:".bold());
                for item in rest {
                    print_list_item(item);
                }
            }
        }
    }

    if args.images {
        println!();
        resolve_thumbnails(&client, &shown).await;
    }

    Ok(())
}

fn make_spinner() -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {wide_msg}")
        .unwrap();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(style);
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}

/// The most recent post gets the rich presentation: title, date, link and
/// full description
fn print_header_item(item: &FeedItem) {
    println!("{NEWSPAPER}{}", item.title.bold());
    println!("   {} · {}", format_date(item), item.link.as_str().cyan());

    if !item.description.is_empty() {
        println!("   {}", item.description);
    }
    println!();
}

fn print_list_item(item: &FeedItem) {
    println!(
        "  • {} ({}) · {}",
        item.title,
        format_date(item).dimmed(),
        item.link.as_str().cyan()
    );
}

fn format_date(item: &FeedItem) -> String {
    item.pub_date
        .map(|date| date.format("%a, %d %b %Y").to_string())
        .unwrap_or_else(|| "undated".to_string())
}

/// Resolve thumbnails for the displayed items through the image pipeline and
/// report the decoded dimensions
async fn resolve_thumbnails<C: HttpClient + Clone + 'static>(
    client: &FeedClient<C>,
    items: &[&FeedItem],
) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut requested = 0;

    for item in items {
        let Some(image_url) = &item.image_url else {
            continue;
        };
        requested += 1;

        let tx = tx.clone();
        let title = item.title.clone();
        client.fetch_image(image_url.clone(), move |result| {
            let _ = tx.send((title, result));
        });
    }
    drop(tx);

    if requested == 0 {
        println!("No thumbnails referenced by the displayed items.");
        return;
    }

    while let Some((title, result)) = rx.recv().await {
        match result {
            Ok(fetched) => println!(
                "{PICTURE}{} {}×{} ({})",
                title,
                fetched.image.width(),
                fetched.image.height(),
                fetched.source_url.as_str().dimmed()
            ),
            Err(e) => println!("{FAILURE}{}: {}", title, e.to_string().red()),
        }
    }
}
