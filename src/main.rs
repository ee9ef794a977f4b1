mod batch;
mod browser;
mod challenge;
mod extract;
mod output;
mod record;
mod store;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::batch::BatchConfig;
use crate::browser::{PageEngine, Posture, Session};
use crate::challenge::{ConsoleOperator, Operator};
use crate::extract::Extraction;
use crate::output::RecordSink;
use crate::record::HEADERS;
use crate::store::{JsonCookieFile, SessionStore};

const HOMEPAGE: &str = "https://www.amazon.com/";
const ACCOUNT_PAGE: &str = "https://www.amazon.com/gp/css/homepage.html";
const SIGNIN_PAGE: &str = "https://www.amazon.com/ap/signin?openid.pape.max_auth_age=0&openid.return_to=https%3A%2F%2Fwww.amazon.com%2F%3Fref_%3Dnav_custrec_signin&openid.identity=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0%2Fidentifier_select&openid.assoc_handle=usflex&openid.mode=checkid_setup&openid.claimed_id=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0%2Fidentifier_select&openid.ns=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0";

#[derive(Parser)]
#[command(name = "kindle_scraper", about = "Amazon Kindle metadata scraper via WebDriver")]
struct Cli {
    /// WebDriver endpoint (chromedriver)
    #[arg(long, global = true, default_value = "http://localhost:9515")]
    webdriver: String,
    /// Cookie jar for the Amazon session
    #[arg(long, global = true, default_value = "amazon_cookies.json")]
    cookies: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in manually in a visible browser and save the session cookies
    Login,
    /// Scrape every URL in the input file, appending rows as they validate
    Run {
        /// Input CSV with an Amazon_URL column
        #[arg(short, long, default_value = "kindle_books.csv")]
        input: PathBuf,
        /// Output CSV for accepted records
        #[arg(short, long, default_value = "scraped_amazon_data.csv")]
        output: PathBuf,
        /// Where URLs still failing after retries are written
        #[arg(long, default_value = "failed_urls.csv")]
        failed: PathBuf,
        /// Skip login (Goodreads fields will not be scraped)
        #[arg(long)]
        no_login: bool,
        /// Max URLs to scrape (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape a single URL and print the record
    Probe { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let operator = ConsoleOperator;
    let cookie_store = JsonCookieFile::new(&cli.cookies);

    let result = match cli.command {
        Commands::Login => {
            let mut session = Session::launch(&cli.webdriver, Posture::Interactive).await?;
            let outcome = manual_login(&mut session, &cookie_store, &operator).await;
            session.close().await?;
            outcome?;
            println!("Session cookies saved to {}", cli.cookies.display());
            Ok(())
        }
        Commands::Run {
            input,
            output,
            failed,
            no_login,
            limit,
        } => {
            if no_login {
                info!("skipping login, Goodreads data will not be scraped");
            } else {
                ensure_login(&cli.webdriver, &cookie_store, &operator).await?;
            }

            let mut targets = output::read_targets(&input)?;
            if let Some(n) = limit {
                targets.truncate(n);
            }
            if targets.is_empty() {
                println!("No URLs found in {}.", input.display());
                return Ok(());
            }
            println!("Scraping {} URLs (appending to {})...", targets.len(), output.display());

            let mut session = Session::launch(&cli.webdriver, Posture::Discreet).await?;
            let outcome = scrape_all(&mut session, &operator, &targets, &output, &failed).await;
            session.close().await?;
            let report = outcome?;

            println!(
                "Done: {} records written to {}, {} URLs failed{}.",
                report.accepted,
                output.display(),
                report.failed.len(),
                if report.failed.is_empty() {
                    String::new()
                } else {
                    format!(" (see {})", failed.display())
                }
            );
            Ok(())
        }
        Commands::Probe { url } => {
            let mut session = Session::launch(&cli.webdriver, Posture::Discreet).await?;
            let outcome = probe(&mut session, &url).await;
            session.close().await?;
            outcome
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Sweep the storefront for a challenge, then drive the batch. The session
/// is closed by the caller on every exit path.
async fn scrape_all(
    session: &mut Session,
    operator: &ConsoleOperator,
    targets: &[String],
    output_path: &std::path::Path,
    failed_path: &std::path::Path,
) -> Result<batch::BatchReport> {
    batch::challenge_sweep(session, operator, HOMEPAGE).await?;
    let mut sink = RecordSink::open(output_path)?;
    batch::run(
        session,
        operator,
        targets,
        &mut sink,
        failed_path,
        &BatchConfig::default(),
    )
    .await
}

/// Restore a saved session in a visible browser, falling back to a manual
/// sign-in whenever the jar is missing or stale.
async fn ensure_login(
    webdriver: &str,
    store: &dyn SessionStore,
    operator: &dyn Operator,
) -> Result<()> {
    let mut session = Session::launch(webdriver, Posture::Interactive).await?;
    let outcome = restore_or_login(&mut session, store, operator).await;
    session.close().await?;
    outcome
}

async fn restore_or_login(
    session: &mut Session,
    store: &dyn SessionStore,
    operator: &dyn Operator,
) -> Result<()> {
    session.open(HOMEPAGE).await?;
    if challenge::detect(&session.content().await?) {
        operator.confirm("Please solve the challenge in the browser window.")?;
    }

    match store.load()? {
        Some(cookies) => {
            // Only cookies scoped to the storefront domain are worth restoring.
            let amazon: Vec<_> = cookies
                .into_iter()
                .filter(|c| c.domain.as_deref().is_some_and(|d| d.contains("amazon.com")))
                .collect();
            session.import_cookies(&amazon).await?;
        }
        None => {
            info!("no cookie jar found, logging in manually");
            manual_login(session, store, operator).await?;
        }
    }

    // A page that still offers sign-in means the restored jar was stale.
    session.open(ACCOUNT_PAGE).await?;
    let content = session.content().await?;
    if content.contains("Sign In") || content.contains("Sign-In") {
        info!("not signed in, prompting for manual login");
        manual_login(session, store, operator).await?;
    }
    Ok(())
}

async fn manual_login(
    session: &mut Session,
    store: &dyn SessionStore,
    operator: &dyn Operator,
) -> Result<()> {
    session.open(SIGNIN_PAGE).await?;
    operator.confirm("Please log in to Amazon in the browser window.")?;
    store.save(&session.export_cookies().await?)?;
    Ok(())
}

async fn probe(session: &mut Session, url: &str) -> Result<()> {
    session.open(url).await?;
    session
        .wait_for("#reviewFeatureGroup", std::time::Duration::from_secs(30))
        .await;
    let content = session.content().await?;

    match extract::extract(&content, url) {
        Extraction::Challenge => println!("Challenge page; log in or solve it manually first."),
        Extraction::Record(record) => {
            for (header, cell) in HEADERS.iter().zip(record.row()) {
                println!("{:<24} {}", header, cell);
            }
            println!(
                "\nvalid: {}",
                if record.is_valid() { "yes" } else { "no" }
            );
        }
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
