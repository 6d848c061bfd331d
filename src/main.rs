use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{ArgAction, Parser};
use log::error;
use url::Url;

use sitewalker::{
    Browser, CrawlProgress, CrawlRequest, CrawlResult, WebDriverConfig, crawl_website,
};

/// Crawl a website with a real browser and save every rendered page.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Start URL, e.g. https://example.com
    url: String,

    /// Maximum number of pages to fetch (hard ceiling 50)
    #[arg(long, default_value_t = 20)]
    max_pages: usize,

    /// Maximum link depth from the start URL (hard ceiling 3)
    #[arg(long, default_value_t = 2)]
    max_depth: usize,

    /// Login form URL; requires --login-username and --login-password
    #[arg(long, requires_all = ["login_username", "login_password"])]
    login_url: Option<String>,

    #[arg(long, requires = "login_url")]
    login_username: Option<String>,

    #[arg(long, requires = "login_url")]
    login_password: Option<String>,

    /// Overall crawl deadline in seconds
    /// [env: SITEWALKER_CRAWL_TIMEOUT] [default: 300]
    #[arg(long)]
    crawl_timeout: Option<u64>,

    /// Output file for the crawl result (default: <host>_<timestamp>.json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use an already running WebDriver server instead of starting one
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Browser to drive
    #[arg(long, value_enum, default_value_t = Browser::Chrome)]
    webdriver_browser: Browser,

    /// Path to the chromedriver/geckodriver binary
    #[arg(long)]
    webdriver_binary: Option<String>,

    /// Run the browser headless
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    headless: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let crawl_timeout = cli
        .crawl_timeout
        .or_else(|| {
            std::env::var("SITEWALKER_CRAWL_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(300);

    let mut request = CrawlRequest::new(&cli.url)
        .max_pages(cli.max_pages)
        .max_depth(cli.max_depth)
        .crawl_timeout(Duration::from_secs(crawl_timeout));
    if let (Some(url), Some(user), Some(pass)) =
        (&cli.login_url, &cli.login_username, &cli.login_password)
    {
        request = request.login(url, user, pass);
    }

    let webdriver = WebDriverConfig {
        endpoint: cli.webdriver_url.clone(),
        browser: cli.webdriver_browser,
        headless: cli.headless,
        driver_binary: cli.webdriver_binary.clone(),
        ..WebDriverConfig::default()
    };

    let progress = Box::new(|p: &CrawlProgress| {
        eprintln!(
            "[{}] scraped {} / discovered {} / failed {}  {}",
            p.status, p.pages_scraped, p.pages_discovered, p.pages_failed, p.current_url
        );
    });

    let result = match crawl_website(request, webdriver, Some(progress)) {
        Ok(result) => result,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.url));
    if let Err(err) = write_result(&output, &result) {
        error!("failed to write {}: {err}", output.display());
        return ExitCode::FAILURE;
    }

    println!(
        "finished crawl: {} pages scraped, login {}, {} errors -> {}",
        result.pages.len(),
        if result.login_success { "ok" } else { "skipped/failed" },
        result.errors.len(),
        output.display()
    );
    for err in &result.errors {
        eprintln!("  - {err}");
    }
    ExitCode::SUCCESS
}

fn write_result(path: &PathBuf, result: &CrawlResult) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, result)?;
    Ok(())
}

/// `{host}_{timestamp}.json` with unsafe characters replaced.
fn default_output_path(start_url: &str) -> PathBuf {
    let host = Url::parse(start_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "crawl".to_string());
    let safe_host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("{safe_host}_{timestamp}.json"))
}
