use std::collections::HashMap;
use std::io::Write;

use anyhow::bail;
use clap::{Parser, ValueEnum};

use sharegrab::core::controller::Controller;
use sharegrab::core::crawler::{self, SortMode};
use sharegrab::core::dependencies;
use sharegrab::core::login::{InputKind, LoginCredentials, LoginStrategy};
use sharegrab::core::queue::DownloadQueue;
use sharegrab::core::urls;
use sharegrab::models::download::WorkItem;
use sharegrab::models::settings::{Backend, GlobalSettings, SettingsForm};
use sharegrab::storage::{config, state};

#[derive(Parser)]
#[command(
    name = "sharegrab",
    version,
    about = "Download protected SharePoint stream videos"
)]
struct Cli {
    /// Video page URLs to enqueue
    urls: Vec<String>,

    /// Import every video found in these folder URLs
    #[arg(long = "from-folder", value_name = "URL")]
    from_folder: Vec<String>,

    /// Recurse into subfolders when importing
    #[arg(long, requires = "from_folder")]
    recurse: bool,

    /// Ordering of imported video URLs
    #[arg(long, value_enum, default_value_t = SortArg::Unsorted, requires = "from_folder")]
    sort: SortArg,

    /// Print the discovered URLs instead of enqueueing them
    #[arg(long, requires = "from_folder")]
    print_urls: bool,

    /// Output directory for downloaded videos
    #[arg(short = 'o', long, value_name = "DIR")]
    output_dir: Option<String>,

    /// Transfer backend: yt-dlp, ffmpeg or direct
    #[arg(long, value_name = "NAME")]
    downloader: Option<String>,

    /// Sign-in email for the shared identity-provider step
    #[arg(long)]
    username: Option<String>,

    /// Login module index (see --list-login-modules)
    #[arg(long, value_name = "INDEX")]
    login_module: Option<usize>,

    /// List the available login modules and exit
    #[arg(long)]
    list_login_modules: bool,

    /// Keep the automation browser open between queue items
    #[arg(long)]
    keep_open: bool,

    /// Reuse a persistent browser profile instead of logging in
    #[arg(long)]
    profile_dir: bool,

    /// Retry a failed download immediately instead of stopping the queue
    #[arg(long)]
    retry: bool,

    /// Bandwidth cap for the segmented backend, e.g. 5M
    #[arg(long, value_name = "RATE")]
    limit_rate: Option<String>,

    /// Connection count for the segmented backend (1-5)
    #[arg(long, value_name = "N")]
    connections: Option<u32>,

    /// Navigation/operation timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Do not persist queue state across runs
    #[arg(long)]
    no_save_state: bool,

    /// Persist the effective settings as the new defaults
    #[arg(long)]
    save_settings: bool,

    /// Chrome/Chromium executable to drive
    #[arg(long, value_name = "PATH")]
    custom_chrome: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum SortArg {
    #[default]
    Unsorted,
    Created,
    Modified,
    Url,
}

impl From<SortArg> for SortMode {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Unsorted => SortMode::Unsorted,
            SortArg::Created => SortMode::TimeCreated,
            SortArg::Modified => SortMode::TimeModified,
            SortArg::Url => SortMode::Url,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn effective_settings(cli: &Cli, stored: &GlobalSettings) -> anyhow::Result<GlobalSettings> {
    let downloader = match &cli.downloader {
        Some(name) => match Backend::parse(name) {
            Some(b) => Some(b),
            None => bail!("unknown downloader '{}' (yt-dlp, ffmpeg or direct)", name),
        },
        None => None,
    };

    let form = SettingsForm {
        output_path: cli.output_dir.clone(),
        downloader,
        ytdlp_n: cli.connections,
        direct_n: cli.connections,
        speed_limit: cli.limit_rate.clone(),
        timeout: cli.timeout,
        login_module: cli.login_module,
        retry_on_fail: cli.retry.then_some(true),
        use_profile_dir: cli.profile_dir.then_some(true),
        keep_browser_open: cli.keep_open.then_some(true),
        auto_save_state: cli.no_save_state.then_some(false),
        logging: cli.verbose.then_some(true),
        custom_chrome_path: cli.custom_chrome.clone(),
        ..Default::default()
    };
    Ok(form.apply(stored))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.list_login_modules {
        for (i, name) in LoginStrategy::module_names().iter().enumerate() {
            println!("{}  {}", i, name);
        }
        return Ok(());
    }

    let settings = effective_settings(&cli, &config::load())?;

    let level = if settings.logging {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    if cli.save_settings {
        config::save(&settings)?;
        tracing::info!("settings saved");
    }

    let tools = dependencies::preflight().await?;
    if settings.logging {
        for tool in ["ffmpeg", "yt-dlp"] {
            if let Some(version) = dependencies::check_version(tool).await {
                tracing::debug!("{} {}", tool, version);
            }
        }
    }

    let mut queue = match state::load() {
        Some(text) => match DownloadQueue::import_state(&text) {
            Ok(q) => q,
            Err(err) => {
                tracing::warn!("could not import saved queue ({}), starting empty", err);
                DownloadQueue::new()
            }
        },
        None => DownloadQueue::new(),
    };

    let strategy = LoginStrategy::from_index(settings.login_module);
    let creds = gather_credentials(&cli, &settings, strategy)?;

    let mut invalid = Vec::new();
    for url in &cli.urls {
        if urls::is_valid_url(url) {
            queue.enqueue(WorkItem::new(url));
        } else {
            invalid.push(url.clone());
        }
    }
    if !invalid.is_empty() {
        bail!("invalid video URLs:\n{}", invalid.join("\n"));
    }

    let mut controller = Controller::new(queue, settings.clone(), tools);

    if !cli.from_folder.is_empty() {
        let session_opts = sharegrab::core::session::SessionOptions::from_settings(&settings);
        let found = crawler::list_videos(
            controller.session_mut(),
            &cli.from_folder,
            cli.recurse,
            cli.sort.into(),
            strategy,
            &creds,
            &session_opts,
        )
        .await?;
        tracing::info!("folder import found {} video(s)", found.len());

        if cli.print_urls {
            controller.shutdown().await;
            for url in &found {
                println!("{}", url);
            }
            return Ok(());
        }
        for url in found {
            controller.queue.enqueue(WorkItem::new(&url));
        }
    }

    if controller.queue.is_empty() {
        println!("download queue is empty");
        return Ok(());
    }

    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stop requested, cancelling the active transfer...");
            stop.stop();
        }
    });

    let summary = controller.run(strategy, &creds).await;
    controller.shutdown().await;
    if settings.auto_save_state {
        if let Err(err) = controller.persist_now() {
            tracing::warn!("unable to save queue state: {}", err);
        }
    }

    let summary = summary?;
    println!(
        "{} download(s) completed, {} left in the queue",
        summary.completed, summary.remaining
    );
    Ok(())
}

fn gather_credentials(
    cli: &Cli,
    settings: &GlobalSettings,
    strategy: LoginStrategy,
) -> anyhow::Result<LoginCredentials> {
    // Profile-dir bypass supersedes every login strategy; a kept-open
    // browser stays authenticated, so its fields are disabled too.
    if settings.use_profile_dir || strategy.is_bypass() {
        return Ok(LoginCredentials::default());
    }
    if settings.keep_browser_open && cli.username.is_none() {
        return Ok(LoginCredentials::default());
    }

    let msid = match &cli.username {
        Some(user) => user.clone(),
        None => prompt_line("Sign-in email (blank to sign in by hand): ")?,
    };

    let fields = strategy.fields();
    if fields.is_empty() {
        return Ok(LoginCredentials { msid, custom: None });
    }

    let mut custom = HashMap::new();
    for (i, field) in fields.iter().enumerate() {
        if !field.desc.is_empty() {
            println!("{}", field.desc);
        }
        let value = match field.kind {
            InputKind::Password => rpassword::prompt_password(format!("{}: ", field.label))?,
            _ => prompt_line(&format!("{}: ", field.label))?,
        };
        if value.is_empty() {
            tracing::warn!(
                "login field '{}' left empty, automatic login disabled for this run",
                field.label
            );
            return Ok(LoginCredentials { msid, custom: None });
        }
        custom.insert(format!("field{}", i), value);
    }

    Ok(LoginCredentials {
        msid,
        custom: Some(custom),
    })
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
