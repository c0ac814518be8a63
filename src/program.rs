use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use console::{style, Term};
use indicatif::ProgressBar;
use tracing::{info, trace, warn};

use weibo_album_downloader::engine::{
    ConfigManager, ControllerOptions, DownloadOrder, RunController, RunOutcome,
    RunReport, Settings,
};
use weibo_album_downloader::weibo::media::parse_account_id;
use weibo_album_downloader::weibo::WeiboClient;

use crate::tui::{ellipsize_middle, run_progress_bar, STATUS_WIDTH};
use crate::Cli;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// How often the progress bar reads a fresh snapshot.
const PROGRESS_POLL: Duration = Duration::from_millis(200);

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program {
    cli: Cli,
    config_manager: Arc<ConfigManager>,
}

impl Program {
    pub(crate) fn new(cli: Cli, config_manager: Arc<ConfigManager>) -> Self {
        Self { cli, config_manager }
    }

    /// Runs the downloader program.
    pub(crate) async fn run(self) -> Result<()> {
        Term::stdout().set_title("weibo album downloader");
        trace!("Starting weibo album downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        trace!("Config Directory: {}", self.config_manager.config_dir().display());

        let account_id = parse_account_id(&self.cli.account)
            .ok_or_else(|| anyhow!("Not a Weibo account id or album URL: {}", self.cli.account))?;
        let settings = self.resolve_settings()?;

        let app_config = self.config_manager.get_app_config();
        let mut options = ControllerOptions::from_config(&app_config);
        if let Some(output) = &self.cli.output {
            options.output_root = output.clone();
        }
        if let Some(concurrency) = self.cli.concurrency {
            options.concurrency = concurrency.max(1);
        }

        let client = Arc::new(WeiboClient::new(&app_config.network).context("Failed to create HTTP client")?);
        let controller = Arc::new(RunController::new(client.clone(), client, options));

        println!(
            "{} account {} ({} order). Type {} + Enter to pause or resume, {} + Enter to stop.",
            style("Downloading").green().bold(),
            style(&account_id).cyan(),
            settings.download_order,
            style("p").bold(),
            style("s").bold(),
        );
        spawn_control_listener(controller.clone());

        let bar = run_progress_bar();
        let tracker = tokio::spawn(track_progress(controller.clone(), bar.clone()));

        let result = controller.start(&account_id, settings).await;
        tracker.abort();
        refresh_bar(&bar, &controller);
        bar.finish();

        let report = result.context("Download run could not start")?;
        print_report(&report);
        Ok(())
    }

    /// Stored settings with the command line overrides applied.
    ///
    /// Overrides that form an invalid interval are rejected when saving and
    /// replaced by the defaults otherwise.
    fn resolve_settings(&self) -> Result<Settings> {
        let mut settings = self.config_manager.settings();
        if let Some(order) = self.cli.order.as_deref() {
            settings.download_order = DownloadOrder::from(order);
        }
        if let Some(min) = self.cli.min_interval {
            settings.min_interval_ms = min;
        }
        if let Some(max) = self.cli.max_interval {
            settings.max_interval_ms = max;
        }

        if self.cli.save_settings {
            self.config_manager
                .save_settings(&settings)
                .context("Failed to save settings")?;
            info!("Settings saved to {}", self.config_manager.config_dir().display());
        }

        Ok(settings.validated())
    }
}

/// Reads control commands from stdin until it closes. The blocking reads
/// stay on their own thread so the runtime can exit while stdin is open.
fn spawn_control_listener(controller: Arc<RunController>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim().to_ascii_lowercase().as_str() {
                "p" => match controller.toggle_pause() {
                    Ok(phase) => info!("Run is now {}", phase),
                    Err(e) => warn!("Cannot pause: {}", e),
                },
                "s" | "q" => {
                    if let Err(e) = controller.stop() {
                        warn!("Cannot stop: {}", e);
                    }
                }
                "" => {}
                other => warn!("Unknown command '{}', use p to pause or resume and s to stop", other),
            }
        }
    });
}

async fn track_progress(controller: Arc<RunController>, bar: ProgressBar) {
    loop {
        refresh_bar(&bar, &controller);
        tokio::time::sleep(PROGRESS_POLL).await;
    }
}

fn refresh_bar(bar: &ProgressBar, controller: &RunController) {
    let snapshot = controller.snapshot();
    bar.set_length(snapshot.discovered as u64);
    bar.set_position(snapshot.done().min(snapshot.discovered) as u64);
    bar.set_message(ellipsize_middle(&snapshot.status, STATUS_WIDTH));
}

fn print_report(report: &RunReport) {
    let snapshot = &report.snapshot;
    let headline = match report.outcome {
        RunOutcome::Completed => style("Finished").green().bold(),
        RunOutcome::Stopped => style("Stopped").yellow().bold(),
    };

    println!();
    println!("{} in {:.1}s ({})", headline, report.elapsed.as_secs_f64(), report.run_id);
    if !report.location.is_empty() {
        println!("  Saved to:   {}", report.location);
    }
    println!("  Discovered: {}", snapshot.discovered);
    println!("  Downloaded: {}", style(snapshot.downloaded).green());
    println!("  Skipped:    {}", snapshot.skipped);
    if snapshot.failed > 0 {
        println!("  Failed:     {}", style(snapshot.failed).red());
    } else {
        println!("  Failed:     0");
    }
    println!("  {}", snapshot.status);
}
