use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use evo_flywheel::api;
use evo_flywheel::config::Settings;
use evo_flywheel::context::AppContext;
use evo_flywheel::logging::configure_logging;
use evo_flywheel::TARGET_FLYWHEEL;

#[derive(Parser)]
#[clap(
    name = "evo-flywheel",
    about = "Collect, analyze, embed and report on evolutionary biology papers"
)]
struct Cli {
    /// Run a single cycle and exit
    #[clap(long)]
    once: bool,

    /// Do not start the cron scheduler
    #[clap(long)]
    no_scheduler: bool,

    /// Do not serve the HTTP API
    #[clap(long)]
    no_api: bool,

    /// Route papers through analysis without calling the LLM
    #[clap(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::global().clone();
    configure_logging(&settings.log_level);

    if !cli.once && cli.no_scheduler && cli.no_api {
        bail!("nothing to do: --no-scheduler and --no-api together need --once");
    }

    let ctx = AppContext::build(settings, cli.dry_run)
        .await
        .context("Failed to initialize the application")?;

    if cli.once {
        let summary = ctx
            .scheduler
            .trigger_now()
            .await
            .context("Flywheel cycle failed")?;
        info!(
            target: TARGET_FLYWHEEL,
            "Cycle finished: {} collected, {} new, {} analyzed, {} embedded, report {:?}",
            summary.collected,
            summary.new_papers,
            summary.analyzed,
            summary.embedded,
            summary.report_id
        );
        for stage_error in &summary.errors {
            warn!(target: TARGET_FLYWHEEL, "Stage error: {}", stage_error);
        }
        return Ok(());
    }

    if !cli.no_scheduler {
        ctx.scheduler.start().context("Failed to start scheduler")?;
    }

    if !cli.no_api {
        let api_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(api_ctx).await {
                error!(target: TARGET_FLYWHEEL, "API server stopped: {}", e);
            }
        });
    }

    signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!(target: TARGET_FLYWHEEL, "Shutting down");

    if ctx.scheduler.is_running() {
        ctx.scheduler.stop()?;
    }
    Ok(())
}
