use std::io;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs stdout and rolling-file logging.
///
/// `level` is the base level from `LOG_LEVEL`; per-target overrides keep sqlx quiet on stdout
/// while the file log keeps full LLM request traces.
pub fn configure_logging(level: &str) {
    // Feed parsers complain loudly about sloppy markup from journal sites.
    let custom_filter = FilterFn::new(|metadata| {
        !(metadata.level() == &Level::WARN && metadata.target().starts_with("html5ever"))
    });

    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(EnvFilter::new(format!(
            "{},llm_request={},web_request=warn,db_query=warn,sqlx=warn",
            level, level
        )))
        .with_filter(custom_filter);

    let file_appender = rolling::daily("logs", "flywheel.log");
    let file_log = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new(format!(
            "{},llm_request=debug,sqlx=info",
            level
        )));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
