//! Logging setup shared by every subcommand.

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Log verbosity: trace|debug|info|warn|error. Unset falls back to the
    /// configuration document's `verbose` flag (debug if true, info if not).
    #[arg(long = "log.level", ignore_case = true, value_enum, global = true)]
    pub level: Option<LogLevel>,

    /// Force a log output format instead of auto-detecting from the terminal
    #[arg(long = "log.format", value_enum, global = true)]
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
    Color,
}

fn default_log_format() -> LogFormat {
    if atty::is(atty::Stream::Stderr) {
        LogFormat::Color
    } else {
        LogFormat::Json
    }
}

/// Initializes the global subscriber. Panics if called twice.
///
/// `--log.level` always wins when given; otherwise `config_verbose` (the
/// configuration document's `verbose` flag) selects debug over info.
pub fn init_logging(args: &LogArgs, config_verbose: bool) {
    let level = args.level.unwrap_or(if config_verbose { LogLevel::Debug } else { LogLevel::Info });
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(level.to_string())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match args.format.unwrap_or_else(default_log_format) {
        LogFormat::Json => {
            builder.json().flatten_event(true).with_current_span(true).with_span_list(false).init();
        }
        LogFormat::Text => {
            builder.compact().with_ansi(false).init();
        }
        LogFormat::Color => {
            builder.compact().with_ansi(true).init();
        }
    }
}
