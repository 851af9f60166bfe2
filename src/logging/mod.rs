/**
 * Initializes the logger
 *
 * https://docs.rs/slog/latest/slog/
 *
 */
use crate::config::Settings;
use slog::{o, Drain, LevelFilter, Logger};
use slog_async::Async;
use slog_term::FullFormat;

/**
 * Initializes the root logger: terminal output, drained asynchronously,
 * filtered at the configured level.
 *
 * @param cfg The configuration settings containing the log level.
 * @return The root `Logger`, tagged with the crate version and environment.
 */
pub fn init_logger(cfg: &Settings) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();

    let drain = LevelFilter::new(drain, cfg.log_level).fuse();
    Logger::root(
        drain,
        o!(
            "version" => env!("CARGO_PKG_VERSION"),
            "env" => cfg.environment.as_str()
        ),
    )
}
