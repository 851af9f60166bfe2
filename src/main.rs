/**
 * Command line gatherer: runs one gathering pass with the configured
 * policy and servers, and logs every candidate found.
 */
use std::sync::Arc;

use ortc_gather::config::Settings;
use ortc_gather::ice::{GathererEvent, IceGatherer};
use ortc_gather::logging;
use slog::{debug, info, warn, Logger};
use tokio::sync::mpsc::UnboundedReceiver;

/**
 * Represents the context for the gatherer.
 *
 * Fields:
 * - `config`: The configuration settings.
 * - `logger`: The root logger instance.
 */
#[derive(Debug)]
struct Context {
    config: Settings,
    logger: Logger,
}

struct GatherClient {
    context: Arc<Context>,
}

impl GatherClient {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Settings::new()?;
        let logger = logging::init_logger(&config);
        Ok(Self {
            context: Arc::new(Context { config, logger }),
        })
    }

    /**
     * Gather once and log the results. Returns after the gatherer reports
     * completion, or with the error that stopped gathering.
     */
    async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config = &self.context.config;
        let logger = &self.context.logger;

        let gatherer = IceGatherer::with_settings(
            config.gather_options(),
            config.component,
            config.probe_settings(),
            logger,
        );
        let events = gatherer.subscribe();
        let log_task = tokio::spawn(log_events(logger.clone(), events));

        let gathering = gatherer.gather(None)?;
        if let Err(e) = gathering.await? {
            log_task.abort();
            gatherer.close();
            return Err(e.into());
        }
        log_task.await?;

        let params = gatherer.get_local_parameters()?;
        info!(
            logger,
            "ufrag {} ice-lite {}", params.username_fragment, params.ice_lite
        );
        for candidate in gatherer.get_local_candidates()? {
            info!(logger, "candidate {}", candidate);
        }

        gatherer.close();
        Ok(())
    }
}

async fn log_events(logger: Logger, mut events: UnboundedReceiver<GathererEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            GathererEvent::StateChange(state) => debug!(logger, "state {:?}", state),
            GathererEvent::LocalCandidate { candidate, url } => info!(
                logger,
                "local candidate {} from {}",
                candidate,
                url.as_deref().unwrap_or("host")
            ),
            GathererEvent::Error {
                url,
                error_code,
                error_text,
            } => warn!(logger, "{} failed: {} {}", url, error_code, error_text),
            GathererEvent::LocalCandidateComplete => return,
        }
    }
}

/**
 * The main entry point for the application, it creates the client and
 * passes control to it.
 */
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = GatherClient::new()?;
    client.run().await
}
