use std::sync::Arc;
#[cfg(feature = "http-classifier")]
use std::time::Duration;

use gitmill::clone::CloneService;
use gitmill::commit::CommitService;
use gitmill::maintainer::{MaintainerClassifier, MaintainerService};
use gitmill::queue::memory::MemoryBroker;
use gitmill::queue::{BrokerConnector, QueueService};
use gitmill::software_value::SoftwareValueService;
use gitmill::worker::RepositoryWorker;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use crate::shutdown;

type BoxError = Box<dyn std::error::Error>;

/// Broker for the run. A dry run keeps activities in memory and drops them at exit.
fn broker_connector(config: &Config, dry_run: bool) -> Result<Arc<dyn BrokerConnector>, BoxError> {
    if dry_run {
        tracing::warn!("Dry run: activities are kept in memory and dropped at exit");
        return Ok(Arc::new(MemoryBroker::new()));
    }
    let Some(url) = &config.queue.redis_url else {
        return Err(ConfigError::invalid(
            "queue.redis_url",
            "is required unless --dry-run is given",
        )
        .into());
    };

    #[cfg(feature = "redis")]
    {
        use gitmill::queue::redis_streams::{RedisStreamsConfig, RedisStreamsConnector};

        tracing::info!(stream = %config.queue.stream, "Publishing to Redis Streams");
        Ok(Arc::new(RedisStreamsConnector::new(RedisStreamsConfig {
            url: url.clone(),
            stream: config.queue.stream.clone(),
            max_len: config.queue.max_len,
        })))
    }
    #[cfg(not(feature = "redis"))]
    {
        let _ = url;
        Err("queue.redis_url is set but gitmill was built without the `redis` feature".into())
    }
}

fn maintainer_classifier(
    config: &Config,
) -> Result<Option<Arc<dyn MaintainerClassifier>>, BoxError> {
    let Some(endpoint) = &config.maintainer.classifier_url else {
        tracing::info!("No maintainer.classifier_url configured; maintainer discovery is off");
        return Ok(None);
    };

    #[cfg(feature = "http-classifier")]
    {
        use gitmill::maintainer::http::HttpClassifier;

        let timeout = Duration::from_secs(config.maintainer.timeout_secs);
        let classifier = HttpClassifier::new(endpoint.clone(), timeout)?;
        Ok(Some(Arc::new(classifier)))
    }
    #[cfg(not(feature = "http-classifier"))]
    {
        let _ = endpoint;
        Err("maintainer.classifier_url is set but gitmill was built without the `http-classifier` feature".into())
    }
}

pub(crate) async fn handle_run(
    config: &Config,
    database_url: String,
    once: bool,
    dry_run: bool,
) -> Result<(), BoxError> {
    config.validate()?;
    let broker = broker_connector(config, dry_run)?;
    let classifier = maintainer_classifier(config)?;

    let db = Arc::new(gitmill::connect_with(&config.database_options(database_url)).await?);

    let queue = Arc::new(QueueService::new(broker, config.queue_options()));
    let clone = CloneService::new(Arc::clone(&db), config.clone_options());
    let commits =
        CommitService::new(Arc::clone(&db), Arc::clone(&queue), config.commit_options());
    let maintainer =
        MaintainerService::new(Arc::clone(&db), classifier, config.maintainer_options());
    let software_value =
        SoftwareValueService::new(Arc::clone(&db), config.software_value_options());
    let worker = RepositoryWorker::new(
        db,
        clone,
        commits,
        maintainer,
        software_value,
        queue,
        config.worker_options(),
    );

    if once {
        match worker.run_once().await? {
            Some(outcome) => println!(
                "{}: {} ({} batches, {} commits, {} activities)",
                outcome.repo_id,
                outcome.state,
                outcome.batches,
                outcome.commits,
                outcome.activities
            ),
            None => println!("No repositories to process."),
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    shutdown::install_shutdown_handler(cancel.clone());
    worker.run(cancel).await?;
    Ok(())
}
