//! Concurrent batch protect and unprotect
//!
//! A batch resolves its input set, then spawns one task per object. Tasks
//! are spawned eagerly; a semaphore bounds how many run at once. Each task
//! builds its own client, reads its input, transforms it and writes the
//! derived output. The orchestrating task is the only one that touches the
//! result: it drains the join set and records every item, success or not.
//!
//! One bad object never aborts the others. Only setup problems (invalid
//! configuration or labels, an enumeration failure) fail the call as a
//! whole, and those are detected before anything is dispatched.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::client::{default_auth_scopes, ClientFactory};
use crate::config::{Identity, OpentdfConfig};
use crate::enumerate::{Direction, EnumerationError, ObjectSelector};
use crate::error::{ConfigError, OpenTdfError};
use crate::fqn::{validate_labels, FqnValidationRules};
use crate::naming::{protected_path, unprotected_path, PROTECTED_SUFFIX};
use crate::transform;

/// Tuning knobs for a batch run
#[derive(Clone)]
pub struct BatchOptions {
    max_concurrency: usize,
    item_timeout: Option<Duration>,
    auth_scopes: Vec<String>,
    fqn_rules: FqnValidationRules,
    factory: ClientFactory,
}

impl BatchOptions {
    pub fn new() -> Self {
        let processors = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            max_concurrency: processors * 4,
            item_timeout: None,
            auth_scopes: default_auth_scopes(),
            fqn_rules: FqnValidationRules::default(),
            factory: ClientFactory::new(),
        }
    }

    /// Maximum number of items in flight; values below 1 are raised to 1
    #[must_use]
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    #[must_use]
    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn auth_scopes(mut self, scopes: Vec<String>) -> Self {
        self.auth_scopes = scopes;
        self
    }

    #[must_use]
    pub fn fqn_rules(mut self, rules: FqnValidationRules) -> Self {
        self.fqn_rules = rules;
        self
    }

    #[must_use]
    pub fn client_factory(mut self, factory: ClientFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrency
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("item_timeout", &self.item_timeout)
            .field("auth_scopes", &self.auth_scopes)
            .finish_non_exhaustive()
    }
}

/// Terminal state of one object
#[derive(Debug)]
pub enum ItemStatus {
    Succeeded(PathBuf),
    Failed(OpenTdfError),
}

/// One object of a batch after its single attempt
#[derive(Debug)]
pub struct BatchItem {
    pub input: PathBuf,
    pub status: ItemStatus,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub input: PathBuf,
    pub error: OpenTdfError,
}

/// Aggregate result; `succeeded` is in completion order
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<ItemFailure>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, item: BatchItem) {
        match item.status {
            ItemStatus::Succeeded(output) => self.succeeded.push(output),
            ItemStatus::Failed(error) => self.failed.push(ItemFailure {
                input: item.input,
                error,
            }),
        }
    }

    /// Output paths when every item succeeded, otherwise the full failure list
    pub fn into_result(self) -> Result<Vec<PathBuf>, BatchError> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(BatchError {
                succeeded: self.succeeded,
                failures: self.failed,
            })
        }
    }
}

/// At least one item failed; carries the items that did not
#[derive(Debug)]
pub struct BatchError {
    pub succeeded: Vec<PathBuf>,
    pub failures: Vec<ItemFailure>,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} items failed:",
            self.failures.len(),
            self.failures.len() + self.succeeded.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.input.display(), failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

/// Shared read-only state for every task of a run
struct ItemContext {
    config: OpentdfConfig,
    identity: Identity,
    labels: Vec<String>,
    auth_scopes: Vec<String>,
    factory: ClientFactory,
}

/// A batch bound to one platform, identity and label set
pub struct Batch {
    config: OpentdfConfig,
    identity: Identity,
    labels: Vec<String>,
    options: BatchOptions,
}

impl Batch {
    pub fn new(config: OpentdfConfig, identity: Identity) -> Self {
        Self {
            config,
            identity,
            labels: Vec::new(),
            options: BatchOptions::new(),
        }
    }

    /// Attribute FQNs attached to every protected object
    #[must_use]
    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn protect(&self, selector: &ObjectSelector) -> Result<BatchOutcome, OpenTdfError> {
        self.run(selector, Direction::Protect).await
    }

    pub async fn unprotect(&self, selector: &ObjectSelector) -> Result<BatchOutcome, OpenTdfError> {
        self.run(selector, Direction::Unprotect).await
    }

    async fn run(
        &self,
        selector: &ObjectSelector,
        direction: Direction,
    ) -> Result<BatchOutcome, OpenTdfError> {
        self.preflight(direction)?;

        let selector = selector.clone();
        let inputs = tokio::task::spawn_blocking(move || selector.enumerate(direction))
            .await
            .map_err(EnumerationError::from)??;

        let span = info_span!(
            "batch",
            direction = direction.as_str(),
            identity = self.identity.label(),
            items = inputs.len()
        );
        self.dispatch(inputs, direction).instrument(span).await
    }

    /// Configuration checks that would otherwise fail every item identically
    fn preflight(&self, direction: Direction) -> Result<(), OpenTdfError> {
        if direction == Direction::Protect {
            validate_labels(&self.labels, &self.options.fqn_rules)?;
            transform::validate_kas_url(&self.config.kas_url)?;
        }
        self.options
            .factory
            .build(&self.config, &self.identity, &self.options.auth_scopes)?;
        Ok(())
    }

    async fn dispatch(
        &self,
        inputs: Vec<PathBuf>,
        direction: Direction,
    ) -> Result<BatchOutcome, OpenTdfError> {
        info!(concurrency = self.options.max_concurrency, "starting batch");

        let ctx = Arc::new(ItemContext {
            config: self.config.clone(),
            identity: self.identity.clone(),
            labels: self.labels.clone(),
            auth_scopes: self.options.auth_scopes.clone(),
            factory: self.options.factory.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(inputs.len());

        for input in inputs {
            let semaphore = Arc::clone(&semaphore);
            let ctx = Arc::clone(&ctx);
            let timeout = self.options.item_timeout;
            let path = input.clone();
            let span = info_span!("item", input = %input.display());

            let handle = tasks.spawn(
                async move {
                    let status = match semaphore.acquire_owned().await {
                        Ok(_permit) => run_item(&ctx, &input, direction, timeout).await,
                        Err(_) => Err(OpenTdfError::TaskFailed("batch gate closed".to_string())),
                    };
                    BatchItem {
                        input,
                        status: match status {
                            Ok(output) => ItemStatus::Succeeded(output),
                            Err(error) => ItemStatus::Failed(error),
                        },
                    }
                }
                .instrument(span),
            );
            in_flight.insert(handle.id(), path);
        }

        let mut outcome = BatchOutcome::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            let item = match joined {
                Ok((id, item)) => {
                    in_flight.remove(&id);
                    item
                }
                Err(join_error) => BatchItem {
                    input: in_flight.remove(&join_error.id()).unwrap_or_default(),
                    status: ItemStatus::Failed(OpenTdfError::TaskFailed(join_error.to_string())),
                },
            };

            match &item.status {
                ItemStatus::Succeeded(output) => {
                    info!(input = %item.input.display(), output = %output.display(), "item done")
                }
                ItemStatus::Failed(error) => {
                    warn!(input = %item.input.display(), %error, "item failed")
                }
            }
            outcome.record(item);
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "batch finished"
        );
        Ok(outcome)
    }
}

async fn run_item(
    ctx: &ItemContext,
    input: &Path,
    direction: Direction,
    timeout: Option<Duration>,
) -> Result<PathBuf, OpenTdfError> {
    let work = transform_item(ctx, input, direction);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| OpenTdfError::Timeout(limit))?,
        None => work.await,
    }
}

async fn transform_item(
    ctx: &ItemContext,
    input: &Path,
    direction: Direction,
) -> Result<PathBuf, OpenTdfError> {
    let output = match direction {
        Direction::Protect => protected_path(input),
        Direction::Unprotect => unprotected_path(input, &[PROTECTED_SUFFIX])?,
    };
    if output == input {
        return Err(ConfigError::OutputWouldOverwriteInput(output).into());
    }

    let client = ctx
        .factory
        .build(&ctx.config, &ctx.identity, &ctx.auth_scopes)?;

    let data = tokio::fs::read(input)
        .await
        .map_err(|e| OpenTdfError::io(input, e))?;

    let transformed = match direction {
        Direction::Protect => {
            transform::seal(&client, &data, &ctx.config.kas_url, &ctx.labels)
                .await?
                .0
        }
        Direction::Unprotect => transform::unprotect(&client, &data).await?,
    };

    tokio::fs::write(&output, transformed)
        .await
        .map_err(|e| OpenTdfError::io(&output, e))?;
    debug!(output = %output.display(), "wrote output");
    Ok(output)
}

/// Protect every plain file directly inside `dir`
pub async fn protect_dir(
    config: OpentdfConfig,
    identity: Identity,
    dir: impl Into<PathBuf>,
    labels: Vec<String>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    Batch::new(config, identity)
        .labels(labels)
        .options(options)
        .protect(&ObjectSelector::Directory(dir.into()))
        .await
}

/// Protect every file matched by a glob pattern
pub async fn protect_glob(
    config: OpentdfConfig,
    identity: Identity,
    pattern: impl Into<String>,
    labels: Vec<String>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    Batch::new(config, identity)
        .labels(labels)
        .options(options)
        .protect(&ObjectSelector::Glob(pattern.into()))
        .await
}

/// Protect every file under `root` whose extension is listed
pub async fn protect_with_extensions(
    config: OpentdfConfig,
    identity: Identity,
    root: impl Into<PathBuf>,
    extensions: Vec<String>,
    labels: Vec<String>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    let selector = ObjectSelector::Extensions {
        root: root.into(),
        extensions,
    };
    Batch::new(config, identity)
        .labels(labels)
        .options(options)
        .protect(&selector)
        .await
}

pub async fn protect_paths(
    config: OpentdfConfig,
    identity: Identity,
    paths: Vec<PathBuf>,
    labels: Vec<String>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    Batch::new(config, identity)
        .labels(labels)
        .options(options)
        .protect(&ObjectSelector::Paths(paths))
        .await
}

/// Unprotect every `.tdf` file directly inside `dir`
pub async fn unprotect_dir(
    config: OpentdfConfig,
    identity: Identity,
    dir: impl Into<PathBuf>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    Batch::new(config, identity)
        .options(options)
        .unprotect(&ObjectSelector::Directory(dir.into()))
        .await
}

/// Unprotect `.tdf` files under `root` whose extension is listed
pub async fn unprotect_with_extensions(
    config: OpentdfConfig,
    identity: Identity,
    root: impl Into<PathBuf>,
    extensions: Vec<String>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    let selector = ObjectSelector::Extensions {
        root: root.into(),
        extensions,
    };
    Batch::new(config, identity)
        .options(options)
        .unprotect(&selector)
        .await
}

pub async fn unprotect_paths(
    config: OpentdfConfig,
    identity: Identity,
    paths: Vec<PathBuf>,
    options: BatchOptions,
) -> Result<BatchOutcome, OpenTdfError> {
    Batch::new(config, identity)
        .options(options)
        .unprotect(&ObjectSelector::Paths(paths))
        .await
}
