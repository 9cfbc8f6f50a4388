use crate::bundle::DataBundle;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::mutation::{ApplyOutcome, Mutation};
use crate::store::{BundleReader, DataWriter};
use crate::types::TenantId;
use std::collections::HashMap;
use tracing::{info, warn};

const DEFAULT_MAX_COMMIT_RETRIES: usize = 3;

/// Runs data bundles against a store.
///
/// A run resolves the bundle, binds arguments, parses every resolved template
/// and only then applies the whole plan as one transaction. Input errors are
/// reported before anything is written.
#[derive(Debug)]
pub struct BundleEngine<S> {
    store: S,
    max_commit_retries: usize,
}

/// Builder for [`BundleEngine`].
pub struct BundleEngineBuilder<S> {
    store: S,
    max_commit_retries: usize,
}

impl<S> BundleEngineBuilder<S> {
    /// Creates a new builder with default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
        }
    }

    /// Sets how many times a run is retried after a transaction conflict.
    pub fn max_commit_retries(mut self, retries: usize) -> Self {
        self.max_commit_retries = retries;
        self
    }

    /// Builds the engine.
    pub fn build(self) -> BundleEngine<S> {
        BundleEngine {
            store: self.store,
            max_commit_retries: self.max_commit_retries,
        }
    }
}

impl<S> BundleEngine<S> {
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> BundleEngine<S>
where
    S: BundleReader + DataWriter + Send + Sync,
{
    /// Resolves `name` and returns the mutation plan a run would apply,
    /// without applying it.
    pub async fn plan(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        name: &str,
        values: &HashMap<String, String>,
    ) -> Result<Vec<Mutation>> {
        ctx.check()?;
        let bundle: DataBundle = self.store.read_bundle(ctx, tenant, name).await?;
        bundle.expand(ctx, values)
    }

    /// Runs bundle `name` for `tenant` with the given argument values.
    ///
    /// Either every mutation of the bundle becomes visible at once or none
    /// does. Conflicting commits are retried up to the configured limit.
    pub async fn run(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        name: &str,
        values: &HashMap<String, String>,
    ) -> Result<ApplyOutcome> {
        let plan = self.plan(ctx, tenant, name, values).await?;

        let mut attempt = 0;
        loop {
            match self.store.apply(ctx, tenant, &plan).await {
                Ok(outcome) => {
                    info!(
                        tenant = %tenant,
                        bundle = name,
                        seq = outcome.seq,
                        tuples_written = outcome.tuples_written,
                        tuples_deleted = outcome.tuples_deleted,
                        attributes_written = outcome.attributes_written,
                        attributes_deleted = outcome.attributes_deleted,
                        "bundle committed"
                    );
                    return Ok(outcome);
                }
                Err(Error::TransactionConflict) if attempt < self.max_commit_retries => {
                    attempt += 1;
                    warn!(tenant = %tenant, bundle = name, attempt, "bundle commit conflicted, retrying");
                    ctx.check()?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
