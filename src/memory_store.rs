use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::attribute::{Attribute, AttributeFilter, AttributeIndex, AttributeKey};
use crate::bundle::DataBundle;
use crate::context::Context;
use crate::error::{Error, Result, RowKind};
use crate::index::Key;
use crate::mutation::{ApplyOutcome, Mutation};
use crate::schema::{SchemaDefinition, SchemaIndex};
use crate::store::{
    BundleReader, BundleWriter, Cursor, DataReader, DataWriter, Page, SchemaStore, TenantStore,
};
use crate::transaction::{Change, Snapshot, Transaction};
use crate::tuple::{RelationTuple, TupleFilter, TupleIndex};
use crate::types::{Tenant, TenantId};

const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

/// Builder for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreBuilder {
    max_page_size: usize,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl MemoryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of rows a paged query returns.
    pub fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size.max(1);
        self
    }

    /// Opens an empty store.
    pub fn open(self) -> MemoryStore {
        MemoryStore {
            inner: Arc::new(Inner {
                state: RwLock::new(Snapshot::default()),
                open: AtomicBool::new(true),
                max_page_size: self.max_page_size,
                active: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

/// In-memory reference store for tenants, schemas, tuples, attributes and bundles.
///
/// Clones share the same tables. Readers work on an O(1) snapshot of the last
/// commit and never wait on writers beyond taking that snapshot.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<Snapshot>,
    open: AtomicBool,
    max_page_size: usize,
    /// Start sequences of open transactions, with a count per sequence.
    active: Mutex<BTreeMap<u64, usize>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("open", &self.is_open())
            .field("max_page_size", &self.inner.max_page_size)
            .field("open_transactions", &self.active().values().sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::open()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::open()
    }

    /// Opens an empty store with default settings.
    pub fn open() -> Self {
        MemoryStoreBuilder::new().open()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::new()
    }

    /// Drops all data. Every later call on this store or its clones fails.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *state = Snapshot::default();
        info!("memory store closed");
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Sequence of the last commit.
    pub fn head_seq(&self) -> Result<u64> {
        Ok(self.snapshot()?.seq)
    }

    /// Starts a transaction over every table.
    pub fn begin(&self, ctx: &Context) -> Result<Transaction> {
        ctx.check()?;
        self.ensure_open()?;
        let state = self
            .inner
            .state
            .read()
            .map_err(|_| Error::backend("poisoned lock"))?;
        // registered under the read lock so no commit prunes past it first
        *self.active().entry(state.seq).or_insert(0) += 1;
        Ok(Transaction::new(self.clone(), Snapshot::clone(&state)))
    }

    fn active(&self) -> MutexGuard<'_, BTreeMap<u64, usize>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Unregisters one transaction that started at `seq`.
    pub(crate) fn release(&self, seq: u64) {
        let mut active = self.active();
        if let Some(count) = active.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                active.remove(&seq);
            }
        }
    }

    /// Oldest start sequence among open transactions.
    pub(crate) fn oldest_active(&self) -> Option<u64> {
        self.active().first_key_value().map(|(seq, _)| *seq)
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::backend("memory store is closed"));
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        let state = self
            .inner
            .state
            .read()
            .map_err(|_| Error::backend("poisoned lock"))?;
        Ok(Snapshot::clone(&state))
    }

    pub(crate) fn write_state(&self) -> Result<RwLockWriteGuard<'_, Snapshot>> {
        self.ensure_open()?;
        let state = self
            .inner
            .state
            .write()
            .map_err(|_| Error::backend("poisoned lock"))?;
        // close() may have raced with the lock acquisition
        self.ensure_open()?;
        Ok(state)
    }

    fn commit(&self, ctx: &Context, tx: Transaction) -> Result<u64> {
        if let Err(err) = ctx.check() {
            tx.abort();
            return Err(err);
        }
        tx.commit()
    }

    fn page<R>(&self, rows: Vec<(Key, R)>, after: Option<&Cursor>, limit: usize) -> Page<R> {
        let max = self.inner.max_page_size;
        let limit = if limit == 0 { max } else { limit.min(max) };
        let mut rows: Vec<(Key, R)> = rows
            .into_iter()
            .filter(|(key, _)| after.is_none_or(|cursor| *key > cursor.0))
            .take(limit + 1)
            .collect();
        let next = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|(key, _)| Cursor(key.clone()))
        } else {
            None
        };
        Page {
            items: rows.into_iter().map(|(_, row)| row).collect(),
            next,
        }
    }
}

fn rows_only<R>(rows: Vec<(Key, R)>) -> Vec<R> {
    rows.into_iter().map(|(_, row)| row).collect()
}

fn attribute_key(key: &AttributeKey) -> Key {
    vec![
        key.entity.entity_type.clone(),
        key.entity.id.clone(),
        key.attribute.clone(),
    ]
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, ctx: &Context, id: TenantId, name: &str) -> Result<Tenant> {
        let tenant = Tenant {
            id,
            name: name.to_string(),
        };
        let mut tx = self.begin(ctx)?;
        tx.stage_change(Change::PutTenant(tenant.clone()));
        let seq = self.commit(ctx, tx)?;
        info!(tenant = %tenant.id, seq, "tenant created");
        Ok(tenant)
    }

    async fn read_tenant(&self, ctx: &Context, id: &TenantId) -> Result<Tenant> {
        ctx.check()?;
        self.snapshot()?
            .tenant_row(id.as_str())
            .cloned()
            .ok_or_else(|| Error::not_found(RowKind::Tenant, id.as_str()))
    }

    async fn list_tenants(&self, ctx: &Context) -> Result<Vec<Tenant>> {
        ctx.check()?;
        Ok(self.snapshot()?.tenants.iter().cloned().collect())
    }

    async fn delete_tenant(&self, ctx: &Context, id: &TenantId) -> Result<Tenant> {
        let mut tx = self.begin(ctx)?;
        let tenant = tx
            .view()
            .tenant_row(id.as_str())
            .cloned()
            .ok_or_else(|| Error::not_found(RowKind::Tenant, id.as_str()))?;
        tx.stage_change(Change::DropTenant(id.clone()));
        let seq = self.commit(ctx, tx)?;
        info!(tenant = %id, seq, "tenant deleted with its data");
        Ok(tenant)
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn write_schemas(
        &self,
        ctx: &Context,
        definitions: Vec<SchemaDefinition>,
    ) -> Result<u64> {
        let mut tx = self.begin(ctx)?;
        let count = definitions.len();
        for definition in definitions {
            tx.stage_change(Change::PutSchema(definition));
        }
        let seq = self.commit(ctx, tx)?;
        info!(count, seq, "schemas written");
        Ok(seq)
    }

    async fn read_schema(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        name: &str,
        version: &str,
    ) -> Result<SchemaDefinition> {
        ctx.check()?;
        self.snapshot()?
            .schemas
            .get(tenant.as_str(), &[name.to_string(), version.to_string()])
            .cloned()
            .ok_or_else(|| Error::not_found(RowKind::Schema, format!("{tenant}/{name}@{version}")))
    }

    async fn read_schemas_by_version(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        version: &str,
    ) -> Result<Vec<SchemaDefinition>> {
        ctx.check()?;
        let rows = self.snapshot()?.schemas.scan(
            tenant.as_str(),
            SchemaIndex::Version,
            &[version.to_string()],
        )?;
        Ok(rows_only(rows))
    }

    async fn head_version(&self, ctx: &Context, tenant: &TenantId) -> Result<String> {
        ctx.check()?;
        self.snapshot()?
            .schema_heads
            .get(tenant.as_str())
            .cloned()
            .ok_or_else(|| Error::not_found(RowKind::Schema, tenant.as_str()))
    }

    async fn list_schemas(
        &self,
        ctx: &Context,
        tenant: &TenantId,
    ) -> Result<Vec<SchemaDefinition>> {
        ctx.check()?;
        let rows = self
            .snapshot()?
            .schemas
            .scan(tenant.as_str(), SchemaIndex::Id, &[])?;
        Ok(rows_only(rows))
    }
}

#[async_trait]
impl DataReader for MemoryStore {
    async fn query_tuples(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        index: TupleIndex,
        prefix: &[String],
    ) -> Result<Vec<RelationTuple>> {
        ctx.check()?;
        let rows = self.snapshot()?.tuples.scan(tenant.as_str(), index, prefix)?;
        Ok(rows_only(rows))
    }

    async fn query_tuples_page(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        index: TupleIndex,
        prefix: &[String],
        after: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page<RelationTuple>> {
        ctx.check()?;
        let rows = self.snapshot()?.tuples.scan(tenant.as_str(), index, prefix)?;
        Ok(self.page(rows, after, limit))
    }

    async fn query_relationships(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        filter: &TupleFilter,
    ) -> Result<Vec<RelationTuple>> {
        ctx.check()?;
        let (index, prefix) = filter.plan();
        debug!(tenant = %tenant, %index, ?prefix, "relationship query plan");
        let rows = self.snapshot()?.tuples.scan(tenant.as_str(), index, &prefix)?;
        ctx.check()?;
        Ok(rows
            .into_iter()
            .map(|(_, tuple)| tuple)
            .filter(|tuple| filter.matches(tuple))
            .collect())
    }

    async fn query_attributes(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        index: AttributeIndex,
        prefix: &[String],
    ) -> Result<Vec<Attribute>> {
        ctx.check()?;
        let rows = self
            .snapshot()?
            .attributes
            .scan(tenant.as_str(), index, prefix)?;
        Ok(rows_only(rows))
    }

    async fn read_attributes(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        filter: &AttributeFilter,
    ) -> Result<Vec<Attribute>> {
        ctx.check()?;
        let (index, prefix) = filter.plan();
        debug!(tenant = %tenant, %index, ?prefix, "attribute query plan");
        let rows = self
            .snapshot()?
            .attributes
            .scan(tenant.as_str(), index, &prefix)?;
        ctx.check()?;
        Ok(rows
            .into_iter()
            .map(|(_, attribute)| attribute)
            .filter(|attribute| filter.matches(attribute))
            .collect())
    }

    async fn read_attribute(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        key: &AttributeKey,
    ) -> Result<Attribute> {
        ctx.check()?;
        self.snapshot()?
            .attributes
            .get(tenant.as_str(), &attribute_key(key))
            .cloned()
            .ok_or_else(|| Error::not_found(RowKind::Attribute, format!("{tenant}/{key}")))
    }
}

/// Stages `plan` and tallies what it did; deletes of absent rows are skipped.
fn stage_plan<'a>(
    tx: &mut Transaction,
    tenant: &TenantId,
    plan: impl IntoIterator<Item = &'a Mutation>,
) -> Result<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();
    for mutation in plan {
        let existed = tx.stage(tenant, mutation.clone())?;
        match mutation {
            Mutation::WriteTuple(_) => outcome.tuples_written += 1,
            Mutation::WriteAttribute(_) => outcome.attributes_written += 1,
            Mutation::DeleteTuple(_) if existed => outcome.tuples_deleted += 1,
            Mutation::DeleteAttribute(_) if existed => outcome.attributes_deleted += 1,
            Mutation::DeleteTuple(_) | Mutation::DeleteAttribute(_) => {
                debug!(tenant = %tenant, %mutation, "delete target absent, skipped");
            }
        }
    }
    Ok(outcome)
}

#[async_trait]
impl DataWriter for MemoryStore {
    async fn write(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        tuples: Vec<RelationTuple>,
        attributes: Vec<Attribute>,
    ) -> Result<ApplyOutcome> {
        let plan: Vec<Mutation> = tuples
            .into_iter()
            .map(Mutation::WriteTuple)
            .chain(attributes.into_iter().map(Mutation::WriteAttribute))
            .collect();
        self.apply(ctx, tenant, &plan).await
    }

    async fn delete_tuple(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        tuple: &RelationTuple,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.begin(ctx)?;
        if !tx.stage(tenant, Mutation::DeleteTuple(tuple.clone()))? {
            tx.abort();
            return Err(Error::not_found(RowKind::Tuple, format!("{tenant}/{tuple}")));
        }
        let seq = self.commit(ctx, tx)?;
        Ok(ApplyOutcome {
            seq,
            tuples_deleted: 1,
            ..ApplyOutcome::default()
        })
    }

    async fn delete_attribute(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        key: &AttributeKey,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.begin(ctx)?;
        if !tx.stage(tenant, Mutation::DeleteAttribute(key.clone()))? {
            tx.abort();
            return Err(Error::not_found(RowKind::Attribute, format!("{tenant}/{key}")));
        }
        let seq = self.commit(ctx, tx)?;
        Ok(ApplyOutcome {
            seq,
            attributes_deleted: 1,
            ..ApplyOutcome::default()
        })
    }

    async fn delete(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        tuples: &TupleFilter,
        attributes: &AttributeFilter,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.begin(ctx)?;
        let mut plan = Vec::new();
        if !tuples.is_empty() {
            let (index, prefix) = tuples.plan();
            plan.extend(
                tx.view()
                    .tuples
                    .scan(tenant.as_str(), index, &prefix)?
                    .into_iter()
                    .map(|(_, tuple)| tuple)
                    .filter(|tuple| tuples.matches(tuple))
                    .map(Mutation::DeleteTuple),
            );
        }
        if !attributes.is_empty() {
            let (index, prefix) = attributes.plan();
            plan.extend(
                tx.view()
                    .attributes
                    .scan(tenant.as_str(), index, &prefix)?
                    .into_iter()
                    .map(|(_, attribute)| attribute)
                    .filter(|attribute| attributes.matches(attribute))
                    .map(|attribute| Mutation::DeleteAttribute(attribute.key())),
            );
        }
        ctx.check()?;
        let mut outcome = stage_plan(&mut tx, tenant, &plan)?;
        outcome.seq = self.commit(ctx, tx)?;
        info!(
            tenant = %tenant,
            seq = outcome.seq,
            tuples = outcome.tuples_deleted,
            attributes = outcome.attributes_deleted,
            "filtered delete committed"
        );
        Ok(outcome)
    }

    async fn apply(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        plan: &[Mutation],
    ) -> Result<ApplyOutcome> {
        let mut tx = self.begin(ctx)?;
        let mut outcome = stage_plan(&mut tx, tenant, plan)?;
        outcome.seq = self.commit(ctx, tx)?;
        debug!(tenant = %tenant, seq = outcome.seq, steps = plan.len(), "plan applied");
        Ok(outcome)
    }
}

#[async_trait]
impl BundleReader for MemoryStore {
    async fn read_bundle(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        name: &str,
    ) -> Result<DataBundle> {
        ctx.check()?;
        debug!(tenant = %tenant, bundle = name, "bundle lookup is not tenant scoped");
        self.snapshot()?
            .bundles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BundleNotFound(name.to_string()))
    }
}

#[async_trait]
impl BundleWriter for MemoryStore {
    async fn write_bundles(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        bundles: Vec<DataBundle>,
    ) -> Result<Vec<String>> {
        if bundles.iter().any(|bundle| bundle.name.trim().is_empty()) {
            return Err(Error::InvalidId("bundle name must not be empty".to_string()));
        }
        let mut tx = self.begin(ctx)?;
        let names: Vec<String> = bundles.iter().map(|bundle| bundle.name.clone()).collect();
        for bundle in bundles {
            tx.stage_change(Change::PutBundle(bundle));
        }
        let seq = self.commit(ctx, tx)?;
        info!(tenant = %tenant, seq, ?names, "bundles written");
        Ok(names)
    }

    async fn delete_bundle(&self, ctx: &Context, tenant: &TenantId, name: &str) -> Result<()> {
        let mut tx = self.begin(ctx)?;
        if !tx.stage_change(Change::DropBundle(name.to_string())) {
            tx.abort();
            return Err(Error::BundleNotFound(name.to_string()));
        }
        let seq = self.commit(ctx, tx)?;
        info!(tenant = %tenant, seq, bundle = name, "bundle deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use super::*;
    use crate::attribute::AttributeValue;
    use crate::types::Entity;

    fn tenant(id: &str) -> TenantId {
        TenantId::try_from(id).unwrap()
    }

    fn tuple(value: &str) -> RelationTuple {
        RelationTuple::parse(value).unwrap()
    }

    #[test]
    fn memory_store_should_support_basic_flow() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");

        block_on(store.write(
            &ctx,
            &t1,
            vec![tuple("organization:org1#member@user:user1")],
            vec![Attribute::parse("organization:org1$public|boolean:true").unwrap()],
        ))
        .unwrap();

        let members = block_on(store.query_relationships(
            &ctx,
            &t1,
            &TupleFilter::new()
                .entity_type("organization")
                .entity_id("org1")
                .relation("member"),
        ))
        .unwrap();
        assert_eq!(members, vec![tuple("organization:org1#member@user:user1")]);

        let public = block_on(store.read_attribute(
            &ctx,
            &t1,
            &AttributeKey::new(Entity::new("organization", "org1"), "public"),
        ))
        .unwrap();
        assert_eq!(public.value, AttributeValue::Boolean(true));
    }

    #[test]
    fn attribute_overwrite_should_keep_last_value() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");
        for raw in ["account:a1$balance|integer:10", "account:a1$balance|integer:20"] {
            block_on(store.write(&ctx, &t1, Vec::new(), vec![Attribute::parse(raw).unwrap()]))
                .unwrap();
        }

        let rows = block_on(store.query_attributes(&ctx, &t1, AttributeIndex::Id, &[])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, AttributeValue::Integer(20));
    }

    #[test]
    fn delete_tuple_should_fail_when_absent() {
        let store = MemoryStore::new();
        let result = block_on(store.delete_tuple(
            &Context::background(),
            &tenant("t1"),
            &tuple("doc:d1#owner@user:u1"),
        ));
        assert!(matches!(
            result,
            Err(Error::NotFound {
                kind: RowKind::Tuple,
                ..
            })
        ));
        assert_eq!(store.head_seq().unwrap(), 0);
    }

    #[test]
    fn paged_query_should_resume_after_cursor() {
        let store = MemoryStore::builder().max_page_size(2).open();
        let ctx = Context::background();
        let t1 = tenant("t1");
        let tuples: Vec<RelationTuple> = (1..=5)
            .map(|n| tuple(&format!("doc:d{n}#viewer@user:u1")))
            .collect();
        block_on(store.write(&ctx, &t1, tuples.clone(), Vec::new())).unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = block_on(store.query_tuples_page(
                &ctx,
                &t1,
                TupleIndex::EntityTypeAndRelation,
                &["doc".to_string(), "viewer".to_string()],
                cursor.as_ref(),
                10,
            ))
            .unwrap();
            assert!(page.items.len() <= 2);
            seen.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, tuples);
    }

    #[test]
    fn filtered_delete_should_only_touch_matching_rows() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");
        block_on(store.write(
            &ctx,
            &t1,
            vec![
                tuple("doc:d1#viewer@user:u1"),
                tuple("doc:d1#viewer@user:u2"),
                tuple("doc:d1#owner@user:u1"),
            ],
            Vec::new(),
        ))
        .unwrap();

        let outcome = block_on(store.delete(
            &ctx,
            &t1,
            &TupleFilter::new().entity_type("doc").relation("viewer"),
            &AttributeFilter::new(),
        ))
        .unwrap();
        assert_eq!(outcome.tuples_deleted, 2);

        let rest = block_on(store.query_tuples(&ctx, &t1, TupleIndex::Id, &[])).unwrap();
        assert_eq!(rest, vec![tuple("doc:d1#owner@user:u1")]);
    }

    #[test]
    fn delete_tenant_should_cascade_to_its_rows() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let (t1, t2) = (tenant("t1"), tenant("t2"));
        block_on(store.create_tenant(&ctx, t1.clone(), "one")).unwrap();
        block_on(store.create_tenant(&ctx, t2.clone(), "two")).unwrap();
        for id in [&t1, &t2] {
            block_on(store.write(&ctx, id, vec![tuple("doc:d1#owner@user:u1")], Vec::new()))
                .unwrap();
            block_on(store.write_schemas(
                &ctx,
                vec![SchemaDefinition::new(id.clone(), "doc", "v1", "entity doc {}")],
            ))
            .unwrap();
        }

        let removed = block_on(store.delete_tenant(&ctx, &t1)).unwrap();
        assert_eq!(removed.name, "one");

        assert!(block_on(store.query_tuples(&ctx, &t1, TupleIndex::Id, &[])).unwrap().is_empty());
        assert!(block_on(store.list_schemas(&ctx, &t1)).unwrap().is_empty());
        assert!(block_on(store.head_version(&ctx, &t1)).is_err());
        assert_eq!(block_on(store.query_tuples(&ctx, &t2, TupleIndex::Id, &[])).unwrap().len(), 1);
        assert_eq!(
            block_on(store.list_tenants(&ctx)).unwrap(),
            vec![Tenant {
                id: t2,
                name: "two".to_string()
            }]
        );
        assert!(block_on(store.delete_tenant(&ctx, &t1)).is_err());
    }

    #[test]
    fn schema_catalog_should_track_versions() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");
        block_on(store.write_schemas(
            &ctx,
            vec![
                SchemaDefinition::new(t1.clone(), "user", "v1", "entity user {}"),
                SchemaDefinition::new(t1.clone(), "doc", "v1", "entity doc {}"),
            ],
        ))
        .unwrap();
        block_on(store.write_schemas(
            &ctx,
            vec![SchemaDefinition::new(t1.clone(), "doc", "v2", "entity doc { relation owner @user }")],
        ))
        .unwrap();

        assert_eq!(block_on(store.head_version(&ctx, &t1)).unwrap(), "v2");
        let v1: Vec<String> = block_on(store.read_schemas_by_version(&ctx, &t1, "v1"))
            .unwrap()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(v1, vec!["doc", "user"]);
        assert_eq!(block_on(store.list_schemas(&ctx, &t1)).unwrap().len(), 3);

        block_on(store.write_schemas(
            &ctx,
            vec![SchemaDefinition::new(t1.clone(), "doc", "v1", "entity doc { }")],
        ))
        .unwrap();
        let doc = block_on(store.read_schema(&ctx, &t1, "doc", "v1")).unwrap();
        assert_eq!(doc.body, "entity doc { }");
        assert!(matches!(
            block_on(store.read_schema(&ctx, &t1, "doc", "v3")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn closed_store_should_reject_calls() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.close();

        let result = block_on(clone.list_tenants(&Context::background()));
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(!clone.is_open());
    }

    #[test]
    fn close_should_drop_data_behind_poisoned_lock() {
        let store = MemoryStore::new();
        block_on(store.write(
            &Context::background(),
            &tenant("t1"),
            vec![tuple("doc:d1#owner@user:u1")],
            Vec::new(),
        ))
        .unwrap();

        let holder = store.clone();
        let poisoned = std::thread::spawn(move || {
            let _state = holder.inner.state.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(poisoned.is_err());

        store.close();
        let state = store
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        assert_eq!(state.tuples.len(), 0);
        assert_eq!(state.seq, 0);
    }

    #[test]
    fn empty_subject_relation_should_store_as_absent() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");
        let mut userset = tuple("doc:d1#viewer@user:u1");
        userset.subject.relation = Some(String::new());

        block_on(store.write(
            &ctx,
            &t1,
            vec![tuple("doc:d1#viewer@user:u1"), userset.clone()],
            Vec::new(),
        ))
        .unwrap();

        let rows = block_on(store.query_tuples(&ctx, &t1, TupleIndex::Id, &[])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject.relation, None);
        assert_eq!(RelationTuple::parse(&rows[0].to_string()).unwrap(), rows[0]);

        block_on(store.delete_tuple(&ctx, &t1, &userset)).unwrap();
        assert!(block_on(store.query_tuples(&ctx, &t1, TupleIndex::Id, &[])).unwrap().is_empty());
    }

    #[test]
    fn write_should_reject_rows_outside_grammar() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");

        let mut spaced = tuple("doc:d1#viewer@user:u1");
        spaced.subject.id = "u 1".to_string();
        let result = block_on(store.write(&ctx, &t1, vec![spaced], Vec::new()));
        assert!(matches!(result, Err(Error::InvalidRelationshipFormat(_))));

        let tags = Attribute::new(
            Entity::new("doc", "d1"),
            "tags",
            AttributeValue::StringArray(vec!["a,b".to_string()]),
        );
        let result = block_on(store.write(&ctx, &t1, Vec::new(), vec![tags]));
        assert!(matches!(result, Err(Error::InvalidAttributeFormat(_))));

        let unnamed = Attribute::new(Entity::new("doc", "d1"), "", AttributeValue::Boolean(true));
        let result = block_on(store.write(
            &ctx,
            &t1,
            vec![tuple("doc:d1#owner@user:u1")],
            vec![unnamed],
        ));
        assert!(matches!(result, Err(Error::InvalidAttributeFormat(_))));
        assert_eq!(store.head_seq().unwrap(), 0);
    }

    #[test]
    fn apply_of_absent_deletes_should_report_empty_outcome() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let t1 = tenant("t1");
        let key = AttributeKey::new(Entity::new("doc", "d1"), "title");

        let outcome = block_on(store.apply(
            &ctx,
            &t1,
            &[
                Mutation::DeleteTuple(tuple("doc:d1#owner@user:u1")),
                Mutation::DeleteAttribute(key),
            ],
        ))
        .unwrap();
        assert!(outcome.is_empty());

        let outcome = block_on(store.write(&ctx, &t1, vec![tuple("doc:d1#owner@user:u1")], Vec::new()))
            .unwrap();
        assert!(!outcome.is_empty());
    }

    #[test]
    fn cancelled_context_should_leave_state_untouched() {
        let store = MemoryStore::new();
        let (ctx, handle) = Context::cancellable();
        handle.cancel();

        let result = block_on(store.write(
            &ctx,
            &tenant("t1"),
            vec![tuple("doc:d1#owner@user:u1")],
            Vec::new(),
        ));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.head_seq().unwrap(), 0);
    }
}
