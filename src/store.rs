use crate::attribute::{Attribute, AttributeFilter, AttributeIndex, AttributeKey};
use crate::bundle::DataBundle;
use crate::context::Context;
use crate::error::Result;
use crate::mutation::{ApplyOutcome, Mutation};
use crate::schema::SchemaDefinition;
use crate::tuple::{RelationTuple, TupleFilter, TupleIndex};
use crate::types::{Tenant, TenantId};
use async_trait::async_trait;

/// Resume position inside an index scan.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Cursor(pub(crate) Vec<String>);

/// One page of an index scan.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Present when more rows follow; pass it back to continue.
    pub next: Option<Cursor>,
}

/// Store interface for the tenant registry.
#[async_trait]
pub trait TenantStore {
    /// Registers a tenant, replacing the name of an existing one.
    async fn create_tenant(&self, ctx: &Context, id: TenantId, name: &str) -> Result<Tenant>;

    async fn read_tenant(&self, ctx: &Context, id: &TenantId) -> Result<Tenant>;

    /// Returns tenants ordered by id.
    async fn list_tenants(&self, ctx: &Context) -> Result<Vec<Tenant>>;

    /// Removes a tenant together with its schemas, tuples and attributes.
    async fn delete_tenant(&self, ctx: &Context, id: &TenantId) -> Result<Tenant>;
}

/// Store interface for versioned schema definitions.
#[async_trait]
pub trait SchemaStore {
    /// Upserts definitions; returns the commit sequence.
    async fn write_schemas(&self, ctx: &Context, definitions: Vec<SchemaDefinition>)
    -> Result<u64>;

    async fn read_schema(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        name: &str,
        version: &str,
    ) -> Result<SchemaDefinition>;

    /// Returns every definition written under `version`, ordered by name.
    async fn read_schemas_by_version(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        version: &str,
    ) -> Result<Vec<SchemaDefinition>>;

    /// Version of the most recently committed schema write.
    async fn head_version(&self, ctx: &Context, tenant: &TenantId) -> Result<String>;

    /// Returns every definition of the tenant ordered by (name, version).
    async fn list_schemas(&self, ctx: &Context, tenant: &TenantId)
    -> Result<Vec<SchemaDefinition>>;
}

/// Read side of the tuple and attribute tables.
#[async_trait]
pub trait DataReader {
    /// Scans `index` for rows whose key starts with `prefix` (fields after the tenant).
    async fn query_tuples(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        index: TupleIndex,
        prefix: &[String],
    ) -> Result<Vec<RelationTuple>>;

    /// Paged variant of [`DataReader::query_tuples`]. A `limit` of zero means
    /// the store's maximum page size.
    async fn query_tuples_page(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        index: TupleIndex,
        prefix: &[String],
        after: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page<RelationTuple>>;

    /// Runs `filter` against the narrowest index it binds.
    async fn query_relationships(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        filter: &TupleFilter,
    ) -> Result<Vec<RelationTuple>>;

    async fn query_attributes(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        index: AttributeIndex,
        prefix: &[String],
    ) -> Result<Vec<Attribute>>;

    async fn read_attributes(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        filter: &AttributeFilter,
    ) -> Result<Vec<Attribute>>;

    async fn read_attribute(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        key: &AttributeKey,
    ) -> Result<Attribute>;
}

/// Write side of the tuple and attribute tables. Every call is one transaction.
#[async_trait]
pub trait DataWriter {
    /// Upserts tuples and attributes.
    async fn write(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        tuples: Vec<RelationTuple>,
        attributes: Vec<Attribute>,
    ) -> Result<ApplyOutcome>;

    /// Deletes one tuple; fails with `NotFound` when absent.
    async fn delete_tuple(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        tuple: &RelationTuple,
    ) -> Result<ApplyOutcome>;

    /// Deletes one attribute; fails with `NotFound` when absent.
    async fn delete_attribute(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        key: &AttributeKey,
    ) -> Result<ApplyOutcome>;

    /// Deletes every row matching the filters. An empty filter deletes nothing
    /// from its table.
    async fn delete(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        tuples: &TupleFilter,
        attributes: &AttributeFilter,
    ) -> Result<ApplyOutcome>;

    /// Applies `plan` in order as one transaction. Deleting an absent row is a
    /// no-op here.
    async fn apply(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        plan: &[Mutation],
    ) -> Result<ApplyOutcome>;
}

/// Store interface for reading bundles.
#[async_trait]
pub trait BundleReader {
    /// Fails with `BundleNotFound` when no bundle has this name.
    async fn read_bundle(&self, ctx: &Context, tenant: &TenantId, name: &str)
    -> Result<DataBundle>;
}

/// Store interface for writing bundles.
#[async_trait]
pub trait BundleWriter {
    /// Upserts bundles by name; returns the written names in input order.
    async fn write_bundles(
        &self,
        ctx: &Context,
        tenant: &TenantId,
        bundles: Vec<DataBundle>,
    ) -> Result<Vec<String>>;

    async fn delete_bundle(&self, ctx: &Context, tenant: &TenantId, name: &str) -> Result<()>;
}

/// Composite store trait.
pub trait Store:
    TenantStore + SchemaStore + DataReader + DataWriter + BundleReader + BundleWriter + Send + Sync
{
}

impl<T> Store for T where
    T: TenantStore
        + SchemaStore
        + DataReader
        + DataWriter
        + BundleReader
        + BundleWriter
        + Send
        + Sync
{
}
