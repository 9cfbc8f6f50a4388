//! Snapshot-isolated transactions over the in-memory tables.
//!
//! A transaction works on a private copy of the committed snapshot taken when
//! it began. Commit takes the write lock, fails with
//! [`Error::TransactionConflict`] if any key it touched was committed by
//! someone else after that snapshot, and otherwise replays its changes onto
//! the latest state under a new sequence number. The lock is held only for
//! the check and the replay.
//!
//! Write versions are kept only while some open transaction could still
//! conflict with them. Each commit forgets versions at or below the oldest
//! start sequence among the transactions still open.

use crate::attribute::{Attribute, AttributeKey};
use crate::bundle::DataBundle;
use crate::error::{Error, Result, RowKind};
use crate::index::{Key, Row, Table};
use crate::memory_store::MemoryStore;
use crate::mutation::Mutation;
use crate::schema::SchemaDefinition;
use crate::tuple::RelationTuple;
use crate::types::{Tenant, TenantId};
use im::OrdMap;
use std::collections::BTreeSet;
use tracing::debug;

pub(crate) type WriteKey = (RowKind, Key);

/// One committed state of every table.
#[derive(Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) seq: u64,
    pub(crate) tenants: Table<Tenant>,
    pub(crate) schemas: Table<SchemaDefinition>,
    /// Version of the last committed schema write, per tenant.
    pub(crate) schema_heads: OrdMap<String, String>,
    pub(crate) tuples: Table<RelationTuple>,
    pub(crate) attributes: Table<Attribute>,
    /// Bundles are keyed by name alone, across tenants.
    pub(crate) bundles: OrdMap<String, DataBundle>,
    /// Sequence that last wrote each key.
    versions: OrdMap<WriteKey, u64>,
    /// Keys written by each sequence still present in `versions`.
    written: OrdMap<u64, Vec<WriteKey>>,
}

/// Change staged in a transaction.
#[derive(Clone, Debug)]
pub(crate) enum Change {
    Data(TenantId, Mutation),
    PutSchema(SchemaDefinition),
    PutTenant(Tenant),
    DropTenant(TenantId),
    PutBundle(DataBundle),
    DropBundle(String),
}

fn attribute_key_parts(key: &AttributeKey) -> Key {
    vec![
        key.entity.entity_type.clone(),
        key.entity.id.clone(),
        key.attribute.clone(),
    ]
}

impl Snapshot {
    /// Applies `change` and returns the keys it touched and whether its
    /// target row existed beforehand.
    fn apply(&mut self, change: &Change) -> (Vec<WriteKey>, bool) {
        let (touched, existed) = match change {
            Change::Data(tenant, mutation) => {
                let tenant = tenant.as_str();
                let (kind, (key, existed)) = match mutation {
                    Mutation::WriteTuple(tuple) => {
                        let (key, previous) = self.tuples.insert(tenant, tuple.clone());
                        (RowKind::Tuple, (key, previous.is_some()))
                    }
                    Mutation::DeleteTuple(tuple) => {
                        let (key, removed) = self.tuples.remove(tenant, &tuple.primary_key());
                        (RowKind::Tuple, (key, removed.is_some()))
                    }
                    Mutation::WriteAttribute(attribute) => {
                        let (key, previous) = self.attributes.insert(tenant, attribute.clone());
                        (RowKind::Attribute, (key, previous.is_some()))
                    }
                    Mutation::DeleteAttribute(attribute) => {
                        let (key, removed) = self
                            .attributes
                            .remove(tenant, &attribute_key_parts(attribute));
                        (RowKind::Attribute, (key, removed.is_some()))
                    }
                };
                (vec![(kind, key)], existed)
            }
            Change::PutSchema(definition) => {
                let tenant = definition.tenant.as_str();
                let (key, previous) = self.schemas.insert(tenant, definition.clone());
                self.schema_heads
                    .insert(tenant.to_string(), definition.version.clone());
                (vec![(RowKind::Schema, key)], previous.is_some())
            }
            Change::PutTenant(tenant) => {
                let (key, previous) = self.tenants.insert(tenant.id.as_str(), tenant.clone());
                (vec![(RowKind::Tenant, key)], previous.is_some())
            }
            Change::DropTenant(tenant) => {
                let tenant = tenant.as_str();
                let (key, removed) = self.tenants.remove(tenant, &[]);
                let mut touched = vec![(RowKind::Tenant, key)];
                touched.extend(
                    self.schemas
                        .remove_tenant(tenant)
                        .into_iter()
                        .map(|key| (RowKind::Schema, key)),
                );
                touched.extend(
                    self.tuples
                        .remove_tenant(tenant)
                        .into_iter()
                        .map(|key| (RowKind::Tuple, key)),
                );
                touched.extend(
                    self.attributes
                        .remove_tenant(tenant)
                        .into_iter()
                        .map(|key| (RowKind::Attribute, key)),
                );
                self.schema_heads.remove(tenant);
                (touched, removed.is_some())
            }
            Change::PutBundle(bundle) => {
                let previous = self.bundles.insert(bundle.name.clone(), bundle.clone());
                (
                    vec![(RowKind::Bundle, vec![bundle.name.clone()])],
                    previous.is_some(),
                )
            }
            Change::DropBundle(name) => {
                let removed = self.bundles.remove(name);
                (
                    vec![(RowKind::Bundle, vec![name.clone()])],
                    removed.is_some(),
                )
            }
        };
        (touched, existed)
    }

    fn record(&mut self, keys: Vec<WriteKey>, seq: u64) {
        for key in &keys {
            self.versions.insert(key.clone(), seq);
        }
        let mut at_seq = self.written.remove(&seq).unwrap_or_default();
        at_seq.extend(keys);
        self.written.insert(seq, at_seq);
    }

    /// Drops the versions written at or below `horizon`.
    fn prune_versions(&mut self, horizon: u64) {
        while let Some(seq) = self
            .written
            .get_min()
            .map(|(seq, _)| *seq)
            .filter(|seq| *seq <= horizon)
        {
            for key in self.written.remove(&seq).unwrap_or_default() {
                // a later write of the same key keeps its own entry
                if self.versions.get(&key) == Some(&seq) {
                    self.versions.remove(&key);
                }
            }
        }
    }

    fn last_write(&self, key: &WriteKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Number of keys with a write version still tracked.
    pub(crate) fn tracked_writes(&self) -> usize {
        self.versions.len()
    }

    pub(crate) fn tenant_row(&self, tenant: &str) -> Option<&Tenant> {
        self.tenants.get(tenant, &[])
    }
}

/// Transaction spanning every table of a [`MemoryStore`].
///
/// Reads through the transaction see its own staged changes. Dropping a
/// transaction without committing discards it.
pub struct Transaction {
    store: MemoryStore,
    start_seq: u64,
    working: Snapshot,
    changes: Vec<Change>,
    touched: BTreeSet<WriteKey>,
    /// Whether `start_seq` is still registered with the store.
    registered: bool,
}

impl Transaction {
    /// Wraps `snapshot`; its sequence must already be registered with `store`.
    pub(crate) fn new(store: MemoryStore, snapshot: Snapshot) -> Self {
        Self {
            store,
            start_seq: snapshot.seq,
            working: snapshot,
            changes: Vec::new(),
            touched: BTreeSet::new(),
            registered: true,
        }
    }

    /// Sequence of the snapshot this transaction reads from.
    pub fn start_seq(&self) -> u64 {
        self.start_seq
    }

    /// Stages `mutation` for `tenant`; returns whether the target row existed.
    ///
    /// Rows with fields outside the grammar are rejected and nothing is
    /// staged. An empty subject relation is stored as an absent one.
    pub fn stage(&mut self, tenant: &TenantId, mutation: Mutation) -> Result<bool> {
        let mutation = mutation.normalized()?;
        Ok(self.stage_change(Change::Data(tenant.clone(), mutation)))
    }

    pub(crate) fn stage_change(&mut self, change: Change) -> bool {
        let (touched, existed) = self.working.apply(&change);
        self.touched.extend(touched);
        self.changes.push(change);
        existed
    }

    /// Working state: the start snapshot with staged changes applied.
    pub(crate) fn view(&self) -> &Snapshot {
        &self.working
    }

    /// Number of staged changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn tuple_exists(&self, tenant: &TenantId, tuple: &RelationTuple) -> bool {
        self.working
            .tuples
            .get(tenant.as_str(), &tuple.primary_key())
            .is_some()
    }

    pub fn attribute(&self, tenant: &TenantId, key: &AttributeKey) -> Option<Attribute> {
        self.working
            .attributes
            .get(tenant.as_str(), &attribute_key_parts(key))
            .cloned()
    }

    /// Publishes the staged changes atomically and returns the commit sequence.
    ///
    /// An empty transaction commits nothing and returns its start sequence.
    pub fn commit(mut self) -> Result<u64> {
        if self.is_empty() {
            return Ok(self.start_seq);
        }
        let mut state = self.store.write_state()?;
        if let Some((kind, key)) = self
            .touched
            .iter()
            .find(|key| state.last_write(key) > self.start_seq)
        {
            debug!(
                start_seq = self.start_seq,
                head_seq = state.seq,
                "conflict on {kind} {}",
                key.join("/")
            );
            return Err(Error::TransactionConflict);
        }

        let seq = state.seq + 1;
        let mut next = Snapshot::clone(&state);
        for change in &self.changes {
            let (keys, _) = next.apply(change);
            next.record(keys, seq);
        }
        next.seq = seq;

        self.registered = false;
        self.store.release(self.start_seq);
        next.prune_versions(self.store.oldest_active().unwrap_or(seq));
        debug!(
            seq,
            changes = self.changes.len(),
            tuples = next.tuples.len(),
            attributes = next.attributes.len(),
            tracked_writes = next.tracked_writes(),
            "committed transaction"
        );
        *state = next;
        Ok(seq)
    }

    /// Discards the staged changes.
    pub fn abort(self) {
        debug!(
            start_seq = self.start_seq,
            changes = self.changes.len(),
            "aborted transaction"
        );
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.registered {
            self.store.release(self.start_seq);
        }
    }
}
