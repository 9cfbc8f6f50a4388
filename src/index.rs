//! Tenant-prefixed tables with compound secondary indexes.
//!
//! A table is one ordered primary map keyed by `[tenant, key fields...]` plus
//! one ordered map per secondary index from `[tenant, index fields...]` to the
//! primary keys sharing it. Every insert and remove updates all of them, so a
//! scan never sees an index out of step with the rows. The maps are
//! persistent (`im`), so cloning a table for a snapshot is O(1).

use crate::attribute::{Attribute, AttributeIndex};
use crate::error::{Error, Result, RowKind};
use crate::schema::{SchemaDefinition, SchemaIndex};
use crate::tuple::{RelationTuple, TupleField, TupleIndex};
use crate::types::Tenant;
use im::{OrdMap, OrdSet};
use std::fmt;

pub(crate) type Key = Vec<String>;

/// Row type stored in a [`Table`].
pub(crate) trait Row: Clone {
    type Index: Copy + Eq + fmt::Debug + 'static;

    const KIND: RowKind;
    const PRIMARY: Self::Index;
    const SECONDARY: &'static [Self::Index];

    /// Number of key components after the tenant.
    fn arity(index: Self::Index) -> usize;

    /// Unique key components after the tenant.
    fn primary_key(&self) -> Key;

    fn index_key(&self, index: Self::Index) -> Key;
}

#[derive(Clone)]
pub(crate) struct Table<R: Row> {
    rows: OrdMap<Key, R>,
    indexes: Vec<OrdMap<Key, OrdSet<Key>>>,
}

impl<R: Row> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: OrdMap::new(),
            indexes: R::SECONDARY.iter().map(|_| OrdMap::new()).collect(),
        }
    }
}

pub(crate) fn tenant_key(tenant: &str, parts: &[String]) -> Key {
    let mut key = Vec::with_capacity(parts.len() + 1);
    key.push(tenant.to_string());
    key.extend(parts.iter().cloned());
    key
}

impl<R: Row> Table<R> {
    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn get(&self, tenant: &str, primary: &[String]) -> Option<&R> {
        self.rows.get(&tenant_key(tenant, primary))
    }

    /// Upserts `row` and returns its full key with the row it replaced.
    pub(crate) fn insert(&mut self, tenant: &str, row: R) -> (Key, Option<R>) {
        let key = tenant_key(tenant, &row.primary_key());
        let previous = self.remove_key(&key);
        for (position, index) in R::SECONDARY.iter().enumerate() {
            let index_key = tenant_key(tenant, &row.index_key(*index));
            link(&mut self.indexes[position], index_key, &key);
        }
        self.rows.insert(key.clone(), row);
        (key, previous)
    }

    pub(crate) fn remove(&mut self, tenant: &str, primary: &[String]) -> (Key, Option<R>) {
        let key = tenant_key(tenant, primary);
        let removed = self.remove_key(&key);
        (key, removed)
    }

    /// Removes every row of `tenant` and returns their full keys.
    pub(crate) fn remove_tenant(&mut self, tenant: &str) -> Vec<Key> {
        let prefix = tenant_key(tenant, &[]);
        let keys: Vec<Key> = self
            .rows
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove_key(key);
        }
        keys
    }

    fn remove_key(&mut self, key: &Key) -> Option<R> {
        let row = self.rows.remove(key)?;
        let tenant = &key[0];
        for (position, index) in R::SECONDARY.iter().enumerate() {
            let index_key = tenant_key(tenant, &row.index_key(*index));
            unlink(&mut self.indexes[position], &index_key, key);
        }
        Some(row)
    }

    /// Rows of `tenant` whose `index` key starts with `prefix`, ordered by
    /// index key then primary key. Each row comes with its sort key, which
    /// callers use as a resume cursor.
    pub(crate) fn scan(
        &self,
        tenant: &str,
        index: R::Index,
        prefix: &[String],
    ) -> Result<Vec<(Key, R)>> {
        if prefix.len() > R::arity(index) {
            return Err(Error::InvalidQuery(format!(
                "{} index {index:?} takes at most {} key components, got {}",
                R::KIND,
                R::arity(index),
                prefix.len()
            )));
        }
        let start = tenant_key(tenant, prefix);

        if index == R::PRIMARY {
            return Ok(self
                .rows
                .range(start.clone()..)
                .take_while(|(key, _)| key.starts_with(&start))
                .map(|(key, row)| (key.clone(), row.clone()))
                .collect());
        }

        let position = R::SECONDARY
            .iter()
            .position(|candidate| *candidate == index)
            .ok_or_else(|| Error::InvalidQuery(format!("unknown {} index {index:?}", R::KIND)))?;
        let mut out = Vec::new();
        for (index_key, postings) in self.indexes[position]
            .range(start.clone()..)
            .take_while(|(key, _)| key.starts_with(&start))
        {
            for primary in postings.iter() {
                if let Some(row) = self.rows.get(primary) {
                    let mut sort_key = index_key.clone();
                    sort_key.extend(primary.iter().cloned());
                    out.push((sort_key, row.clone()));
                }
            }
        }
        Ok(out)
    }

    /// Every row in primary key order, across tenants.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }
}

fn link(index: &mut OrdMap<Key, OrdSet<Key>>, index_key: Key, primary: &Key) {
    match index.get_mut(&index_key) {
        Some(postings) => {
            postings.insert(primary.clone());
        }
        None => {
            index.insert(index_key, OrdSet::unit(primary.clone()));
        }
    }
}

fn unlink(index: &mut OrdMap<Key, OrdSet<Key>>, index_key: &Key, primary: &Key) {
    let now_empty = match index.get_mut(index_key) {
        Some(postings) => {
            postings.remove(primary);
            postings.is_empty()
        }
        None => false,
    };
    if now_empty {
        index.remove(index_key);
    }
}

fn tuple_fields(tuple: &RelationTuple, fields: &[TupleField]) -> Key {
    fields
        .iter()
        .map(|field| tuple.field(*field).to_string())
        .collect()
}

impl Row for RelationTuple {
    type Index = TupleIndex;

    const KIND: RowKind = RowKind::Tuple;
    const PRIMARY: TupleIndex = TupleIndex::Id;
    const SECONDARY: &'static [TupleIndex] = &[
        TupleIndex::Entity,
        TupleIndex::Relation,
        TupleIndex::EntityType,
        TupleIndex::EntityTypeAndRelation,
    ];

    fn arity(index: TupleIndex) -> usize {
        index.fields().len()
    }

    fn primary_key(&self) -> Key {
        tuple_fields(self, TupleIndex::Id.fields())
    }

    fn index_key(&self, index: TupleIndex) -> Key {
        tuple_fields(self, index.fields())
    }
}

impl Row for Attribute {
    type Index = AttributeIndex;

    const KIND: RowKind = RowKind::Attribute;
    const PRIMARY: AttributeIndex = AttributeIndex::Id;
    const SECONDARY: &'static [AttributeIndex] = &[
        AttributeIndex::EntityType,
        AttributeIndex::EntityTypeAndAttribute,
    ];

    fn arity(index: AttributeIndex) -> usize {
        index.arity()
    }

    fn primary_key(&self) -> Key {
        vec![
            self.entity.entity_type.clone(),
            self.entity.id.clone(),
            self.attribute.clone(),
        ]
    }

    fn index_key(&self, index: AttributeIndex) -> Key {
        match index {
            AttributeIndex::Id => self.primary_key(),
            AttributeIndex::EntityType => vec![self.entity.entity_type.clone()],
            AttributeIndex::EntityTypeAndAttribute => {
                vec![self.entity.entity_type.clone(), self.attribute.clone()]
            }
        }
    }
}

impl Row for SchemaDefinition {
    type Index = SchemaIndex;

    const KIND: RowKind = RowKind::Schema;
    const PRIMARY: SchemaIndex = SchemaIndex::Id;
    const SECONDARY: &'static [SchemaIndex] = &[SchemaIndex::Version];

    fn arity(index: SchemaIndex) -> usize {
        match index {
            SchemaIndex::Id => 2,
            SchemaIndex::Version => 1,
        }
    }

    fn primary_key(&self) -> Key {
        vec![self.name.clone(), self.version.clone()]
    }

    fn index_key(&self, index: SchemaIndex) -> Key {
        match index {
            SchemaIndex::Id => self.primary_key(),
            SchemaIndex::Version => vec![self.version.clone()],
        }
    }
}

/// Tenants are keyed by their own id, so the key has no fields after it.
impl Row for Tenant {
    type Index = ();

    const KIND: RowKind = RowKind::Tenant;
    const PRIMARY: () = ();
    const SECONDARY: &'static [()] = &[];

    fn arity(_index: ()) -> usize {
        0
    }

    fn primary_key(&self) -> Key {
        Vec::new()
    }

    fn index_key(&self, _index: ()) -> Key {
        Vec::new()
    }
}
