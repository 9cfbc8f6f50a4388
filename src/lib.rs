//! Storage and mutation core for relationship-based access control.
//!
//! This crate holds relation tuples, typed entity attributes, versioned schema
//! definitions, a tenant registry and reusable data bundles behind a pluggable
//! async store interface. Every row lives under a tenant-prefixed compound key
//! so no query can see another tenant's data. Use [`BundleEngine`] to run a
//! bundle: its templates are bound, parsed and applied as one transaction.
//!
//! # Examples
//!
//! Running a bundle against the in-memory store (enable `memory-store`):
//! ```no_run
//! use rebac_store::{BundleEngineBuilder, BundleWriter, Context, DataBundle, Operation, TenantId};
//! use std::collections::HashMap;
//! # #[cfg(feature = "memory-store")]
//! # futures::executor::block_on(async {
//! use rebac_store::MemoryStore;
//! let store = MemoryStore::new();
//! let ctx = Context::background();
//! let tenant = TenantId::try_from("t1").unwrap();
//! let bundle = DataBundle::new("member_added")
//!     .argument("orgID")
//!     .argument("userID")
//!     .operation(Operation::new().write_relationship(
//!         "organization:{{.orgID}}#member@user:{{.userID}}",
//!     ));
//! store.write_bundles(&ctx, &tenant, vec![bundle]).await.unwrap();
//!
//! let engine = BundleEngineBuilder::new(store).build();
//! let values = HashMap::from([
//!     ("orgID".to_string(), "org1".to_string()),
//!     ("userID".to_string(), "u1".to_string()),
//! ]);
//! let outcome = engine.run(&ctx, &tenant, "member_added", &values).await.unwrap();
//! assert_eq!(outcome.tuples_written, 1);
//! # });
//! ```
#![forbid(unsafe_code)]

mod attribute;
mod bundle;
mod context;
mod engine;
mod error;
mod mutation;
mod schema;
mod store;
pub mod template;
mod tuple;
mod types;

#[cfg(feature = "memory-store")]
mod index;
#[cfg(feature = "memory-store")]
mod memory_store;
#[cfg(feature = "memory-store")]
mod transaction;

pub use crate::attribute::{Attribute, AttributeFilter, AttributeIndex, AttributeKey, AttributeValue};
pub use crate::bundle::{DataBundle, Operation};
pub use crate::context::{CancelHandle, Context};
pub use crate::engine::{BundleEngine, BundleEngineBuilder};
pub use crate::error::{Error, ErrorCode, Result, RowKind, StoreError};
pub use crate::mutation::{ApplyOutcome, Mutation};
pub use crate::schema::{SchemaDefinition, SchemaIndex};
pub use crate::store::{
    BundleReader, BundleWriter, Cursor, DataReader, DataWriter, Page, SchemaStore, Store,
    TenantStore,
};
pub use crate::tuple::{RelationTuple, Subject, TupleField, TupleFilter, TupleIndex};
pub use crate::types::{Entity, Tenant, TenantId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::{MemoryStore, MemoryStoreBuilder};
#[cfg(feature = "memory-store")]
pub use crate::transaction::Transaction;
