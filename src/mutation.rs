use crate::attribute::{Attribute, AttributeKey};
use crate::error::Result;
use crate::tuple::RelationTuple;
use std::fmt;

/// One step of a write plan against the tuple or attribute table.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mutation {
    WriteTuple(RelationTuple),
    DeleteTuple(RelationTuple),
    WriteAttribute(Attribute),
    DeleteAttribute(AttributeKey),
}

impl Mutation {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteTuple(_) | Self::DeleteAttribute(_))
    }

    /// Rejects rows whose fields could not have come from the grammar.
    pub fn normalized(self) -> Result<Self> {
        Ok(match self {
            Self::WriteTuple(tuple) => Self::WriteTuple(tuple.normalized()?),
            Self::DeleteTuple(tuple) => Self::DeleteTuple(tuple.normalized()?),
            Self::WriteAttribute(attribute) => {
                attribute.validate()?;
                Self::WriteAttribute(attribute)
            }
            Self::DeleteAttribute(key) => {
                key.validate()?;
                Self::DeleteAttribute(key)
            }
        })
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteTuple(tuple) => write!(f, "write {tuple}"),
            Self::DeleteTuple(tuple) => write!(f, "delete {tuple}"),
            Self::WriteAttribute(attribute) => write!(f, "write {attribute}"),
            Self::DeleteAttribute(key) => write!(f, "delete {key}"),
        }
    }
}

/// What a committed write did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApplyOutcome {
    /// Commit sequence the changes became visible at.
    pub seq: u64,
    pub tuples_written: usize,
    pub tuples_deleted: usize,
    pub attributes_written: usize,
    pub attributes_deleted: usize,
}

impl ApplyOutcome {
    pub fn is_empty(&self) -> bool {
        self.tuples_written == 0
            && self.tuples_deleted == 0
            && self.attributes_written == 0
            && self.attributes_deleted == 0
    }
}
