//! Relation tuples and their lookup indexes.

use crate::error::{Error, Result};
use crate::types::{Entity, is_segment};
use std::fmt;
use std::str::FromStr;

/// Subject of a relation tuple, optionally a userset (`type:id#relation`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subject {
    pub subject_type: String,
    pub id: String,
    /// `None` is the "no relation" value. It is never equal to an empty relation.
    pub relation: Option<String>,
}

impl Subject {
    pub fn new(subject_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            id: id.into(),
            relation: None,
        }
    }

    /// Userset subject; an empty relation is normalized to `None`.
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        self.relation = (!relation.is_empty()).then_some(relation);
        self
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.id)?;
        if let Some(relation) = &self.relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

/// Relationship assertion: `subject` holds `relation` on `entity`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelationTuple {
    pub entity: Entity,
    pub relation: String,
    pub subject: Subject,
}

impl RelationTuple {
    pub fn new(entity: Entity, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            entity,
            relation: relation.into(),
            subject,
        }
    }

    /// Parses `entityType:entityID#relation@subjectType:subjectID[#subjectRelation]`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidRelationshipFormat(input.to_string());

        let (object, subject) = input.split_once('@').ok_or_else(invalid)?;
        let (entity, relation) = object.split_once('#').ok_or_else(invalid)?;
        let entity = Entity::parse_reference(entity).ok_or_else(invalid)?;
        if !is_segment(relation) {
            return Err(invalid());
        }

        let (subject_ref, subject_relation) = match subject.split_once('#') {
            Some((subject_ref, relation)) => (subject_ref, Some(relation)),
            None => (subject, None),
        };
        let subject_ref = Entity::parse_reference(subject_ref).ok_or_else(invalid)?;
        if subject_relation.is_some_and(|relation| !is_segment(relation)) {
            return Err(invalid());
        }

        Ok(Self {
            entity,
            relation: relation.to_string(),
            subject: Subject {
                subject_type: subject_ref.entity_type,
                id: subject_ref.id,
                relation: subject_relation.map(str::to_string),
            },
        })
    }

    /// Checks the fields of a tuple built outside the parser.
    ///
    /// An empty subject relation becomes `None`, so it keys and displays the
    /// same as a tuple without one.
    pub fn normalized(mut self) -> Result<Self> {
        if self.subject.relation.as_deref() == Some("") {
            self.subject.relation = None;
        }
        let well_formed = self.entity.is_well_formed()
            && is_segment(&self.relation)
            && is_segment(&self.subject.subject_type)
            && is_segment(&self.subject.id)
            && self.subject.relation.as_deref().is_none_or(is_segment);
        if !well_formed {
            return Err(Error::InvalidRelationshipFormat(self.to_string()));
        }
        Ok(self)
    }

    /// Value of one key field; the absent subject relation reads as `""`.
    pub(crate) fn field(&self, field: TupleField) -> &str {
        match field {
            TupleField::EntityType => &self.entity.entity_type,
            TupleField::EntityId => &self.entity.id,
            TupleField::Relation => &self.relation,
            TupleField::SubjectType => &self.subject.subject_type,
            TupleField::SubjectId => &self.subject.id,
            TupleField::SubjectRelation => self.subject.relation.as_deref().unwrap_or(""),
        }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.entity, self.relation, self.subject)
    }
}

impl FromStr for RelationTuple {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Key field of a relation tuple, in primary key order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum TupleField {
    EntityType,
    EntityId,
    Relation,
    SubjectType,
    SubjectId,
    SubjectRelation,
}

/// Tenant-prefixed compound indexes over the relation tuple table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum TupleIndex {
    /// Unique key: all seven fields.
    Id,
    /// (tenant, entity type, entity id, relation)
    Entity,
    /// (tenant, entity type, relation, subject type)
    Relation,
    /// (tenant, entity type)
    EntityType,
    /// (tenant, entity type, relation)
    EntityTypeAndRelation,
}

impl TupleIndex {
    pub const ALL: [TupleIndex; 5] = [
        Self::Id,
        Self::Entity,
        Self::Relation,
        Self::EntityType,
        Self::EntityTypeAndRelation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Entity => "entity-index",
            Self::Relation => "relation-index",
            Self::EntityType => "entity-type-index",
            Self::EntityTypeAndRelation => "entity-type-and-relation-index",
        }
    }

    /// Fields following the tenant, in index order.
    pub fn fields(self) -> &'static [TupleField] {
        use TupleField::*;
        match self {
            Self::Id => &[
                EntityType,
                EntityId,
                Relation,
                SubjectType,
                SubjectId,
                SubjectRelation,
            ],
            Self::Entity => &[EntityType, EntityId, Relation],
            Self::Relation => &[EntityType, Relation, SubjectType],
            Self::EntityType => &[EntityType],
            Self::EntityTypeAndRelation => &[EntityType, Relation],
        }
    }
}

impl fmt::Display for TupleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relationship query filter. Unset fields match anything.
///
/// `subject_relation` set to `""` matches tuples without a subject relation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TupleFilter {
    pub entity_type: Option<String>,
    pub entity_ids: Vec<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_ids: Vec<String>,
    pub subject_relation: Option<String>,
}

impl TupleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_type(mut self, value: impl Into<String>) -> Self {
        self.entity_type = Some(value.into());
        self
    }

    pub fn entity_id(mut self, value: impl Into<String>) -> Self {
        self.entity_ids.push(value.into());
        self
    }

    pub fn relation(mut self, value: impl Into<String>) -> Self {
        self.relation = Some(value.into());
        self
    }

    pub fn subject_type(mut self, value: impl Into<String>) -> Self {
        self.subject_type = Some(value.into());
        self
    }

    pub fn subject_id(mut self, value: impl Into<String>) -> Self {
        self.subject_ids.push(value.into());
        self
    }

    pub fn subject_relation(mut self, value: impl Into<String>) -> Self {
        self.subject_relation = Some(value.into());
        self
    }

    /// Returns whether no field is constrained.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Single value a field is pinned to, usable as an index key component.
    fn bound(&self, field: TupleField) -> Option<&str> {
        fn single(values: &[String]) -> Option<&str> {
            match values {
                [value] => Some(value.as_str()),
                _ => None,
            }
        }
        match field {
            TupleField::EntityType => self.entity_type.as_deref(),
            TupleField::EntityId => single(&self.entity_ids),
            TupleField::Relation => self.relation.as_deref(),
            TupleField::SubjectType => self.subject_type.as_deref(),
            TupleField::SubjectId => single(&self.subject_ids),
            TupleField::SubjectRelation => self.subject_relation.as_deref(),
        }
    }

    /// Picks the index whose bound prefix is longest, preferring the
    /// shorter index on ties, and returns it with that prefix.
    pub fn plan(&self) -> (TupleIndex, Vec<String>) {
        let mut best = (TupleIndex::Id, Vec::new());
        for index in TupleIndex::ALL {
            let prefix: Vec<String> = index
                .fields()
                .iter()
                .map_while(|field| self.bound(*field).map(str::to_string))
                .collect();
            let better = prefix.len() > best.1.len()
                || (prefix.len() == best.1.len()
                    && !prefix.is_empty()
                    && index.fields().len() < best.0.fields().len());
            if better {
                best = (index, prefix);
            }
        }
        best
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        fn one_of(values: &[String], actual: &str) -> bool {
            values.is_empty() || values.iter().any(|value| value == actual)
        }
        self.entity_type
            .as_deref()
            .is_none_or(|value| value == tuple.entity.entity_type)
            && one_of(&self.entity_ids, &tuple.entity.id)
            && self
                .relation
                .as_deref()
                .is_none_or(|value| value == tuple.relation)
            && self
                .subject_type
                .as_deref()
                .is_none_or(|value| value == tuple.subject.subject_type)
            && one_of(&self.subject_ids, &tuple.subject.id)
            && self
                .subject_relation
                .as_deref()
                .is_none_or(|value| value == tuple.field(TupleField::SubjectRelation))
    }
}
