//! Entity attributes and their typed values.

use crate::error::{Error, Result};
use crate::types::{Entity, is_segment};
use std::fmt;
use std::str::FromStr;

/// Typed attribute value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttributeValue {
    Boolean(bool),
    BooleanArray(Vec<bool>),
    String(String),
    StringArray(Vec<String>),
    Integer(i32),
    IntegerArray(Vec<i32>),
    Double(f64),
    DoubleArray(Vec<f64>),
}

impl AttributeValue {
    /// Parses `raw` as `type_name` (`boolean`, `string`, `integer`, `double`,
    /// each optionally suffixed with `[]`). Array values are comma separated;
    /// an empty array literal is the empty string.
    pub fn parse(type_name: &str, raw: &str) -> Option<Self> {
        fn list<T>(raw: &str, item: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
            if raw.is_empty() {
                return Some(Vec::new());
            }
            raw.split(',').map(item).collect()
        }

        match type_name {
            "boolean" => parse_bool(raw).map(Self::Boolean),
            "boolean[]" => list(raw, parse_bool).map(Self::BooleanArray),
            "string" => Some(Self::String(raw.to_string())),
            "string[]" => {
                list(raw, |item| (!item.is_empty()).then(|| item.to_string())).map(Self::StringArray)
            }
            "integer" => raw.parse().ok().map(Self::Integer),
            "integer[]" => list(raw, |item| item.parse().ok()).map(Self::IntegerArray),
            "double" => raw.parse().ok().map(Self::Double),
            "double[]" => list(raw, |item| item.parse().ok()).map(Self::DoubleArray),
            _ => None,
        }
    }

    /// Whether the value survives a display and parse round trip. String
    /// array items must be non-empty and free of commas.
    pub fn is_encodable(&self) -> bool {
        match self {
            Self::StringArray(values) => values
                .iter()
                .all(|value| !value.is_empty() && !value.contains(',')),
            _ => true,
        }
    }

    /// Type name as written in the attribute grammar.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::BooleanArray(_) => "boolean[]",
            Self::String(_) => "string",
            Self::StringArray(_) => "string[]",
            Self::Integer(_) => "integer",
            Self::IntegerArray(_) => "integer[]",
            Self::Double(_) => "double",
            Self::DoubleArray(_) => "double[]",
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "TRUE" | "True" | "1" | "t" | "T" => Some(true),
        "false" | "FALSE" | "False" | "0" | "f" | "F" => Some(false),
        _ => None,
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (position, item) in items.iter().enumerate() {
        if position > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(value) => write!(f, "{value}"),
            Self::BooleanArray(values) => join(f, values),
            Self::String(value) => f.write_str(value),
            Self::StringArray(values) => join(f, values),
            Self::Integer(value) => write!(f, "{value}"),
            Self::IntegerArray(values) => join(f, values),
            Self::Double(value) => write!(f, "{value}"),
            Self::DoubleArray(values) => join(f, values),
        }
    }
}

/// Unique key of an attribute row (tenant implied by the caller).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeKey {
    pub entity: Entity,
    pub attribute: String,
}

impl AttributeKey {
    pub fn new(entity: Entity, attribute: impl Into<String>) -> Self {
        Self {
            entity,
            attribute: attribute.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.entity.is_well_formed() || !is_segment(&self.attribute) {
            return Err(Error::InvalidAttributeFormat(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.entity, self.attribute)
    }
}

/// Typed value attached to an entity.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attribute {
    pub entity: Entity,
    pub attribute: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(entity: Entity, attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            entity,
            attribute: attribute.into(),
            value,
        }
    }

    /// Parses `entityType:entityID$attribute|type:value`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidAttributeFormat(input.to_string());

        let (entity, rest) = input.split_once('$').ok_or_else(invalid)?;
        let entity = Entity::parse_reference(entity).ok_or_else(invalid)?;
        let (attribute, typed) = rest.split_once('|').ok_or_else(invalid)?;
        if !is_segment(attribute) {
            return Err(invalid());
        }
        let (type_name, raw) = typed.split_once(':').ok_or_else(invalid)?;
        let value = AttributeValue::parse(type_name, raw).ok_or_else(invalid)?;

        Ok(Self {
            entity,
            attribute: attribute.to_string(),
            value,
        })
    }

    /// Checks the key segments and the value of an attribute built outside
    /// the parser.
    pub fn validate(&self) -> Result<()> {
        if !self.entity.is_well_formed()
            || !is_segment(&self.attribute)
            || !self.value.is_encodable()
        {
            return Err(Error::InvalidAttributeFormat(self.to_string()));
        }
        Ok(())
    }

    pub fn key(&self) -> AttributeKey {
        AttributeKey::new(self.entity.clone(), self.attribute.clone())
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}${}|{}:{}",
            self.entity,
            self.attribute,
            self.value.type_name(),
            self.value
        )
    }
}

impl FromStr for Attribute {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Tenant-prefixed compound indexes over the attribute table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum AttributeIndex {
    /// Unique key: (tenant, entity type, entity id, attribute).
    Id,
    /// (tenant, entity type)
    EntityType,
    /// (tenant, entity type, attribute)
    EntityTypeAndAttribute,
}

impl AttributeIndex {
    pub const ALL: [AttributeIndex; 3] = [Self::Id, Self::EntityType, Self::EntityTypeAndAttribute];

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::EntityType => "entity-type-index",
            Self::EntityTypeAndAttribute => "entity-type-and-attribute-index",
        }
    }

    /// Number of key components following the tenant.
    pub fn arity(self) -> usize {
        match self {
            Self::Id => 3,
            Self::EntityType => 1,
            Self::EntityTypeAndAttribute => 2,
        }
    }
}

impl fmt::Display for AttributeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attribute query filter. Unset fields match anything.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeFilter {
    pub entity_type: Option<String>,
    pub entity_ids: Vec<String>,
    pub attributes: Vec<String>,
}

impl AttributeFilter {
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

    pub fn attribute(mut self, value: impl Into<String>) -> Self {
        self.attributes.push(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Narrowest index for this filter and the prefix to scan it with.
    pub fn plan(&self) -> (AttributeIndex, Vec<String>) {
        let Some(entity_type) = self.entity_type.clone() else {
            return (AttributeIndex::Id, Vec::new());
        };
        match (self.entity_ids.as_slice(), self.attributes.as_slice()) {
            ([id], [attribute]) => (
                AttributeIndex::Id,
                vec![entity_type, id.clone(), attribute.clone()],
            ),
            ([id], _) => (AttributeIndex::Id, vec![entity_type, id.clone()]),
            (_, [attribute]) => (
                AttributeIndex::EntityTypeAndAttribute,
                vec![entity_type, attribute.clone()],
            ),
            _ => (AttributeIndex::EntityType, vec![entity_type]),
        }
    }

    pub fn matches(&self, attribute: &Attribute) -> bool {
        self.entity_type
            .as_deref()
            .is_none_or(|value| value == attribute.entity.entity_type)
            && (self.entity_ids.is_empty() || self.entity_ids.contains(&attribute.entity.id))
            && (self.attributes.is_empty() || self.attributes.contains(&attribute.attribute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_should_read_scalar_boolean() {
        let attribute = Attribute::parse("organization:org1$public|boolean:true").unwrap();
        assert_eq!(attribute.entity, Entity::new("organization", "org1"));
        assert_eq!(attribute.attribute, "public");
        assert_eq!(attribute.value, AttributeValue::Boolean(true));
    }

    #[test]
    fn parse_should_read_integer_array() {
        let attribute = Attribute::parse("organization:org1$balance|integer[]:120,568").unwrap();
        assert_eq!(attribute.value, AttributeValue::IntegerArray(vec![120, 568]));
        assert_eq!(
            attribute.to_string(),
            "organization:org1$balance|integer[]:120,568"
        );
    }

    #[test]
    fn parse_should_keep_colons_inside_string_values() {
        let attribute = Attribute::parse("user:u1$homepage|string:https://example.com").unwrap();
        assert_eq!(
            attribute.value,
            AttributeValue::String("https://example.com".to_string())
        );
    }

    #[test]
    fn parse_should_read_double_and_empty_array() {
        let attribute = Attribute::parse("account:a1$ratio|double:0.25").unwrap();
        assert_eq!(attribute.value, AttributeValue::Double(0.25));

        let attribute = Attribute::parse("account:a1$tags|string[]:").unwrap();
        assert_eq!(attribute.value, AttributeValue::StringArray(Vec::new()));
    }

    #[test]
    fn parse_should_reject_values_not_matching_type() {
        for input in [
            "organization:org1$public|boolean:maybe",
            "organization:org1$balance|integer:12.5",
            "organization:org1$balance|integer[]:1,,2",
            "organization:org1$tags|string[]:a,,b",
            "organization:org1$tags|string[]:a,",
            "organization:org1$balance|integer:99999999999",
            "organization:org1$balance|decimal:1",
            "organization:org1$balance|integer",
            "organization:org1$balance:1",
            "organization$balance|integer:1",
            "organization:org1$|integer:1",
        ] {
            assert!(
                matches!(Attribute::parse(input), Err(Error::InvalidAttributeFormat(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn display_should_reparse_to_same_value_for_every_type() {
        let values = [
            AttributeValue::Boolean(false),
            AttributeValue::BooleanArray(vec![true, false]),
            AttributeValue::String(String::new()),
            AttributeValue::String("a,b|c:d$e".to_string()),
            AttributeValue::StringArray(Vec::new()),
            AttributeValue::StringArray(vec!["red".to_string(), "green blue".to_string()]),
            AttributeValue::Integer(-42),
            AttributeValue::IntegerArray(vec![i32::MIN, 0, i32::MAX]),
            AttributeValue::Double(0.1),
            AttributeValue::DoubleArray(vec![-1.5, 1e-300, 2.0]),
        ];
        for value in values {
            let attribute = Attribute::new(Entity::new("doc", "d1"), "field", value);
            assert!(attribute.validate().is_ok(), "{attribute} should be writable");
            let reparsed = Attribute::parse(&attribute.to_string()).unwrap();
            assert_eq!(reparsed, attribute);
        }
    }

    #[test]
    fn validate_should_reject_string_items_that_cannot_round_trip() {
        for items in [
            vec![String::new()],
            vec!["a,b".to_string()],
            vec!["a".to_string(), String::new()],
        ] {
            let attribute = Attribute::new(
                Entity::new("doc", "d1"),
                "tags",
                AttributeValue::StringArray(items),
            );
            assert!(matches!(
                attribute.validate(),
                Err(Error::InvalidAttributeFormat(_))
            ));
        }
    }

    #[test]
    fn plan_should_use_entity_type_and_attribute_index() {
        let filter = AttributeFilter::new()
            .entity_type("organization")
            .attribute("public");
        assert_eq!(
            filter.plan(),
            (
                AttributeIndex::EntityTypeAndAttribute,
                vec!["organization".to_string(), "public".to_string()]
            )
        );
    }

    #[test]
    fn plan_should_use_primary_key_for_single_entity() {
        let filter = AttributeFilter::new()
            .entity_type("organization")
            .entity_id("org1");
        assert_eq!(
            filter.plan(),
            (
                AttributeIndex::Id,
                vec!["organization".to_string(), "org1".to_string()]
            )
        );
    }
}
