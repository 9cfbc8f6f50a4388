//! Data bundles: named, parameterized write/delete templates.

use crate::attribute::Attribute;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::mutation::Mutation;
use crate::template;
use crate::tuple::RelationTuple;
use std::collections::HashMap;

/// One group of templates inside a bundle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operation {
    pub relationships_write: Vec<String>,
    pub relationships_delete: Vec<String>,
    pub attributes_write: Vec<String>,
    pub attributes_delete: Vec<String>,
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_relationship(mut self, template: impl Into<String>) -> Self {
        self.relationships_write.push(template.into());
        self
    }

    pub fn delete_relationship(mut self, template: impl Into<String>) -> Self {
        self.relationships_delete.push(template.into());
        self
    }

    pub fn write_attribute(mut self, template: impl Into<String>) -> Self {
        self.attributes_write.push(template.into());
        self
    }

    pub fn delete_attribute(mut self, template: impl Into<String>) -> Self {
        self.attributes_delete.push(template.into());
        self
    }

    fn templates(&self) -> impl Iterator<Item = (TemplateKind, &String)> {
        fn tagged(kind: TemplateKind, list: &[String]) -> impl Iterator<Item = (TemplateKind, &String)> {
            list.iter().map(move |item| (kind, item))
        }
        tagged(TemplateKind::RelationshipWrite, &self.relationships_write)
            .chain(tagged(TemplateKind::RelationshipDelete, &self.relationships_delete))
            .chain(tagged(TemplateKind::AttributeWrite, &self.attributes_write))
            .chain(tagged(TemplateKind::AttributeDelete, &self.attributes_delete))
    }
}

#[derive(Clone, Copy, Debug)]
enum TemplateKind {
    RelationshipWrite,
    RelationshipDelete,
    AttributeWrite,
    AttributeDelete,
}

impl TemplateKind {
    fn parse(self, resolved: &str) -> Result<Mutation> {
        Ok(match self {
            Self::RelationshipWrite => Mutation::WriteTuple(RelationTuple::parse(resolved)?),
            Self::RelationshipDelete => Mutation::DeleteTuple(RelationTuple::parse(resolved)?),
            Self::AttributeWrite => Mutation::WriteAttribute(Attribute::parse(resolved)?),
            Self::AttributeDelete => Mutation::DeleteAttribute(Attribute::parse(resolved)?.key()),
        })
    }
}

/// Named, reusable template of tuple and attribute mutations.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataBundle {
    pub name: String,
    /// Placeholder names the templates may reference.
    pub arguments: Vec<String>,
    pub operations: Vec<Operation>,
}

impl DataBundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn argument(mut self, name: impl Into<String>) -> Self {
        self.arguments.push(name.into());
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Checks that every template only uses declared placeholders.
    pub fn validate(&self) -> Result<()> {
        for (_, template) in self.operations.iter().flat_map(Operation::templates) {
            for name in template::placeholders(template)? {
                if !self.arguments.iter().any(|declared| declared == name) {
                    return Err(Error::UndeclaredPlaceholder(name.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Binds `values` and parses every template into an ordered mutation plan.
    ///
    /// Operations are walked in declared order; inside one operation the
    /// order is relationship writes, relationship deletes, attribute writes,
    /// attribute deletes. Nothing is returned unless every template parses.
    pub fn expand(&self, ctx: &Context, values: &HashMap<String, String>) -> Result<Vec<Mutation>> {
        if let Some(missing) = self
            .arguments
            .iter()
            .find(|name| !values.contains_key(name.as_str()))
        {
            return Err(Error::MissingArgument(missing.clone()));
        }

        let mut resolved = Vec::new();
        for operation in &self.operations {
            ctx.check()?;
            for (kind, text) in operation.templates() {
                resolved.push((kind, template::render(text, &self.arguments, values)?));
            }
        }

        ctx.check()?;
        resolved
            .iter()
            .map(|(kind, text)| kind.parse(text))
            .collect()
    }
}
