use crate::types::TenantId;

/// Named, versioned authorization schema text for one tenant.
///
/// Keyed by (tenant, name, version); writing the same key again replaces
/// the body.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaDefinition {
    pub tenant: TenantId,
    pub name: String,
    pub version: String,
    pub body: String,
}

impl SchemaDefinition {
    pub fn new(
        tenant: TenantId,
        name: impl Into<String>,
        version: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            tenant,
            name: name.into(),
            version: version.into(),
            body: body.into(),
        }
    }
}

/// Indexes over the schema table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum SchemaIndex {
    /// (tenant, name, version); scanned with an empty prefix it is the tenant index.
    Id,
    /// (tenant, version)
    Version,
}
