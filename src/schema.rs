//! Schema describing node types and their properties
//!
//! The schema is the type collaborator consulted by the graph, the recorder
//! and the undo engine. Each type owns an ordered descriptor table; a
//! [`PropertyId`] is an index into that table and into every node's slots,
//! so property access never goes through runtime reflection.
//!
//! ## Property kinds
//!
//! - **Attribute**: scalar data (`DataType`)
//! - **ContainmentReference**: owning edge; the target becomes a child
//! - **NonContainmentReference**: cross-reference, never owning
//! - **MixedContent**: an ordered sequence interleaving entries of several
//!   member properties. Members declare `mixed_member_of` and are derived
//!   views over that sequence.
//!
//! ## Examples
//!
//! ```rust
//! use rewind::schema::{DataType, PropertyDescriptor, Schema};
//!
//! let schema = Schema::builder()
//!     .add_type("Department", vec![
//!         PropertyDescriptor::attribute("name", DataType::String),
//!         PropertyDescriptor::containment("employees", "Employee").many(),
//!     ])
//!     .add_type("Employee", vec![
//!         PropertyDescriptor::attribute("name", DataType::String),
//!         PropertyDescriptor::attribute("sn", DataType::String).read_only(),
//!     ])
//!     .build()?;
//!
//! let dept = schema.type_id("Department")?;
//! let employees = schema.property_id(dept, "employees")?;
//! assert!(schema.is_many(dept, employees)?);
//! # Ok::<(), rewind::RewindError>(())
//! ```

use crate::collections::HashMap;
use crate::error::{Result, RewindError};
use crate::types::{PropertyId, TypeId, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a property relates its owner to its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Scalar data
    Attribute,
    /// Owning edge to a child node
    ContainmentReference,
    /// Non-owning edge to any node
    NonContainmentReference,
    /// Ordered heterogeneous sequence over member properties
    MixedContent,
}

impl PropertyKind {
    /// Check whether values of this kind are node references
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            PropertyKind::ContainmentReference | PropertyKind::NonContainmentReference
        )
    }
}

/// Scalar data type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// `Value::Str`
    String,
    /// `Value::Int`
    Int,
    /// `Value::Float` (integers are accepted)
    Float,
    /// `Value::Bool`
    Bool,
    /// Any scalar
    #[default]
    Any,
}

impl DataType {
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (DataType::String, Value::Str(_)) => true,
            (DataType::Int, Value::Int(_)) => true,
            (DataType::Float, Value::Float(_) | Value::Int(_)) => true,
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Any, v) => matches!(
                v,
                Value::Str(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_)
            ),
            _ => false,
        }
    }
}

/// Declaration of one property of a type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name, unique within the type
    pub name: String,
    /// Relationship kind
    pub kind: PropertyKind,
    /// Whether the property holds a list
    #[serde(default)]
    pub many: bool,
    /// Whether tracked writes are forbidden
    #[serde(default)]
    pub read_only: bool,
    /// Data type for attributes
    #[serde(default)]
    pub data_type: DataType,
    /// Required target type name for references (any type if absent)
    #[serde(default)]
    pub target_type: Option<String>,
    /// Value of an unset single-valued property
    #[serde(default)]
    pub default: Value,
    /// Name of the mixed-content property this property is a view over
    #[serde(default)]
    pub mixed_member_of: Option<String>,
    #[serde(skip)]
    target: Option<TypeId>,
    #[serde(skip)]
    mixed_owner: Option<PropertyId>,
}

impl PropertyDescriptor {
    fn new(name: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            many: false,
            read_only: false,
            data_type: DataType::Any,
            target_type: None,
            default: Value::Null,
            mixed_member_of: None,
            target: None,
            mixed_owner: None,
        }
    }

    /// Declare an attribute
    pub fn attribute(name: &str, data_type: DataType) -> Self {
        Self {
            data_type,
            ..Self::new(name, PropertyKind::Attribute)
        }
    }

    /// Declare a containment reference to nodes of `target`
    pub fn containment(name: &str, target: &str) -> Self {
        Self {
            target_type: Some(target.to_string()),
            ..Self::new(name, PropertyKind::ContainmentReference)
        }
    }

    /// Declare a cross-reference to nodes of `target`
    pub fn reference(name: &str, target: &str) -> Self {
        Self {
            target_type: Some(target.to_string()),
            ..Self::new(name, PropertyKind::NonContainmentReference)
        }
    }

    /// Declare a mixed-content sequence
    pub fn mixed(name: &str) -> Self {
        Self {
            many: true,
            ..Self::new(name, PropertyKind::MixedContent)
        }
    }

    /// Make the property many-valued
    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    /// Make the property read-only for tracked graphs
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set the default of an unset single-valued property
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    /// Make the property a view over the named mixed-content property
    pub fn member_of(mut self, mixed: &str) -> Self {
        self.mixed_member_of = Some(mixed.to_string());
        self
    }

    /// Check whether this property owns its values
    pub fn is_containment(&self) -> bool {
        self.kind == PropertyKind::ContainmentReference
    }

    /// Check whether this is the mixed-content property itself
    pub fn is_mixed(&self) -> bool {
        self.kind == PropertyKind::MixedContent
    }

    /// Resolved target type for references
    pub fn target(&self) -> Option<TypeId> {
        self.target
    }

    /// Mixed-content property this property is derived from
    pub fn mixed_owner(&self) -> Option<PropertyId> {
        self.mixed_owner
    }

    /// Value an unset slot of this property holds
    pub fn unset_value(&self) -> Value {
        if self.is_mixed() {
            Value::Mixed(Vec::new())
        } else if self.many {
            Value::List(Vec::new())
        } else {
            self.default.clone()
        }
    }
}

/// Declaration of a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name, unique within the schema
    pub name: String,
    /// Ordered descriptor table; `PropertyId(i)` is `properties[i]`
    pub properties: Vec<PropertyDescriptor>,
    #[serde(skip)]
    by_name: HashMap<String, PropertyId>,
    #[serde(skip)]
    mixed: Option<PropertyId>,
}

impl TypeDescriptor {
    /// Create a type from its properties
    pub fn new(name: &str, properties: Vec<PropertyDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            properties,
            by_name: HashMap::default(),
            mixed: None,
        }
    }

    /// The mixed-content property, if the type has one
    pub fn mixed_property(&self) -> Option<PropertyId> {
        self.mixed
    }

    /// Look up a property by name
    pub fn property_id(&self, name: &str) -> Option<PropertyId> {
        self.by_name.get(name).copied()
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    types: Vec<TypeDescriptor>,
}

/// Registry of every node type
#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, TypeId>,
}

impl Schema {
    /// Start building a schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Load a schema from JSON
    ///
    /// The document is `{"types": [{"name": ..., "properties": [...]}]}`
    /// where each property uses the field names of [`PropertyDescriptor`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rewind::schema::Schema;
    ///
    /// let schema = Schema::from_json(r#"{
    ///     "types": [
    ///         {"name": "Quote", "properties": [
    ///             {"name": "symbol", "kind": "attribute", "data_type": "string"},
    ///             {"name": "quotes", "kind": "containment_reference", "many": true, "target_type": "Quote"}
    ///         ]}
    ///     ]
    /// }"#)?;
    /// assert_eq!(schema.len(), 1);
    /// # Ok::<(), rewind::RewindError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let document: SchemaDocument = serde_json::from_str(json)?;
        let mut builder = SchemaBuilder::new();
        for descriptor in document.types {
            builder.types.push(descriptor);
        }
        builder.build()
    }

    /// Number of declared types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check whether no types are declared
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Look up a type by name
    pub fn type_id(&self, name: &str) -> Result<TypeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RewindError::UnknownType(name.to_string()))
    }

    /// Descriptor of a type
    pub fn type_descriptor(&self, type_id: TypeId) -> Result<&TypeDescriptor> {
        self.types
            .get(type_id.index())
            .ok_or_else(|| RewindError::UnknownType(format!("{:?}", type_id)))
    }

    /// Name of a type
    pub fn type_name(&self, type_id: TypeId) -> &str {
        self.types
            .get(type_id.index())
            .map(|t| t.name.as_str())
            .unwrap_or("<unknown>")
    }

    /// Ordered property table of a type
    pub fn features(&self, type_id: TypeId) -> Result<&[PropertyDescriptor]> {
        Ok(&self.type_descriptor(type_id)?.properties)
    }

    /// Descriptor of one property
    pub fn property(&self, type_id: TypeId, property: PropertyId) -> Result<&PropertyDescriptor> {
        let descriptor = self.type_descriptor(type_id)?;
        descriptor
            .properties
            .get(property.index())
            .ok_or_else(|| RewindError::UnknownProperty {
                type_name: descriptor.name.clone(),
                property: property.0.to_string(),
            })
    }

    /// Look up a property by name
    pub fn property_id(&self, type_id: TypeId, name: &str) -> Result<PropertyId> {
        let descriptor = self.type_descriptor(type_id)?;
        descriptor
            .property_id(name)
            .ok_or_else(|| RewindError::UnknownProperty {
                type_name: descriptor.name.clone(),
                property: name.to_string(),
            })
    }

    /// Kind of a property
    pub fn property_kind(&self, type_id: TypeId, property: PropertyId) -> Result<PropertyKind> {
        Ok(self.property(type_id, property)?.kind)
    }

    /// Whether a property is read-only
    pub fn is_read_only(&self, type_id: TypeId, property: PropertyId) -> Result<bool> {
        Ok(self.property(type_id, property)?.read_only)
    }

    /// Whether a property is many-valued
    pub fn is_many(&self, type_id: TypeId, property: PropertyId) -> Result<bool> {
        Ok(self.property(type_id, property)?.many)
    }

    /// The mixed-content property of a type, if any
    pub fn mixed_property(&self, type_id: TypeId) -> Option<PropertyId> {
        self.types.get(type_id.index()).and_then(|t| t.mixed)
    }

    /// `Type.property` label used in errors and logs
    pub fn label(&self, type_id: TypeId, property: PropertyId) -> String {
        match self.property(type_id, property) {
            Ok(p) => format!("{}.{}", self.type_name(type_id), p.name),
            Err(_) => format!("{}.{}", self.type_name(type_id), property.0),
        }
    }

    /// Validate a whole-slot value for a property
    ///
    /// Node references are only checked for shape here; the graph checks
    /// target types because only it knows the type of each node.
    pub fn check_value(&self, type_id: TypeId, property: PropertyId, value: &Value) -> Result<()> {
        let descriptor = self.property(type_id, property)?;
        if descriptor.mixed_owner.is_some() {
            return Err(RewindError::DerivedProperty(self.label(type_id, property)));
        }
        match (descriptor.kind, value) {
            (PropertyKind::MixedContent, Value::Mixed(entries)) => {
                for entry in entries {
                    self.check_mixed_entry(type_id, property, entry.property, &entry.value)?;
                }
                Ok(())
            }
            (PropertyKind::MixedContent, other) => Err(RewindError::type_mismatch(
                self.label(type_id, property),
                "mixed",
                other.kind_name(),
            )),
            (_, Value::List(items)) if descriptor.many => {
                for item in items {
                    self.check_item(type_id, property, item)?;
                }
                Ok(())
            }
            (_, other) if descriptor.many => Err(RewindError::type_mismatch(
                self.label(type_id, property),
                "list",
                other.kind_name(),
            )),
            (_, Value::Null) => Ok(()),
            (_, other) => self.check_item(type_id, property, other),
        }
    }

    /// Validate one item of a property (a list element or a single value)
    pub fn check_item(&self, type_id: TypeId, property: PropertyId, value: &Value) -> Result<()> {
        let descriptor = self.property(type_id, property)?;
        let ok = match descriptor.kind {
            PropertyKind::Attribute => descriptor.data_type.accepts(value),
            PropertyKind::ContainmentReference | PropertyKind::NonContainmentReference => {
                matches!(value, Value::Node(_))
            }
            PropertyKind::MixedContent => false,
        };
        if ok {
            Ok(())
        } else {
            let expected = match descriptor.kind {
                PropertyKind::Attribute => format!("{:?}", descriptor.data_type).to_lowercase(),
                PropertyKind::MixedContent => "mixed entry".to_string(),
                _ => "node".to_string(),
            };
            Err(RewindError::type_mismatch(
                self.label(type_id, property),
                expected,
                value.kind_name(),
            ))
        }
    }

    /// Validate one entry destined for a mixed-content property
    pub fn check_mixed_entry(
        &self,
        type_id: TypeId,
        mixed: PropertyId,
        member: PropertyId,
        value: &Value,
    ) -> Result<()> {
        let descriptor = self.property(type_id, member)?;
        if descriptor.mixed_owner != Some(mixed) {
            return Err(RewindError::type_mismatch(
                self.label(type_id, mixed),
                "member of this mixed property",
                self.label(type_id, member),
            ));
        }
        self.check_item(type_id, member, value)
    }

    /// Whether a node of `actual` may be referenced by `property`
    pub fn accepts_target(&self, type_id: TypeId, property: PropertyId, actual: TypeId) -> Result<bool> {
        Ok(self
            .property(type_id, property)?
            .target
            .map_or(true, |target| target == actual))
    }
}

/// Builder for [`Schema`]
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeDescriptor>,
}

impl SchemaBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type
    pub fn add_type(mut self, name: &str, properties: Vec<PropertyDescriptor>) -> Self {
        self.types.push(TypeDescriptor::new(name, properties));
        self
    }

    /// Resolve names and validate the schema
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidSchema`] if a type or property name is
    /// duplicated, a reference names an unknown type, a type declares more
    /// than one mixed-content property, or a member names a property that is
    /// not the type's mixed-content property.
    pub fn build(self) -> Result<Schema> {
        let mut by_name = HashMap::default();
        for (index, descriptor) in self.types.iter().enumerate() {
            if by_name
                .insert(descriptor.name.clone(), TypeId(index as u32))
                .is_some()
            {
                return Err(RewindError::invalid_schema(format!(
                    "duplicate type '{}'",
                    descriptor.name
                )));
            }
        }

        let mut types = self.types;
        for descriptor in &mut types {
            resolve_type(descriptor, &by_name)?;
        }

        debug!("Built schema with {} types", types.len());
        Ok(Schema { types, by_name })
    }
}

fn resolve_type(descriptor: &mut TypeDescriptor, types: &HashMap<String, TypeId>) -> Result<()> {
    let type_name = descriptor.name.clone();
    let mut by_name = HashMap::default();
    let mut mixed = None;

    for (index, property) in descriptor.properties.iter_mut().enumerate() {
        let id = PropertyId(index as u32);
        if by_name.insert(property.name.clone(), id).is_some() {
            return Err(RewindError::invalid_schema(format!(
                "duplicate property '{}' on type '{}'",
                property.name, type_name
            )));
        }
        if property.is_mixed() {
            if mixed.is_some() {
                return Err(RewindError::invalid_schema(format!(
                    "type '{}' declares more than one mixed-content property",
                    type_name
                )));
            }
            property.many = true;
            mixed = Some(id);
        }
        property.target = match (&property.target_type, property.kind.is_reference()) {
            (Some(target), true) => Some(*types.get(target).ok_or_else(|| {
                RewindError::invalid_schema(format!(
                    "property '{}.{}' references unknown type '{}'",
                    type_name, property.name, target
                ))
            })?),
            _ => None,
        };
    }

    for property in &mut descriptor.properties {
        property.mixed_owner = match &property.mixed_member_of {
            None => None,
            Some(owner) => {
                let owner_id = by_name.get(owner).copied().filter(|id| Some(*id) == mixed);
                if owner_id.is_none() || property.is_mixed() {
                    return Err(RewindError::invalid_schema(format!(
                        "property '{}.{}' is not a valid member of mixed property '{}'",
                        type_name, property.name, owner
                    )));
                }
                owner_id
            }
        };
    }

    descriptor.by_name = by_name;
    descriptor.mixed = mixed;
    Ok(())
}
