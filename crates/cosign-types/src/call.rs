//! Call catalog and typed call values.
//!
//! A `CatalogEntry` describes one remote-callable operation as reported by
//! the ledger client. The builder turns an entry plus free-form user input
//! into a `TypedCall`, the submittable value.

use serde::{Deserialize, Serialize};

use crate::CallHash;

/// Marker wrapping a declared type whose value may be omitted.
const OPTION_PREFIX: &str = "Option<";

/// Marker wrapping a declared type holding a delimited list of elements.
const VECTOR_PREFIX: &str = "Vec<";

/// One parameter of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name as reported by the catalog
    pub name: String,
    /// Declared type string, including any `Option<...>` / `Vec<...>` wrapper
    pub declared_type: String,
    /// Whether the parameter may be left empty
    pub optional: bool,
}

impl ParamSpec {
    /// Build a spec from the catalog's declared type. Optionality follows the
    /// `Option<...>` wrapper convention.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        let optional = declared_type.starts_with(OPTION_PREFIX) && declared_type.ends_with('>');
        Self {
            name: name.into(),
            declared_type,
            optional,
        }
    }

    /// The type a present value coerces to, with any `Option<...>` wrapper
    /// stripped.
    pub fn coercion_type(&self) -> &str {
        if self.optional {
            self.declared_type
                .trim_start_matches(OPTION_PREFIX)
                .trim_end_matches('>')
        } else {
            &self.declared_type
        }
    }

    /// Whether the (unwrapped) type is a delimited list, and if so the
    /// element type.
    pub fn vector_element_type(&self) -> Option<&str> {
        let ty = self.coercion_type();
        if ty.starts_with(VECTOR_PREFIX) && ty.ends_with('>') {
            Some(ty.trim_start_matches(VECTOR_PREFIX).trim_end_matches('>'))
        } else {
            None
        }
    }
}

/// One remote-callable operation: `namespace.operation(params...)`.
/// Supplied by the ledger client; `(namespace, operation)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub namespace: String,
    pub operation: String,
    pub params: Vec<ParamSpec>,
}

impl CatalogEntry {
    pub fn new(
        namespace: impl Into<String>,
        operation: impl Into<String>,
        params: Vec<ParamSpec>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            params,
        }
    }
}

/// User-editable draft of a call: raw field values aligned 1:1 with the
/// entry's parameters. Becomes a `TypedCall` only through the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDraft {
    pub entry: CatalogEntry,
    pub raw_values: Vec<Option<String>>,
}

impl CallDraft {
    pub fn new(entry: CatalogEntry) -> Self {
        let raw_values = vec![None; entry.params.len()];
        Self { entry, raw_values }
    }

    /// Set a field from user input. Out-of-range indices are ignored; the
    /// draft always stays aligned with the entry's parameter list.
    pub fn set_value(&mut self, index: usize, value: impl Into<String>) {
        if let Some(slot) = self.raw_values.get_mut(index) {
            *slot = Some(value.into());
        }
    }

    pub fn clear_value(&mut self, index: usize) {
        if let Some(slot) = self.raw_values.get_mut(index) {
            *slot = None;
        }
    }
}

/// A coerced call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallArg {
    Uint(u128),
    Int(i128),
    Float(f64),
    Bool(bool),
    Text(String),
    Vector(Vec<CallArg>),
    /// Sentinel for a present-but-empty optional parameter. Keeps the call
    /// shape arity-stable instead of omitting the slot.
    Absent,
}

/// A well-typed, submittable call value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedCall {
    pub namespace: String,
    pub operation: String,
    pub args: Vec<CallArg>,
}

impl TypedCall {
    pub fn new(
        namespace: impl Into<String>,
        operation: impl Into<String>,
        args: Vec<CallArg>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            args,
        }
    }

    /// Deterministic encoding of the call. Identical calls always encode to
    /// identical bytes, so the hash is stable across processes.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("call encoding cannot fail")
    }

    pub fn hash(&self) -> CallHash {
        CallHash::digest(&self.encode())
    }
}
