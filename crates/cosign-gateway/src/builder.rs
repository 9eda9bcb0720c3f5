//! Call Builder
//!
//! Turns a catalog entry plus free-form user input into a well-typed,
//! submittable call. Purely a transform: no I/O, and validation problems are
//! returned, never used as control flow.

use thiserror::Error;

use cosign_types::{CallArg, CatalogEntry, ParamSpec, TypedCall};

/// Declared-type markers treated as numeric. Containment matching: a
/// `Vec<u32>` element type is numeric because it names `u32`.
const NUMERIC_TYPE_MARKERS: &[&str] = &[
    "Compact<Balance>",
    "Compact<Moment>",
    "BalanceOf",
    "Balance",
    "BlockNumber",
    "Moment",
    "AccountIndex",
    "u8",
    "u16",
    "u32",
    "u64",
    "u128",
    "i8",
    "i16",
    "i32",
    "i64",
    "i128",
];

/// Delimiter splitting the elements of a vector-typed field.
const VECTOR_DELIMITER: char = ',';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("parameter `{param}`: `{value}` is not a number")]
    NotANumber { param: String, value: String },

    #[error("required parameter `{param}` is empty")]
    MissingRequired { param: String },

    /// The entry and the value list disagree on arity. This is a malformed
    /// catalog, not bad user input.
    #[error("catalog entry expects {expected} parameters, got {got} values")]
    MalformedCatalog { expected: usize, got: usize },
}

/// Whether values of `declared_type` coerce to numbers.
pub fn is_numeric_type(declared_type: &str) -> bool {
    NUMERIC_TYPE_MARKERS
        .iter()
        .any(|marker| declared_type.contains(marker))
}

/// True iff every non-optional parameter has a non-empty value. Optional
/// slots never gate submission. Pure; usable by UI enablement logic without
/// touching the ledger.
pub fn all_required_filled(entry: &CatalogEntry, raw_values: &[Option<String>]) -> bool {
    if entry.params.is_empty() {
        return true;
    }

    entry.params.iter().enumerate().all(|(index, spec)| {
        if spec.optional {
            return true;
        }
        matches!(
            raw_values.get(index),
            Some(Some(value)) if !value.trim().is_empty()
        )
    })
}

/// Build a typed call from an entry and its raw field values.
///
/// Values are trimmed; an empty string counts as absent. A present-but-empty
/// optional parameter becomes the `Absent` sentinel so the call shape stays
/// arity-stable.
pub fn build(entry: &CatalogEntry, raw_values: &[Option<String>]) -> Result<TypedCall, ValidationError> {
    if raw_values.len() != entry.params.len() {
        return Err(ValidationError::MalformedCatalog {
            expected: entry.params.len(),
            got: raw_values.len(),
        });
    }

    let mut args = Vec::with_capacity(entry.params.len());
    for (spec, raw) in entry.params.iter().zip(raw_values) {
        let trimmed = raw.as_deref().map(str::trim).filter(|v| !v.is_empty());
        match trimmed {
            None if spec.optional => args.push(CallArg::Absent),
            None => {
                return Err(ValidationError::MissingRequired {
                    param: spec.name.clone(),
                })
            }
            Some(value) => args.push(coerce_param(spec, value)?),
        }
    }

    Ok(TypedCall::new(
        entry.namespace.clone(),
        entry.operation.clone(),
        args,
    ))
}

fn coerce_param(spec: &ParamSpec, value: &str) -> Result<CallArg, ValidationError> {
    if let Some(element_type) = spec.vector_element_type() {
        let elements = value
            .split(VECTOR_DELIMITER)
            .map(|element| coerce_scalar(&spec.name, element_type, element.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(CallArg::Vector(elements));
    }

    coerce_scalar(&spec.name, spec.coercion_type(), value)
}

fn coerce_scalar(param: &str, declared_type: &str, value: &str) -> Result<CallArg, ValidationError> {
    if !is_numeric_type(declared_type) {
        return Ok(CallArg::Text(value.to_string()));
    }

    let not_a_number = || ValidationError::NotANumber {
        param: param.to_string(),
        value: value.to_string(),
    };

    // Decimal point selects float parsing, anything else is integral.
    if value.contains('.') {
        value
            .parse::<f64>()
            .map(CallArg::Float)
            .map_err(|_| not_a_number())
    } else if let Ok(unsigned) = value.parse::<u128>() {
        Ok(CallArg::Uint(unsigned))
    } else {
        value
            .parse::<i128>()
            .map(CallArg::Int)
            .map_err(|_| not_a_number())
    }
}
