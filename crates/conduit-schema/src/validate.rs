//! Validation through the `jsonschema` crate, driven by the JSON Schema an
//! [`ObjectSchema`](crate::ObjectSchema) exports.

use std::fmt;
use std::sync::OnceLock;

use jsonschema::{error::ValidationErrorKind, Validator};
use serde_json::Value;

use crate::error::Violation;

/// Lazily compiled validator for one schema value.
///
/// Cloning yields an empty cache: builder methods clone and then mutate, so
/// a copied validator could describe a schema that no longer exists.
#[derive(Default)]
pub(crate) struct ValidatorCache(OnceLock<Result<Validator, String>>);

impl ValidatorCache {
    pub(crate) fn get_or_compile(&self, schema: impl FnOnce() -> Value) -> Result<&Validator, String> {
        self.0
            .get_or_init(|| {
                let schema = schema();
                jsonschema::validator_for(&schema).map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

impl Clone for ValidatorCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for ValidatorCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for ValidatorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.get().is_some() { "compiled" } else { "pending" })
    }
}

/// Run `validator` on `instance`, appending one violation per failure with
/// paths rooted at `prefix`.
pub(crate) fn collect(validator: &Validator, instance: &Value, prefix: &str, out: &mut Vec<Violation>) {
    for error in validator.iter_errors(instance) {
        let at = render_path(prefix, &error.instance_path.to_string());
        match &error.kind {
            ValidationErrorKind::Required { property } => {
                let name = property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string());
                out.push(Violation::new(&join(&at, &name), "is required"));
            }
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                for name in unexpected {
                    out.push(Violation::new(&join(&at, name), "unexpected property"));
                }
            }
            _ => out.push(Violation::new(&at, error.to_string())),
        }
    }
}

/// Turn a JSON pointer such as `/address/tags/0` into `address.tags[0]`.
fn render_path(prefix: &str, pointer: &str) -> String {
    let mut path = prefix.to_string();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            path = join(&path, &segment);
        }
    }
    path
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_rendering() {
        assert_eq!(render_path("", ""), "");
        assert_eq!(render_path("", "/address/city"), "address.city");
        assert_eq!(render_path("[1]", "/tags/0"), "[1].tags[0]");
        assert_eq!(render_path("", "/a~1b"), "a/b");
    }

    #[test]
    fn cache_compiles_once_and_clones_empty() {
        let cache = ValidatorCache::default();
        let mut calls = 0;
        cache
            .get_or_compile(|| {
                calls += 1;
                serde_json::json!({"type": "object"})
            })
            .unwrap();
        cache.get_or_compile(|| unreachable!()).unwrap();
        assert_eq!(calls, 1);
        assert_eq!(format!("{:?}", cache.clone()), "pending");
    }
}
