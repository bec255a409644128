//! Interface description tables.
//!
//! A remote interface is described once: its name and, per method, the ordered
//! parameter type identifiers and the return type identifier. The proxy consults
//! the table to build requests and the server consults it to validate and route
//! handlers, so both sides agree on method signatures without runtime reflection.
//!
//! Type identifiers are opaque strings; they only have to match between the two
//! ends (e.g. `"String"`, `"i32"`, `"com.example.User"`).
//!
//! # Example
//!
//! ```
//! use simple_rpc::InterfaceDescriptor;
//!
//! let echo = InterfaceDescriptor::new("com.example.Echo")
//!     .method("concat", &["String", "String"], "String")
//!     .method("ping", &[], "()");
//!
//! let concat = echo.find("concat", &["String".to_string(), "String".to_string()]).unwrap();
//! assert_eq!(concat.return_type, "String");
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Signature of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
}

impl MethodDescriptor {
    /// Check whether this method has the given name and parameter types.
    pub fn matches(&self, name: &str, parameter_types: &[String]) -> bool {
        self.name == name && self.parameter_types == parameter_types
    }
}

/// Description of a remote interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    /// Create an empty description for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Declare a method. Overloads (same name, different parameters) are allowed.
    pub fn method(mut self, name: &str, parameter_types: &[&str], return_type: &str) -> Self {
        self.methods.push(MethodDescriptor {
            name: name.to_string(),
            parameter_types: parameter_types.iter().map(|t| t.to_string()).collect(),
            return_type: return_type.to_string(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Find a method by exact signature.
    pub fn find(&self, name: &str, parameter_types: &[String]) -> Option<&MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.matches(name, parameter_types))
    }

    /// Find the only method called `name`.
    ///
    /// # Errors
    ///
    /// Fails if no method or more than one overload has that name.
    pub fn find_unique(&self, name: &str) -> Result<&MethodDescriptor> {
        let mut candidates = self.methods.iter().filter(|m| m.name == name);
        match (candidates.next(), candidates.next()) {
            (Some(method), None) => Ok(method),
            (None, _) => Err(RpcError::InvalidArguments(format!(
                "{} has no method {}",
                self.name, name
            ))),
            (Some(_), Some(_)) => Err(RpcError::InvalidArguments(format!(
                "{}.{} is overloaded; give its parameter types",
                self.name, name
            ))),
        }
    }
}

/// Encode a call's arguments into one value per parameter.
///
/// Arguments are given as a tuple: `()` for none, `(x,)` for one, `(a, b)` for
/// two, and so on. A bare non-sequence value counts as a single argument.
pub fn encode_args<A: Serialize>(args: &A) -> Result<Vec<Value>> {
    let value = serde_json::to_value(args).map_err(|e| RpcError::Serialization(e.to_string()))?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(values) => values,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> InterfaceDescriptor {
        InterfaceDescriptor::new("Calculator")
            .method("add", &["i64", "i64"], "i64")
            .method("add", &["f64", "f64"], "f64")
            .method("negate", &["i64"], "i64")
    }

    #[test]
    fn test_find_by_signature() {
        let calc = calculator();
        let types = vec!["f64".to_string(), "f64".to_string()];

        assert_eq!(calc.find("add", &types).unwrap().return_type, "f64");
        assert!(calc.find("add", &["i64".to_string()]).is_none());
        assert!(calc.find("sub", &types).is_none());
    }

    #[test]
    fn test_find_unique() {
        let calc = calculator();

        assert_eq!(calc.find_unique("negate").unwrap().parameter_types, vec!["i64"]);
        assert!(matches!(
            calc.find_unique("add"),
            Err(RpcError::InvalidArguments(msg)) if msg.contains("overloaded")
        ));
        assert!(calc.find_unique("missing").is_err());
    }

    #[test]
    fn test_encode_args_shapes() {
        assert!(encode_args(&()).unwrap().is_empty());
        assert_eq!(encode_args(&(5,)).unwrap(), vec![json!(5)]);
        assert_eq!(encode_args(&("a", "b")).unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(encode_args(&"solo").unwrap(), vec![json!("solo")]);
        assert_eq!(
            encode_args(&(vec![1, 2],)).unwrap(),
            vec![json!([1, 2])]
        );
    }
}
