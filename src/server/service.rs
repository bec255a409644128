//! Service instances: the method handler table behind one exposed service.
//!
//! A [`ServiceInstance`] pairs an [`InterfaceDescriptor`] with one handler per
//! implemented method, keyed by name and parameter types. Handlers receive their
//! arguments as a tuple deserialized from the request parameters and return any
//! serializable value.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use simple_rpc::{InterfaceDescriptor, ServiceInstance};
//!
//! let echo = Arc::new(
//!     InterfaceDescriptor::new("com.example.Echo")
//!         .method("concat", &["String", "String"], "String"),
//! );
//!
//! let service = ServiceInstance::new(echo)
//!     .handle("concat", |(a, b): (String, String)| async move {
//!         Ok::<_, String>(format!("{}{}", a, b))
//!     });
//! assert_eq!(service.method_count(), 1);
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::interface::InterfaceDescriptor;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler produced: the encoded return value or a fault message.
pub type InvocationResult = std::result::Result<Value, String>;

/// Trait for method handlers working on raw parameter values.
pub trait MethodHandler: Send + Sync + 'static {
    fn call(&self, parameters: Vec<Value>) -> BoxFuture<'static, InvocationResult>;
}

/// Decode the parameter list into the handler's argument tuple.
fn decode_args<A: DeserializeOwned>(parameters: Vec<Value>) -> std::result::Result<A, String> {
    let empty = parameters.is_empty();
    match serde_json::from_value::<A>(Value::Array(parameters)) {
        Ok(args) => Ok(args),
        // `()` only deserializes from null
        Err(_) if empty => serde_json::from_value::<A>(Value::Null)
            .map_err(|e| format!("Invalid arguments: {}", e)),
        Err(e) => Err(format!("Invalid arguments: {}", e)),
    }
}

fn encode_result<R: Serialize>(value: R) -> InvocationResult {
    serde_json::to_value(value).map_err(|e| format!("Failed to encode result: {}", e))
}

/// Async handler taking a deserialized argument tuple.
pub struct AsyncHandler<F, A, R, E, Fut> {
    handler: F,
    _phantom: PhantomData<fn(A) -> (Fut, R, E)>,
}

impl<F, A, R, E, Fut> MethodHandler for AsyncHandler<F, A, R, E, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    fn call(&self, parameters: Vec<Value>) -> BoxFuture<'static, InvocationResult> {
        let args = match decode_args::<A>(parameters) {
            Ok(args) => args,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(args);
        Box::pin(async move {
            match fut.await {
                Ok(value) => encode_result(value),
                Err(e) => Err(e.to_string()),
            }
        })
    }
}

/// Synchronous handler run on the blocking thread pool.
pub struct BlockingHandler<F, A, R, E> {
    handler: Arc<F>,
    _phantom: PhantomData<fn(A) -> (R, E)>,
}

impl<F, A, R, E> MethodHandler for BlockingHandler<F, A, R, E>
where
    F: Fn(A) -> std::result::Result<R, E> + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    fn call(&self, parameters: Vec<Value>) -> BoxFuture<'static, InvocationResult> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let args = decode_args::<A>(parameters)?;
            let joined = tokio::task::spawn_blocking(move || match handler(args) {
                Ok(value) => encode_result(value),
                Err(e) => Err(e.to_string()),
            })
            .await;

            match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err("Handler panicked".to_string()),
                Err(e) => Err(format!("Handler cancelled: {}", e)),
            }
        })
    }
}

/// Lookup key for a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    parameter_types: Vec<String>,
}

/// A concrete service implementation exposed by the server.
pub struct ServiceInstance {
    interface: Arc<InterfaceDescriptor>,
    handlers: HashMap<MethodKey, Box<dyn MethodHandler>>,
    /// Registration problems, reported when the service is added to a server.
    problems: Vec<String>,
}

impl ServiceInstance {
    /// Create an instance with no handlers yet.
    pub fn new(interface: Arc<InterfaceDescriptor>) -> Self {
        Self {
            interface,
            handlers: HashMap::new(),
            problems: Vec::new(),
        }
    }

    /// Register an async handler for the method called `method`.
    ///
    /// The method must not be overloaded; use [`handle_signature`](Self::handle_signature)
    /// otherwise.
    pub fn handle<F, A, R, E, Fut>(self, method: &str, handler: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let handler = AsyncHandler {
            handler,
            _phantom: PhantomData,
        };
        self.insert_unique(method, Box::new(handler))
    }

    /// Register an async handler for one overload of `method`.
    pub fn handle_signature<F, A, R, E, Fut>(
        mut self,
        method: &str,
        parameter_types: &[&str],
        handler: F,
    ) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let key = MethodKey {
            name: method.to_string(),
            parameter_types: parameter_types.iter().map(|t| t.to_string()).collect(),
        };
        let handler = AsyncHandler {
            handler,
            _phantom: PhantomData,
        };
        self.insert(key, Box::new(handler));
        self
    }

    /// Register a synchronous handler; it runs on the blocking pool.
    pub fn handle_blocking<F, A, R, E>(self, method: &str, handler: F) -> Self
    where
        F: Fn(A) -> std::result::Result<R, E> + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let handler = BlockingHandler {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        };
        self.insert_unique(method, Box::new(handler))
    }

    fn insert_unique(mut self, method: &str, handler: Box<dyn MethodHandler>) -> Self {
        match self.interface.find_unique(method) {
            Ok(descriptor) => {
                let key = MethodKey {
                    name: descriptor.name.clone(),
                    parameter_types: descriptor.parameter_types.clone(),
                };
                self.insert(key, handler);
            }
            Err(e) => self.problems.push(e.to_string()),
        }
        self
    }

    fn insert(&mut self, key: MethodKey, handler: Box<dyn MethodHandler>) {
        if self.interface.find(&key.name, &key.parameter_types).is_none() {
            self.problems.push(format!(
                "{} declares no method {}({})",
                self.interface.name(),
                key.name,
                key.parameter_types.join(", ")
            ));
            return;
        }
        self.handlers.insert(key, handler);
    }

    /// The interface this instance implements.
    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Number of registered handlers.
    pub fn method_count(&self) -> usize {
        self.handlers.len()
    }

    /// Check that every handler matched a declared method.
    pub fn validate(&self) -> Result<()> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(RpcError::InvalidService(self.problems.join("; ")))
        }
    }

    /// Resolve the handler for a method signature and invoke it.
    pub async fn invoke(
        &self,
        method: &str,
        parameter_types: &[String],
        parameters: Vec<Value>,
    ) -> InvocationResult {
        let key = MethodKey {
            name: method.to_string(),
            parameter_types: parameter_types.to_vec(),
        };

        let handler = self.handlers.get(&key).ok_or_else(|| {
            format!(
                "No such method: {}.{}({})",
                self.interface.name(),
                method,
                parameter_types.join(", ")
            )
        })?;

        if parameters.len() != parameter_types.len() {
            return Err(format!(
                "Expected {} arguments, got {}",
                parameter_types.len(),
                parameters.len()
            ));
        }

        handler.call(parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    fn echo_interface() -> Arc<InterfaceDescriptor> {
        Arc::new(
            InterfaceDescriptor::new("Echo")
                .method("concat", &["String", "String"], "String")
                .method("ping", &[], "String")
                .method("fail", &["String"], "()")
                .method("len", &["String"], "usize")
                .method("len", &["Vec<i32>"], "usize"),
        )
    }

    fn echo_service() -> ServiceInstance {
        ServiceInstance::new(echo_interface())
            .handle("concat", |(a, b): (String, String)| async move {
                Ok::<_, String>(a + &b)
            })
            .handle("ping", |_: ()| async { Ok::<_, String>("pong") })
            .handle("fail", |(why,): (String,)| async move { Err::<(), _>(why) })
            .handle_signature("len", &["String"], |(s,): (String,)| async move {
                Ok::<_, String>(s.len())
            })
            .handle_signature("len", &["Vec<i32>"], |(v,): (Vec<i32>,)| async move {
                Ok::<_, String>(v.len())
            })
    }

    #[tokio::test]
    async fn test_invoke_concat() {
        let service = echo_service();
        assert!(service.validate().is_ok());
        assert_eq!(service.method_count(), 5);

        let result = service
            .invoke("concat", &types(&["String", "String"]), vec![json!("a"), json!("b")])
            .await;
        assert_eq!(result, Ok(json!("ab")));
    }

    #[tokio::test]
    async fn test_invoke_no_args() {
        let result = echo_service().invoke("ping", &[], vec![]).await;
        assert_eq!(result, Ok(json!("pong")));
    }

    #[tokio::test]
    async fn test_invoke_overloads() {
        let service = echo_service();

        let by_string = service
            .invoke("len", &types(&["String"]), vec![json!("abcd")])
            .await;
        assert_eq!(by_string, Ok(json!(4)));

        let by_vec = service
            .invoke("len", &types(&["Vec<i32>"]), vec![json!([1, 2])])
            .await;
        assert_eq!(by_vec, Ok(json!(2)));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_fault_message() {
        let result = echo_service()
            .invoke("fail", &types(&["String"]), vec![json!("out of cheese")])
            .await;
        assert_eq!(result, Err("out of cheese".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let result = echo_service()
            .invoke("concat", &types(&["String"]), vec![json!("a")])
            .await;
        assert!(result.unwrap_err().contains("No such method"));
    }

    #[tokio::test]
    async fn test_bad_argument_types() {
        let result = echo_service()
            .invoke("concat", &types(&["String", "String"]), vec![json!(1), json!(2)])
            .await;
        assert!(result.unwrap_err().contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_arity_mismatch() {
        let result = echo_service()
            .invoke("concat", &types(&["String", "String"]), vec![json!("a")])
            .await;
        assert!(result.unwrap_err().contains("Expected 2 arguments"));
    }

    #[tokio::test]
    async fn test_blocking_handler() {
        let interface = Arc::new(InterfaceDescriptor::new("Math").method("square", &["u64"], "u64"));
        let service = ServiceInstance::new(interface)
            .handle_blocking("square", |(n,): (u64,)| Ok::<_, String>(n * n));

        let result = service.invoke("square", &types(&["u64"]), vec![json!(12)]).await;
        assert_eq!(result, Ok(json!(144)));
    }

    #[tokio::test]
    async fn test_blocking_handler_panic_is_fault() {
        let interface = Arc::new(InterfaceDescriptor::new("Math").method("boom", &[], "()"));
        let service = ServiceInstance::new(interface).handle_blocking("boom", |_: ()| {
            if true {
                panic!("kaboom");
            }
            Ok::<(), String>(())
        });

        let result = service.invoke("boom", &[], vec![]).await;
        assert_eq!(result, Err("Handler panicked".to_string()));
    }

    #[test]
    fn test_validate_reports_undeclared_methods() {
        let service = ServiceInstance::new(echo_interface())
            .handle("nope", |_: ()| async { Ok::<_, String>(()) })
            .handle("len", |(s,): (String,)| async move { Ok::<_, String>(s.len()) })
            .handle_signature("concat", &["i32"], |_: (i32,)| async { Ok::<_, String>(()) });

        let err = service.validate().unwrap_err().to_string();
        assert!(err.contains("no method nope"));
        assert!(err.contains("overloaded"));
        assert!(err.contains("concat(i32)"));
        assert_eq!(service.method_count(), 0);
    }
}
