//! Invocation proxies - turn a method call into a remote request.
//!
//! A [`ServiceProxy`] stands in for a remote service. Each call resolves the
//! service through the [`Registry`], picks one provider uniformly at random,
//! sends the request over the shared [`ClientTransport`] and converts the
//! response back into a typed result or an [`RpcError`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use simple_rpc::registry::{CoordinatedRegistry, MemoryEnsemble, RegistryConfig};
//! use simple_rpc::{ClientTransport, InterfaceDescriptor, ProxyFactory};
//!
//! # async fn run() -> simple_rpc::Result<()> {
//! let ensemble = MemoryEnsemble::new();
//! let registry = Arc::new(CoordinatedRegistry::new(ensemble.connect().await, RegistryConfig::default()));
//! let factory = ProxyFactory::new(Arc::new(ClientTransport::default()), registry);
//!
//! let echo = Arc::new(
//!     InterfaceDescriptor::new("com.example.Echo")
//!         .method("concat", &["String", "String"], "String"),
//! );
//! let proxy = factory.create(echo, None, 0);
//! let joined: String = proxy.call("concat", ("a", "b")).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::ClientTransport;
use crate::error::{Result, RpcError};
use crate::interface::{encode_args, InterfaceDescriptor, MethodDescriptor};
use crate::protocol::{
    Request, ServiceAddress, ServiceName, STATUS_NOT_FOUND, STATUS_OK, STATUS_TIMEOUT,
};
use crate::registry::Registry;

/// Pick one address uniformly at random.
pub fn select_random(addresses: &[ServiceAddress]) -> Option<&ServiceAddress> {
    if addresses.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..addresses.len());
    addresses.get(index)
}

/// Creates proxies sharing one client transport and registry.
#[derive(Clone)]
pub struct ProxyFactory {
    client: Arc<ClientTransport>,
    registry: Arc<dyn Registry>,
}

impl ProxyFactory {
    pub fn new(client: Arc<ClientTransport>, registry: Arc<dyn Registry>) -> Self {
        Self { client, registry }
    }

    /// Create a proxy for `interface` at `version`.
    ///
    /// A `timeout_millis` of `0` uses the client's configured request timeout.
    pub fn create(
        &self,
        interface: Arc<InterfaceDescriptor>,
        version: Option<&str>,
        timeout_millis: u64,
    ) -> ServiceProxy {
        let version = version.filter(|v| !v.is_empty()).map(str::to_string);
        let service_name = ServiceName::new(interface.name(), version.as_deref());
        let timeout = (timeout_millis > 0).then(|| Duration::from_millis(timeout_millis));

        ServiceProxy {
            interface,
            version,
            service_name,
            timeout,
            client: self.client.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// Client-side stand-in for one remote service.
#[derive(Clone)]
pub struct ServiceProxy {
    interface: Arc<InterfaceDescriptor>,
    version: Option<String>,
    service_name: ServiceName,
    timeout: Option<Duration>,
    client: Arc<ClientTransport>,
    registry: Arc<dyn Registry>,
}

impl ServiceProxy {
    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Call a method that is not overloaded.
    ///
    /// `args` is a tuple with one element per parameter: `()`, `(x,)`, `(a, b)`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidArguments`] for an unknown or overloaded method or a
    ///   wrong argument count (checked before any discovery)
    /// - [`RpcError::ServiceUnavailable`] when no provider is registered
    /// - [`RpcError::RemoteNotFound`], [`RpcError::Timeout`] or
    ///   [`RpcError::RemoteInvocation`] for a non-200 response
    /// - [`RpcError::Deserialization`] if the result does not fit `R`
    pub async fn call<R, A>(&self, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        let descriptor = self.interface.find_unique(method)?;
        self.invoke(descriptor, &args).await
    }

    /// Call one overload of a method, selected by its parameter types.
    pub async fn call_signature<R, A>(
        &self,
        method: &str,
        parameter_types: &[&str],
        args: A,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        let types: Vec<String> = parameter_types.iter().map(|t| t.to_string()).collect();
        let descriptor = self.interface.find(method, &types).ok_or_else(|| {
            RpcError::InvalidArguments(format!(
                "{} has no method {}({})",
                self.interface.name(),
                method,
                types.join(", ")
            ))
        })?;
        self.invoke(descriptor, &args).await
    }

    async fn invoke<R, A>(&self, descriptor: &MethodDescriptor, args: &A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        let parameters = encode_args(args)?;
        if parameters.len() != descriptor.parameter_types.len() {
            return Err(RpcError::InvalidArguments(format!(
                "{}.{} takes {} argument(s), got {}",
                self.interface.name(),
                descriptor.name,
                descriptor.parameter_types.len(),
                parameters.len()
            )));
        }

        let addresses = self.registry.discover(&self.service_name).await?;
        let address = select_random(&addresses)
            .ok_or_else(|| RpcError::ServiceUnavailable(self.service_name.to_string()))?;

        let request = Request::new(
            self.interface.name(),
            descriptor.name.as_str(),
            descriptor.parameter_types.clone(),
            parameters,
            self.version.clone(),
        );

        let response = match self.timeout {
            Some(timeout) => {
                self.client
                    .send_with_timeout(address, &request, timeout)
                    .await?
            }
            None => self.client.send(address, &request).await?,
        };

        match response.status_code {
            STATUS_OK => serde_json::from_value(response.into_data()).map_err(|e| {
                RpcError::Deserialization(format!(
                    "result of {}.{} is not a {}: {}",
                    self.interface.name(),
                    descriptor.name,
                    descriptor.return_type,
                    e
                ))
            }),
            STATUS_NOT_FOUND => Err(RpcError::RemoteNotFound(response.message().to_string())),
            STATUS_TIMEOUT => Err(RpcError::Timeout(request.request_id)),
            status => Err(RpcError::RemoteInvocation {
                status,
                message: response.message().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry returning a fixed address list and counting lookups.
    struct FixedRegistry {
        addresses: Vec<ServiceAddress>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Registry for FixedRegistry {
        async fn register(&self, _: &ServiceName, _: &ServiceAddress) -> Result<()> {
            Ok(())
        }

        async fn unregister(&self, _: &ServiceName, _: &ServiceAddress) -> Result<()> {
            Ok(())
        }

        async fn discover(&self, _: &ServiceName) -> Result<Vec<ServiceAddress>> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            Ok(self.addresses.clone())
        }

        async fn close(&self) {}
    }

    fn setup(addresses: Vec<ServiceAddress>) -> (ServiceProxy, Arc<FixedRegistry>, Arc<ClientTransport>) {
        let registry = Arc::new(FixedRegistry {
            addresses,
            lookups: AtomicUsize::new(0),
        });
        let client = Arc::new(ClientTransport::default());
        let factory = ProxyFactory::new(client.clone(), registry.clone());
        let echo = Arc::new(
            InterfaceDescriptor::new("Echo")
                .method("concat", &["String", "String"], "String")
                .method("len", &["String"], "usize")
                .method("len", &["Vec<i32>"], "usize"),
        );
        (factory.create(echo, Some("1.0"), 250), registry, client)
    }

    #[test]
    fn test_select_random_empty() {
        assert!(select_random(&[]).is_none());
    }

    #[test]
    fn test_select_random_is_roughly_uniform() {
        let addresses: Vec<ServiceAddress> =
            (0..4).map(|i| ServiceAddress::new("10.0.0.1", 9000 + i)).collect();

        let mut hits: HashMap<u16, usize> = HashMap::new();
        for _ in 0..10_000 {
            let picked = select_random(&addresses).unwrap();
            *hits.entry(picked.port).or_default() += 1;
        }

        assert_eq!(hits.len(), 4);
        for count in hits.values() {
            assert!((2_000..=3_000).contains(count), "skewed selection: {:?}", hits);
        }
    }

    #[test]
    fn test_service_name_includes_version() {
        let (proxy, _, _) = setup(vec![]);
        assert_eq!(proxy.service_name().as_str(), "Echo-1.0");
    }

    #[tokio::test]
    async fn test_empty_discovery_is_unavailable_without_network() {
        let (proxy, registry, client) = setup(vec![]);

        let result: Result<String> = proxy.call("concat", ("a", "b")).await;

        assert!(matches!(result, Err(RpcError::ServiceUnavailable(name)) if name == "Echo-1.0"));
        assert_eq!(registry.lookups.load(Ordering::Relaxed), 1);
        assert_eq!(client.pooled_connections(), 0);
    }

    #[tokio::test]
    async fn test_argument_errors_fail_before_discovery() {
        let (proxy, registry, _) = setup(vec![ServiceAddress::new("10.0.0.1", 9000)]);

        let wrong_arity: Result<String> = proxy.call("concat", ("a",)).await;
        assert!(matches!(wrong_arity, Err(RpcError::InvalidArguments(_))));

        let unknown: Result<String> = proxy.call("shout", ("a",)).await;
        assert!(matches!(unknown, Err(RpcError::InvalidArguments(_))));

        let overloaded: Result<usize> = proxy.call("len", ("abc",)).await;
        assert!(matches!(overloaded, Err(RpcError::InvalidArguments(_))));

        let bad_signature: Result<usize> = proxy.call_signature("len", &["i32"], (1,)).await;
        assert!(matches!(bad_signature, Err(RpcError::InvalidArguments(_))));

        assert_eq!(registry.lookups.load(Ordering::Relaxed), 0);
    }
}
