//! Echo - provider and consumer in one process.
//!
//! This example demonstrates:
//! - Describing an interface once and sharing it between both ends
//! - Exposing a service with typed handlers, struct arguments included
//! - Registering the provider and calling it through a proxy
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=simple_rpc=debug cargo run --example echo
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simple_rpc::registry::{CoordinatedRegistry, MemoryEnsemble, Registry, RegistryConfig};
use simple_rpc::{
    ClientTransport, InterfaceDescriptor, ProxyFactory, ServerConfig, ServerTransport,
    ServiceAddress, ServiceInstance, ServiceName,
};
use tracing_subscriber::EnvFilter;

/// Argument of `Echo.greet`.
#[derive(Serialize, Deserialize, Debug)]
struct Person {
    name: String,
    age: u32,
}

fn echo_interface() -> Arc<InterfaceDescriptor> {
    Arc::new(
        InterfaceDescriptor::new("com.example.Echo")
            .method("concat", &["String", "String"], "String")
            .method("greet", &["com.example.Person"], "String"),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("simple_rpc=info".parse()?))
        .init();

    let ensemble = MemoryEnsemble::new();

    // Provider side
    let server = ServerTransport::new(ServerConfig::default().bind_host("127.0.0.1"));
    server.add_service(
        "com.example.Echo",
        ServiceInstance::new(echo_interface())
            .handle("concat", |(a, b): (String, String)| async move {
                Ok::<_, String>(format!("{}{}", a, b))
            })
            .handle("greet", |(person,): (Person,)| async move {
                if person.name.is_empty() {
                    return Err("nameless person".to_string());
                }
                Ok(format!("Hello, {} ({})", person.name, person.age))
            }),
    )?;
    let bound = server.start(0).await?;

    let provider = CoordinatedRegistry::new(ensemble.connect().await, RegistryConfig::default());
    let address = ServiceAddress::new("127.0.0.1", bound.port());
    provider
        .register(&ServiceName::from("com.example.Echo"), &address)
        .await?;

    // Consumer side
    let consumer = Arc::new(CoordinatedRegistry::new(
        ensemble.connect().await,
        RegistryConfig::default(),
    ));
    let client = Arc::new(ClientTransport::default());
    let factory = ProxyFactory::new(client.clone(), consumer.clone());
    let echo = factory.create(echo_interface(), None, 2_000);

    let joined: String = echo.call("concat", ("a", "b")).await?;
    println!("concat(a, b) = {}", joined);

    let greeting: String = echo
        .call("greet", (Person { name: "Ada".into(), age: 36 },))
        .await?;
    println!("{}", greeting);

    match echo
        .call::<String, _>("greet", (Person { name: String::new(), age: 0 },))
        .await
    {
        Ok(unexpected) => println!("unexpected success: {}", unexpected),
        Err(e) => println!("greet failed as expected: {}", e),
    }

    // Shutdown
    client.close();
    consumer.close().await;
    provider.close().await;
    server.stop().await;

    Ok(())
}
