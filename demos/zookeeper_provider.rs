//! Echo provider registered in Apache ZooKeeper.
//!
//! # Running
//!
//! ```sh
//! ZK_CLUSTER=127.0.0.1:2181 cargo run --example zookeeper_provider --features zookeeper
//! ```
//!
//! The provider stays registered until the process exits; its ephemeral node
//! disappears with the session.

use std::sync::Arc;

use simple_rpc::registry::{CoordinatedRegistry, Registry, RegistryConfig, ZkCoordinator};
use simple_rpc::{
    InterfaceDescriptor, ServerConfig, ServerTransport, ServiceAddress, ServiceInstance,
    ServiceName,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("simple_rpc=info".parse()?))
        .init();

    let cluster = std::env::var("ZK_CLUSTER").unwrap_or_else(|_| "127.0.0.1:2181".to_string());
    let host = std::env::var("ADVERTISED_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

    let echo = Arc::new(
        InterfaceDescriptor::new("com.example.Echo")
            .method("concat", &["String", "String"], "String"),
    );

    let server = ServerTransport::new(ServerConfig::default());
    server.add_service(
        "com.example.Echo",
        ServiceInstance::new(echo).handle("concat", |(a, b): (String, String)| async move {
            Ok::<_, String>(format!("{}{}", a, b))
        }),
    )?;
    let bound = server.start(9000).await?;

    let registry =
        CoordinatedRegistry::connect(ZkCoordinator::connect(&cluster), RegistryConfig::default())
            .await?;
    registry
        .register(
            &ServiceName::from("com.example.Echo"),
            &ServiceAddress::new(host, bound.port()),
        )
        .await?;

    tokio::signal::ctrl_c().await?;

    registry.close().await;
    server.stop().await;
    Ok(())
}
