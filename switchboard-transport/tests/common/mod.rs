//! Shared helpers for integration tests.

use std::future::Future;

use switchboard_transport::{Channel, ChannelConfig, Providers, TokioProviders};

/// Create a local tokio runtime for tests.
pub fn local_runtime() -> tokio::runtime::LocalRuntime {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build_local(Default::default())
        .expect("Failed to build local runtime")
}

/// Run a future to completion on a fresh local runtime, so spawn_local is
/// available the way the channel runtime expects.
pub fn run_local<F>(future: F) -> F::Output
where
    F: Future,
{
    local_runtime().block_on(future)
}

/// A listening channel on an ephemeral loopback port using the given
/// providers bundle.
pub async fn listening_channel_with<P: Providers>(
    providers: P,
    process_name: &str,
    config: ChannelConfig,
) -> Channel<P> {
    Channel::builder(providers)
        .host_port("127.0.0.1:0")
        .process_name(process_name)
        .config(config)
        .build_listening()
        .await
        .expect("channel should listen")
}

/// A listening channel on the production providers bundle.
pub async fn listening_channel(process_name: &str, config: ChannelConfig) -> Channel<TokioProviders> {
    listening_channel_with(TokioProviders::new(), process_name, config).await
}
