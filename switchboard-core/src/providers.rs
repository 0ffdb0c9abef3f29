//! Provider bundle for a channel endpoint.
//!
//! A channel touches the outside world through exactly four seams, and
//! each maps to one provider:
//!
//! - **network** — the listener it accepts on and the dials it makes when
//!   a call targets a peer with no live connection,
//! - **time** — operation start readings, deadline comparisons in the
//!   sweep, and the sweep's own re-arm sleep,
//! - **task** — the per-connection I/O loops, the per-connection
//!   sweepers, and the one-step-removed endpoint-handler invocations,
//! - **random** — the jitter applied to each sweep period so connections
//!   do not sweep in lock-step.
//!
//! [`Providers`] bundles the four behind one type parameter, so the
//! transport writes `Channel<P: Providers>` instead of threading four
//! generics with repetitive where clauses through every type.

use crate::{
    NetworkProvider, RandomProvider, SeededRandomProvider, TaskProvider, TimeProvider,
    TokioNetworkProvider, TokioRandomProvider, TokioTaskProvider, TokioTimeProvider,
};

/// The four seams a channel endpoint runs on, as one bundle.
///
/// Associated types keep everything statically dispatched; the accessor
/// methods are what the transport calls at each seam.
pub trait Providers: Clone + 'static {
    /// Network provider: listener binding and outbound dials.
    type Network: NetworkProvider + Clone + 'static;

    /// Time provider: operation deadlines and sweep cadence.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider: connection loops, sweepers, handler isolation.
    type Task: TaskProvider + Clone + 'static;

    /// Random provider: sweep-period jitter.
    type Random: RandomProvider + Clone + 'static;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Production bundle: real TCP, the Tokio timer, `spawn_local` tasks,
/// and thread-local randomness.
#[derive(Clone)]
pub struct TokioProviders {
    network: TokioNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl TokioProviders {
    /// Create the production bundle. The time provider's zero point is
    /// the call site, so a channel built from this bundle observes time
    /// from its own construction.
    pub fn new() -> Self {
        Self {
            network: TokioNetworkProvider::new(),
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: TokioRandomProvider::new(),
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}

/// Test bundle: real I/O and timers, deterministic randomness.
///
/// The only nondeterminism the channel draws from its random seam is the
/// sweep jitter; pinning the seed makes a test's sweep schedule
/// reproducible while sockets and timers stay real. Keep a clone of the
/// bundle to replay the exact jitter sequence a channel will draw.
#[derive(Clone)]
pub struct SeededTokioProviders {
    network: TokioNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: SeededRandomProvider,
}

impl SeededTokioProviders {
    /// Create a bundle whose random seam is seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            network: TokioNetworkProvider::new(),
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: SeededRandomProvider::new(seed),
        }
    }
}

impl Providers for SeededTokioProviders {
    type Network = TokioNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = SeededRandomProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}
