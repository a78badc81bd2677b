//! Gateway runtime: proxy pool, account registry, dispatcher and the
//! context that wires them together.

pub mod account_registry;
pub mod context;
pub mod dispatcher;
pub mod proxy_pool;
pub mod upstream;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use account_registry::{AccountRegistry, AccountToken};
pub use context::{GatewayContext, Reassignment};
pub use dispatcher::{
    ChatBody, ChatCompletion, ChatRequest, DispatchError, DispatchStage, Dispatcher,
};
pub use proxy_pool::{
    AllocationTier, HttpProxyProber, ProxyPool, ProxyProber, ReassignReason, ReassignmentMap,
};
pub use upstream::ClientCache;
