//! Velithon Service Protocol (VSP): a length-prefixed MessagePack RPC used
//! for service-to-service calls (C9), plus the service mesh and
//! load-balanced peer selection that backs it (C10).

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod manager;
pub mod mesh;
pub mod message;
pub mod rate_limit;

pub use connection::Connection;
pub use endpoint::{EndpointRegistry, EndpointResult, WorkerMode};
pub use manager::{VspManager, VspManagerConfig};
pub use mesh::{LoadBalancer, RandomBalancer, RoundRobinBalancer, ServiceInfo, ServiceMesh, WeightedBalancer};
pub use message::{VspError, VspHeader, VspMessage, MAX_FRAME_LEN};
pub use rate_limit::TokenBucket;

/// Everyday VSP surface for `use velithon::prelude::*` (via the `vsp` feature).
pub mod prelude {
    pub use crate::{
        Connection, EndpointRegistry, EndpointResult, LoadBalancer, RandomBalancer,
        RoundRobinBalancer, ServiceInfo, ServiceMesh, TokenBucket, VspError, VspHeader,
        VspManager, VspManagerConfig, VspMessage, WeightedBalancer, WorkerMode, MAX_FRAME_LEN,
    };
}
