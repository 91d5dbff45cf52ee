//! Service layer — origin pool, load balancing and health checking
//!
//! Origins live in a shared [`OriginPool`]. A [`HealthMonitor`] runs one
//! prober per origin and flips health flags that each endpoint's
//! [`LoadBalancer`] reads on every selection.

mod health_check;
mod load_balancer;
mod origin_pool;

pub use health_check::{probe, HealthMonitor};
pub use load_balancer::LoadBalancer;
pub use origin_pool::{
    HealthTransition, OriginPool, OriginServer, OriginStatus, RequestGuard,
};
