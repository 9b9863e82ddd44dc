// QUADRATURE splits a definite integral across a fleet of worker nodes. A
// single coordinator accepts a fixed number of workers, learns how much work
// each is willing to take on, derives a global step width from an analytic
// error bound and hands every worker a contiguous slice of the interval. The
// workers integrate their slice with the midpoint rule on every core they
// advertised and report a single partial sum back.

// The coordinator is deliberately single threaded: one readiness loop owns
// every connection record, so nothing on that side ever needs a lock. The
// parallelism lives on the workers, where each compute unit owns a disjoint
// sub-range and only the final reduction touches a shared total.

pub mod function;
mod hex;
pub mod net;

#[cfg(feature = "coordinator")]
pub mod coordinator;
#[cfg(feature = "worker")]
pub mod worker;

pub use function::FunctionId;
pub use net::error::Error;
