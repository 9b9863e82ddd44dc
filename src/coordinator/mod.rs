// The coordinator runs one integration request at a time. A request walks
// through three phases on a single task: registration (accept exactly
// `num_nodes` workers and read their capacity), dispatch (cut the interval
// and send each worker its slice) and collection (sum the partial results
// before the deadline). Membership is fixed once registration ends; the
// listener is closed and late workers are refused by the OS.

// Every failure after validation is fatal to the request. There is no
// salvaging partial sums and no retrying a worker: the error is returned to
// the caller, which decides to abort.

use std::{net::SocketAddr, time::Duration};

use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, debug_span, info, Instrument};
use typed_builder::TypedBuilder;

use self::event_loop::EventLoop;
use crate::{function::FunctionId, net::error::Error};

mod event_loop;
pub mod partition;

pub use partition::Discretization;

/// How long the registration phase waits between bookkeeping wakeups.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(TypedBuilder, Clone, Debug)]
pub struct CoordinatorConfig {
    /// Where workers connect. Port 0 picks a free port at bind time.
    pub listen_addr: SocketAddr,
    /// Budget for collecting results, counted from dispatch.
    pub max_time: Duration,
    /// Workers required before a request can proceed.
    pub num_nodes: usize,
    #[builder(default = IDLE_TIMEOUT)]
    pub idle_timeout: Duration,
    /// Upper bound on the registration phase. Unbounded by default.
    #[builder(default, setter(strip_option))]
    pub registration_timeout: Option<Duration>,
}

#[derive(TypedBuilder, Clone, Copy, Debug, PartialEq)]
pub struct IntegrationRequest {
    pub function: FunctionId,
    pub left: f64,
    pub right: f64,
    /// Target error per step
    #[builder(default = 0.01)]
    pub tolerance: f64,
}

impl IntegrationRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.left.is_finite() || !self.right.is_finite() || self.left > self.right {
            return Err(Error::InvalidInterval {
                left: self.left,
                right: self.right,
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.) {
            return Err(Error::InvalidTolerance(self.tolerance));
        }
        Ok(())
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl Coordinator {
    /// Binds the listening socket. Workers may start connecting right away;
    /// they queue in the backlog until a request is running.
    pub async fn bind(config: CoordinatorConfig) -> Result<Self, Error> {
        let listener = listen(config.listen_addr, config.num_nodes)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, nodes = config.num_nodes, "coordinator listening");
        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Integrates `request` across the configured number of workers.
    pub async fn integrate(&mut self, request: IntegrationRequest) -> Result<f64, Error> {
        request.validate()?;
        if request.left == request.right {
            debug!("empty interval, no workers involved");
            return Ok(0.);
        }

        let discretization = partition::discretize(
            request.function,
            request.left,
            request.right,
            request.tolerance,
        )?;

        let span = debug_span!(
            "integrate",
            function = %request.function,
            left = request.left,
            right = request.right,
        );
        async {
            debug!(
                step_width = discretization.step_width,
                step_count = discretization.step_count,
                "derived discretization"
            );

            // the previous request closed its listener, so take the address
            // back for this one
            let listener = match self.listener.take() {
                Some(listener) => listener,
                None => listen(self.local_addr, self.config.num_nodes)?,
            };

            let mut event_loop = EventLoop::new(listener, &self.config);
            event_loop.register().await?;

            let assignments = partition::assign(
                request.function,
                request.left,
                &discretization,
                &event_loop.loads(),
            )?;
            debug!(load_sum = event_loop.load_sum(), "dispatching assignments");
            event_loop.dispatch(&assignments).await?;

            let value = event_loop.collect().await?;
            info!(value, "integration complete");
            Ok::<_, Error>(value)
        }
        .instrument(span)
        .await
    }
}

fn listen(addr: SocketAddr, backlog: usize) -> Result<TcpListener, Error> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let backlog = u32::try_from(backlog.max(1)).unwrap_or(u32::MAX);
    Ok(socket.listen(backlog)?)
}
