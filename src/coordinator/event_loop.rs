use std::{future, io, net::SocketAddr};

use futures::{stream::FuturesUnordered, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{timeout, timeout_at, Instant},
};
use tracing::{debug, trace, warn};

use super::CoordinatorConfig;
use crate::net::{
    error::Error,
    link::{Link, LinkState},
    wire::Assignment,
};

enum Event {
    Incoming(TcpStream, SocketAddr),
    Readable(usize),
}

/// Owns every link of a single request. One task drives it, waiting on the
/// listener and all watched sockets at once, so links are only ever touched
/// from here.
pub(super) struct EventLoop<'a> {
    config: &'a CoordinatorConfig,
    listener: Option<TcpListener>,
    links: Vec<Link>,
    registered: usize,
    load_sum: u64,
}

impl<'a> EventLoop<'a> {
    pub fn new(listener: TcpListener, config: &'a CoordinatorConfig) -> Self {
        Self {
            config,
            listener: Some(listener),
            links: Vec::with_capacity(config.num_nodes),
            registered: 0,
            load_sum: 0,
        }
    }

    pub fn loads(&self) -> Vec<u64> {
        self.links.iter().map(Link::load).collect()
    }

    pub fn load_sum(&self) -> u64 {
        self.load_sum
    }

    /// Waits for the listener (while short of workers) and for every link in
    /// one of `states` to become readable. Returns the first event.
    async fn wait(&self, states: &[LinkState]) -> io::Result<Event> {
        let listener = self
            .listener
            .as_ref()
            .filter(|_| self.links.len() < self.config.num_nodes);
        let mut watched: FuturesUnordered<_> = self
            .links
            .iter()
            .filter(|link| states.contains(&link.state()))
            .filter_map(|link| link.stream().map(|stream| (link.id(), stream)))
            .map(|(id, stream)| async move { stream.readable().await.map(|()| id) })
            .collect();

        let accept = async {
            match listener {
                Some(listener) => listener.accept().await,
                None => future::pending().await,
            }
        };
        let readable = async {
            match watched.next().await {
                Some(ready) => ready,
                None => future::pending().await,
            }
        };

        select! {
            accepted = accept => {
                let (stream, addr) = accepted?;
                Ok(Event::Incoming(stream, addr))
            }
            ready = readable => Ok(Event::Readable(ready?)),
        }
    }

    /// Accepts exactly `num_nodes` workers and reads each one's capacity.
    /// The listener is closed once everyone has registered.
    pub async fn register(&mut self) -> Result<(), Error> {
        let deadline = self
            .config
            .registration_timeout
            .map(|limit| Instant::now() + limit);

        while self.registered < self.config.num_nodes {
            let wait_for = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::RegistrationTimedOut(
                            self.config.registration_timeout.unwrap_or_default(),
                        ));
                    }
                    remaining.min(self.config.idle_timeout)
                }
                None => self.config.idle_timeout,
            };

            // registered links are watched too, a hang-up there is fatal now
            // rather than at collection
            let watched = [LinkState::AwaitingCapacity, LinkState::AwaitingResult];
            let event = match timeout(wait_for, self.wait(&watched)).await {
                Ok(event) => event?,
                Err(_) => {
                    debug!(
                        connected = self.links.len(),
                        registered = self.registered,
                        expected = self.config.num_nodes,
                        "still waiting for workers"
                    );
                    continue;
                }
            };

            match event {
                Event::Incoming(stream, addr) => self.accept(stream, addr)?,
                Event::Readable(id) if self.links[id].state() == LinkState::AwaitingResult => {
                    let link = &self.links[id];
                    let remote = link.remote_addr();
                    link.check_quiet().map_err(|e| {
                        warn!(link = id, %remote, "registered worker misbehaved: {e}");
                        e
                    })?;
                }
                Event::Readable(id) => {
                    let link = &mut self.links[id];
                    let remote = link.remote_addr();
                    let capacity = link.recv_capacity().await.map_err(|e| {
                        warn!(link = id, %remote, "registration failed: {e}");
                        e
                    })?;
                    self.load_sum = self.load_sum.saturating_add(capacity.load());
                    self.registered += 1;
                }
            }
        }

        self.listener = None;
        debug!(
            workers = self.links.len(),
            load_sum = self.load_sum,
            "registration complete, listener closed"
        );
        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<(), Error> {
        stream.set_nodelay(true)?;
        let id = self.links.len();
        let mut link = Link::new(id, stream, addr);
        link.await_capacity()?;
        debug!(link = id, remote = %addr, "worker connected");
        self.links.push(link);
        Ok(())
    }

    /// Sends one assignment per link, in link order.
    pub async fn dispatch(&mut self, assignments: &[Assignment]) -> Result<(), Error> {
        for (link, assignment) in self.links.iter_mut().zip(assignments) {
            link.send_assignment(assignment).await?;
        }
        Ok(())
    }

    /// Collects every partial sum before the deadline runs out. The clock
    /// starts now.
    pub async fn collect(&mut self) -> Result<f64, Error> {
        let max_time = self.config.max_time;
        let deadline = Instant::now() + max_time;
        let mut pending = self.links.len();
        let mut total = 0.;

        while pending > 0 {
            if Instant::now() >= deadline {
                return Err(Error::TimedOut(max_time));
            }
            let id = match timeout_at(deadline, self.wait(&[LinkState::AwaitingResult])).await {
                Err(_) => return Err(Error::TimedOut(max_time)),
                Ok(event) => match event? {
                    Event::Readable(id) => id,
                    // the listener is closed by now
                    Event::Incoming(_, addr) => {
                        warn!(remote = %addr, "dropping late connection");
                        continue;
                    }
                },
            };

            let link = &mut self.links[id];
            let remote = link.remote_addr();
            let value = match timeout_at(deadline, link.recv_result()).await {
                Err(_) => return Err(Error::TimedOut(max_time)),
                Ok(result) => result.map_err(|e| {
                    warn!(link = id, %remote, "result collection failed: {e}");
                    e
                })?,
            };
            trace!(link = id, value, "link closed");
            total += value;
            pending -= 1;
        }

        Ok(total)
    }
}
