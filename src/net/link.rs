use std::{io, net::SocketAddr};

use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{
    error::Error,
    wire::{read_ready_record, write_record, Assignment, Capacity, PartialSum, RecordKind},
};

/// Where a link is in the coordinator's protocol.
///
/// `Empty -> AwaitingCapacity -> AwaitingResult -> Closed`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Accepted, not yet watched
    Empty,
    AwaitingCapacity,
    /// Capacity is known. The assignment is sent inline while in this state.
    AwaitingResult,
    /// The result was consumed and the socket closed
    Closed,
}

/// The coordinator's record of one worker connection. Links are owned by the
/// event loop and addressed by their index into its link table.
pub struct Link {
    id: usize,
    stream: Option<TcpStream>,
    remote_addr: SocketAddr,
    load: u64,
    state: LinkState,
}

impl Link {
    pub fn new(id: usize, stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            stream: Some(stream),
            remote_addr,
            load: 0,
            state: LinkState::Empty,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn load(&self) -> u64 {
        self.load
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// The socket, until the link is closed.
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// Starts watching the link for its capacity record.
    pub fn await_capacity(&mut self) -> Result<(), Error> {
        self.ensure(LinkState::Empty)?;
        self.state = LinkState::AwaitingCapacity;
        Ok(())
    }

    pub async fn recv_capacity(&mut self) -> Result<Capacity, Error> {
        self.ensure(LinkState::AwaitingCapacity)?;
        let capacity: Capacity = read_ready_record(self.live_stream()?).await?;
        self.load = capacity.load();
        self.state = LinkState::AwaitingResult;
        debug!(
            link = self.id,
            seconds = capacity.max_compute_seconds,
            cores = capacity.core_count,
            load = self.load,
            "worker registered"
        );
        Ok(capacity)
    }

    /// Sends the link's assignment. The record is small enough to fit in the
    /// socket's send buffer, so this is not readiness driven.
    pub async fn send_assignment(
        &mut self,
        assignment: &Assignment,
    ) -> Result<(), Error> {
        self.ensure(LinkState::AwaitingResult)?;
        write_record(self.stream_mut()?, assignment).await?;
        trace!(link = self.id, ?assignment, "sent assignment");
        Ok(())
    }

    /// Reads the partial sum and closes the link.
    pub async fn recv_result(&mut self) -> Result<f64, Error> {
        self.ensure(LinkState::AwaitingResult)?;
        let result: PartialSum = read_ready_record(self.live_stream()?).await?;
        self.close();
        debug!(link = self.id, value = result.value, "received result");
        Ok(result.value)
    }

    /// Called when a link that is waiting for its assignment turns readable.
    /// A worker has nothing to say at that point, so this is either a hang-up
    /// or a protocol violation. Spurious readiness is ignored.
    pub fn check_quiet(&self) -> Result<(), Error> {
        self.ensure(LinkState::AwaitingResult)?;
        match self.live_stream()?.try_read(&mut [0u8; 1]) {
            Ok(0) => Err(Error::Disconnected(RecordKind::Result)),
            Ok(_) => Err(Error::UnexpectedState {
                link: self.id,
                state: self.state,
            }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.state = LinkState::Closed;
    }

    fn ensure(&self, state: LinkState) -> Result<(), Error> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::UnexpectedState {
                link: self.id,
                state: self.state,
            })
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, Error> {
        let (link, state) = (self.id, self.state);
        self.stream
            .as_mut()
            .ok_or(Error::UnexpectedState { link, state })
    }

    fn live_stream(&self) -> Result<&TcpStream, Error> {
        self.stream.as_ref().ok_or(Error::UnexpectedState {
            link: self.id,
            state: self.state,
        })
    }
}
