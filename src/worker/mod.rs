use std::{io, net::SocketAddr, time::Duration};

use tokio::{io::AsyncWriteExt, net::TcpStream, task, time::sleep};
use tracing::{debug, debug_span, info, Instrument};
use typed_builder::TypedBuilder;

use crate::net::{
    error::Error,
    wire::{read_record, write_record, Assignment, Capacity, PartialSum},
};

pub mod affinity;
pub mod pool;

#[derive(TypedBuilder, Clone, Debug)]
pub struct WorkerConfig {
    pub coordinator: SocketAddr,
    /// Compute units to run, and the core count advertised to the coordinator
    #[builder(default = 1)]
    pub cores: u32,
    /// How long this worker is willing to compute, advertised as capacity
    #[builder(default = Duration::from_secs(10))]
    pub max_time: Duration,
    /// Pause between refused connection attempts
    #[builder(default = Duration::from_secs(1))]
    pub retry_delay: Duration,
    /// Stop retrying after this many refused attempts. Retries forever when
    /// unset.
    #[builder(default, setter(strip_option))]
    pub max_connect_attempts: Option<u32>,
}

impl WorkerConfig {
    pub fn capacity(&self) -> Capacity {
        Capacity {
            max_compute_seconds: self.max_time.as_secs(),
            core_count: self.cores,
        }
    }
}

/// A single-shot worker node: register, compute one assignment, report.
pub struct Worker {
    config: WorkerConfig,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Runs the worker to completion and returns the partial sum it reported.
    /// Only the initial connection is retried; anything after that is fatal.
    pub async fn run(&self) -> Result<f64, Error> {
        let span = debug_span!("worker", coordinator = %self.config.coordinator);
        async move {
            let mut stream = self.connect().await?;
            debug!("connected to coordinator");

            let capacity = self.config.capacity();
            write_record(&mut stream, &capacity).await?;
            debug!(
                seconds = capacity.max_compute_seconds,
                cores = capacity.core_count,
                "sent capacity"
            );

            let assignment: Assignment = read_record(&mut stream).await?;
            debug!(?assignment, "received assignment");

            let cores = self.config.cores;
            let value =
                task::spawn_blocking(move || pool::integrate(&assignment, cores)).await??;

            write_record(&mut stream, &PartialSum { value }).await?;
            stream.shutdown().await?;
            info!(value, "sent result");
            Ok::<_, Error>(value)
        }
        .instrument(span)
        .await
    }

    async fn connect(&self) -> Result<TcpStream, Error> {
        let addr = self.config.coordinator;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    if self
                        .config
                        .max_connect_attempts
                        .is_some_and(|max| attempts >= max)
                    {
                        return Err(Error::ConnectAttemptsExhausted { addr, attempts });
                    }
                    info!(attempts, "waiting for coordinator to start");
                    sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_from_config() {
        let config = WorkerConfig::builder()
            .coordinator("127.0.0.1:1337".parse().unwrap())
            .cores(4)
            .max_time(Duration::from_millis(2500))
            .build();
        assert_eq!(
            config.capacity(),
            Capacity {
                max_compute_seconds: 2,
                core_count: 4
            }
        );
    }

    #[test]
    fn defaults_to_one_core_for_ten_seconds() {
        let config = WorkerConfig::builder()
            .coordinator("127.0.0.1:1337".parse().unwrap())
            .build();
        assert_eq!(config.cores, 1);
        assert_eq!(config.max_time, Duration::from_secs(10));
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.max_connect_attempts, None);
    }
}
