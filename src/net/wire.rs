use std::{fmt, io};

use arrayref::{array_ref, array_refs};
use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::trace;

use super::error::Error;
use crate::{function::FunctionId, hex::HexDisplayExt};

const BIG_ENDIAN_BIT: u8 = 0b1000_0000;
const RESERVED_BIT: u8 = 0b0100_0000;
const KIND_MASK: u8 = 0b0011_1111;

/// Record prefix is 8 bits. The first bit stamps the byte order the body was
/// encoded in (set for big endian). The second bit is reserved and must be
/// clear. The last 6 bits specify the record kind.
///
/// Records have no length prefix: both ends know the size of every kind, so
/// the prefix is the only framing there is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordPrefix(u8);

impl RecordPrefix {
    pub fn new(big_endian: bool, kind: RecordKind) -> Self {
        let mut prefix = kind as u8;
        if big_endian {
            prefix |= BIG_ENDIAN_BIT;
        }
        Self(prefix)
    }

    pub fn big_endian(&self) -> bool {
        self.0 & BIG_ENDIAN_BIT != 0
    }

    pub fn reserved(&self) -> bool {
        self.0 & RESERVED_BIT != 0
    }

    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::try_from(self.0 & KIND_MASK).ok()
    }

    pub fn byte(&self) -> u8 {
        self.0
    }
}

impl From<u8> for RecordPrefix {
    fn from(byte: u8) -> Self {
        Self(byte)
    }
}

impl From<RecordPrefix> for u8 {
    fn from(prefix: RecordPrefix) -> Self {
        prefix.0
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// Worker to coordinator, right after connecting
    Capacity = 1,
    /// Coordinator to worker, once every capacity has been collected
    Assignment = 2,
    /// Worker to coordinator, once the assignment is computed
    Result = 3,
}

impl TryFrom<u8> for RecordKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RecordKind::Capacity),
            2 => Ok(RecordKind::Assignment),
            3 => Ok(RecordKind::Result),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Capacity => write!(f, "capacity"),
            RecordKind::Assignment => write!(f, "assignment"),
            RecordKind::Result => write!(f, "result"),
        }
    }
}

fn is_big_endian<B: ByteOrder>() -> bool {
    let mut probe = [0u8; 2];
    B::write_u16(&mut probe, 1);
    probe[0] == 0
}

/// A fixed-size protocol record.
pub trait Record: Sized {
    const KIND: RecordKind;
    /// Size of the body, not counting the prefix byte.
    const BODY_LEN: usize;
    const LEN: usize = 1 + Self::BODY_LEN;

    fn write_body<B: ByteOrder>(&self, body: &mut [u8]);

    /// `body` is exactly `BODY_LEN` bytes long.
    fn read_body<B: ByteOrder>(body: &[u8]) -> Result<Self, Error>;

    /// Encodes the record in this machine's byte order.
    fn encode(&self) -> Vec<u8> {
        self.encode_as::<NativeEndian>()
    }

    fn encode_as<B: ByteOrder>(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::LEN];
        buf[0] = RecordPrefix::new(is_big_endian::<B>(), Self::KIND).byte();
        self.write_body::<B>(&mut buf[1..]);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != Self::LEN {
            return Err(Error::ShortRecord {
                kind: Self::KIND,
                expected: Self::LEN,
                received: buf.len(),
            });
        }
        let prefix = RecordPrefix::from(buf[0]);
        if prefix.reserved() || prefix.kind() != Some(Self::KIND) {
            return Err(Error::BadPrefix {
                expected: Self::KIND,
                prefix: prefix.byte(),
            });
        }
        if prefix.big_endian() {
            Self::read_body::<BigEndian>(&buf[1..])
        } else {
            Self::read_body::<LittleEndian>(&buf[1..])
        }
    }
}

/// What a worker is able to contribute, sent once per connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    pub max_compute_seconds: u64,
    pub core_count: u32,
}

impl Capacity {
    /// The scalar the coordinator sizes shares by.
    pub fn load(&self) -> u64 {
        self.max_compute_seconds
            .saturating_mul(u64::from(self.core_count))
    }
}

impl Record for Capacity {
    const KIND: RecordKind = RecordKind::Capacity;
    const BODY_LEN: usize = 8 + 4;

    fn write_body<B: ByteOrder>(&self, body: &mut [u8]) {
        B::write_u64(&mut body[0..8], self.max_compute_seconds);
        B::write_u32(&mut body[8..12], self.core_count);
    }

    fn read_body<B: ByteOrder>(body: &[u8]) -> Result<Self, Error> {
        let (seconds, cores) = array_refs![array_ref![body, 0, 12], 8, 4];
        Ok(Self {
            max_compute_seconds: B::read_u64(seconds),
            core_count: B::read_u32(cores),
        })
    }
}

/// A worker's slice of the interval: `step_count` steps of `step_width`
/// starting at `interval_start`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Assignment {
    pub function: FunctionId,
    pub interval_start: f64,
    pub step_width: f64,
    pub step_count: u64,
}

impl Assignment {
    pub fn interval_end(&self) -> f64 {
        self.interval_start + self.step_width * self.step_count as f64
    }
}

impl Record for Assignment {
    const KIND: RecordKind = RecordKind::Assignment;
    const BODY_LEN: usize = 4 + 8 + 8 + 8;

    fn write_body<B: ByteOrder>(&self, body: &mut [u8]) {
        B::write_i32(&mut body[0..4], self.function.id());
        B::write_f64(&mut body[4..12], self.interval_start);
        B::write_f64(&mut body[12..20], self.step_width);
        B::write_u64(&mut body[20..28], self.step_count);
    }

    fn read_body<B: ByteOrder>(body: &[u8]) -> Result<Self, Error> {
        let (function, start, width, count) =
            array_refs![array_ref![body, 0, 28], 4, 8, 8, 8];
        Ok(Self {
            function: FunctionId::try_from(B::read_i32(function))?,
            interval_start: B::read_f64(start),
            step_width: B::read_f64(width),
            step_count: B::read_u64(count),
        })
    }
}

/// One worker's contribution to the integral.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PartialSum {
    pub value: f64,
}

impl Record for PartialSum {
    const KIND: RecordKind = RecordKind::Result;
    const BODY_LEN: usize = 8;

    fn write_body<B: ByteOrder>(&self, body: &mut [u8]) {
        B::write_f64(&mut body[0..8], self.value);
    }

    fn read_body<B: ByteOrder>(body: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            value: B::read_f64(array_ref![body, 0, 8]),
        })
    }
}

/// Writes one record. A write that cannot be completed is a protocol
/// violation, there is no resuming a half-written record.
pub async fn write_record<W, T>(writer: &mut W, record: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Record,
{
    let buf = record.encode();
    trace!("writing {} record {}", T::KIND, buf.hex());
    match writer.write_all(&buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WriteZero => {
            return Err(Error::ShortWrite(T::KIND))
        }
        Err(e) => return Err(e.into()),
    }
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one record. EOF before the first byte is a hang-up, EOF
/// anywhere later is a short record.
pub async fn read_record<R, T>(reader: &mut R) -> Result<T, Error>
where
    R: AsyncRead + Unpin,
    T: Record,
{
    let mut buf = vec![0u8; T::LEN];
    let mut filled = 0;
    while filled < T::LEN {
        match reader.read(&mut buf[filled..]).await? {
            0 if filled == 0 => return Err(Error::Disconnected(T::KIND)),
            0 => {
                return Err(Error::ShortRecord {
                    kind: T::KIND,
                    expected: T::LEN,
                    received: filled,
                })
            }
            n => filled += n,
        }
    }
    trace!("read {} record {}", T::KIND, buf.hex());
    T::decode(&buf)
}

/// Reads one record from a socket once it is readable, without waiting for
/// stragglers. Whatever the socket holds when it runs dry is the record: fewer
/// than `T::LEN` bytes is a short record.
pub async fn read_ready_record<T: Record>(stream: &TcpStream) -> Result<T, Error> {
    let mut buf = vec![0u8; T::LEN];
    let mut filled = 0;
    while filled < T::LEN {
        if filled == 0 {
            stream.readable().await?;
        }
        let short = Error::ShortRecord {
            kind: T::KIND,
            expected: T::LEN,
            received: filled,
        };
        match stream.try_read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(Error::Disconnected(T::KIND)),
            Ok(0) => return Err(short),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // spurious readiness is fine until the first byte lands
                if filled > 0 {
                    return Err(short);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    trace!("read {} record {}", T::KIND, buf.hex());
    T::decode(&buf)
}
