//! Serial transport for the simulators
//!
//! A simulator owns one reader and any number of clones of the writer. Reads
//! block for at most the configured timeout and report it as
//! [`ReadEvent::Timeout`] rather than an error. Each write call holds the
//! writer lock for its whole buffer, so bytes from one call are never split by
//! another writer.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use hwsim_protocol::stn::encode_line;
use hwsim_protocol::{EncodeFrame, ProtocolCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::error::SimError;

/// Size of the scratch buffer used by [`FrameReader`]
const READ_CHUNK: usize = 256;

/// Outcome of a read with timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent<T> {
    /// Data arrived
    Data(T),
    /// Nothing arrived before the timeout
    Timeout,
    /// The peer closed the stream
    Closed,
}

/// Reads codec frames (e.g. CR-terminated lines) with a timeout
///
/// Bytes of a partial frame stay in the codec across timeouts, so a
/// `read_frame` future may be dropped at any await point without losing input.
pub struct FrameReader<R, C> {
    reader: R,
    codec: C,
    buf: Vec<u8>,
    timeout: Duration,
}

impl<R, C> FrameReader<R, C>
where
    R: AsyncRead + Unpin,
    C: ProtocolCodec,
{
    /// Create a new frame reader
    pub fn new(reader: R, codec: C, timeout: Duration) -> Self {
        Self {
            reader,
            codec,
            buf: vec![0u8; READ_CHUNK],
            timeout,
        }
    }

    /// Wait for the next complete frame
    pub async fn read_frame(&mut self) -> io::Result<ReadEvent<C::Frame>> {
        loop {
            if let Some(frame) = self.codec.next_frame() {
                return Ok(ReadEvent::Data(frame));
            }

            match read_with_timeout(&mut self.reader, &mut self.buf, self.timeout).await? {
                ReadEvent::Data(n) => {
                    debug!("in: {}", self.buf[..n].escape_ascii());
                    self.codec.push_bytes(&self.buf[..n]);
                }
                ReadEvent::Timeout => return Ok(ReadEvent::Timeout),
                ReadEvent::Closed => return Ok(ReadEvent::Closed),
            }
        }
    }

    /// Drop everything received but not yet returned as a frame
    ///
    /// Bytes already waiting in the stream are drained without blocking, so
    /// input that arrived while nobody was reading is discarded too.
    pub async fn discard_buffered(&mut self) -> io::Result<()> {
        let mut discarded = 0;
        loop {
            match read_with_timeout(&mut self.reader, &mut self.buf, Duration::ZERO).await? {
                ReadEvent::Data(n) => discarded += n,
                ReadEvent::Timeout | ReadEvent::Closed => break,
            }
        }
        self.codec.clear();
        if discarded > 0 {
            debug!("Discarded {} pending input bytes", discarded);
        }
        Ok(())
    }
}

/// Reads raw byte chunks with a timeout
pub struct ByteReader<R> {
    reader: R,
    buf: Vec<u8>,
    timeout: Duration,
}

impl<R> ByteReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a reader returning at most `max_len` bytes per read
    ///
    /// A `max_len` of zero is raised to one; an empty buffer would make every
    /// read look like a closed stream.
    pub fn new(reader: R, max_len: usize, timeout: Duration) -> Self {
        Self {
            reader,
            buf: vec![0u8; max_len.max(1)],
            timeout,
        }
    }

    /// Read whatever is available, up to the configured maximum
    pub async fn read_bytes(&mut self) -> io::Result<ReadEvent<Vec<u8>>> {
        let event = read_with_timeout(&mut self.reader, &mut self.buf, self.timeout).await?;
        Ok(match event {
            ReadEvent::Data(n) => {
                let data = self.buf[..n].to_vec();
                debug!("in: {:02X?}", data);
                ReadEvent::Data(data)
            }
            ReadEvent::Timeout => ReadEvent::Timeout,
            ReadEvent::Closed => ReadEvent::Closed,
        })
    }
}

async fn read_with_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    limit: Duration,
) -> io::Result<ReadEvent<usize>>
where
    R: AsyncRead + Unpin,
{
    match timeout(limit, reader.read(buf)).await {
        Err(_) => Ok(ReadEvent::Timeout),
        Ok(Ok(0)) => Ok(ReadEvent::Closed),
        Ok(Ok(n)) => Ok(ReadEvent::Data(n)),
        // Some serial drivers surface their own read timeout as an error
        Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(ReadEvent::Timeout),
        Ok(Err(e)) => Err(e),
    }
}

/// Cloneable writer shared by the foreground loop and background tasks
pub struct SharedWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W> SharedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write and flush `data` as one uninterrupted unit
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Write `text` followed by the line terminator
    pub async fn write_line(&self, text: &str) -> io::Result<()> {
        debug!("out: {}", text);
        self.write_all(&encode_line(text)).await
    }

    /// Write `text` with no terminator
    pub async fn write_text(&self, text: &str) -> io::Result<()> {
        debug!("out: {}", text);
        self.write_all(text.as_bytes()).await
    }

    /// Write raw bytes
    pub async fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        debug!("out: {:02X?}", data);
        self.write_all(data).await
    }

    /// Encode and write a frame
    pub async fn write_frame(&self, frame: &impl EncodeFrame) -> io::Result<()> {
        self.write_bytes(&frame.encode()).await
    }
}

/// Split a duplex stream into a frame reader and a shared writer
pub fn split_framed<S, C>(
    stream: S,
    codec: C,
    read_timeout: Duration,
) -> (FrameReader<ReadHalf<S>, C>, SharedWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
    C: ProtocolCodec,
{
    let (reader, writer) = tokio::io::split(stream);
    (
        FrameReader::new(reader, codec, read_timeout),
        SharedWriter::new(writer),
    )
}

/// Split a duplex stream into a byte reader and a shared writer
pub fn split_bytes<S>(
    stream: S,
    max_read: usize,
    read_timeout: Duration,
) -> (ByteReader<ReadHalf<S>>, SharedWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (
        ByteReader::new(reader, max_read, read_timeout),
        SharedWriter::new(writer),
    )
}

/// Open a serial port with 8N1 framing and no flow control
pub fn open_serial(config: &SerialConfig) -> Result<SerialStream, SimError> {
    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout())
        .open_native_async()
        .map_err(|source| SimError::PortOpen {
            port: config.port.clone(),
            source,
        })?;

    info!("Opened {} at {} baud", config.port, config.baud_rate);
    Ok(stream)
}
