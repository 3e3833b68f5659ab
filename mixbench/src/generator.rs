//! Synthetic object payloads backed by a circular, partially compressible buffer.
//!
//! A [`Generator`] owns a buffer of random bytes in which every k-th chunk is zeroed, so that
//! roughly the configured percentage of the data compresses well. Each worker draws a
//! [`ByteSource`] from the generator; a source hands out objects whose payloads are read
//! circularly from the shared buffer, continuing where the previous object stopped. This yields
//! an effectively infinite stream with the requested compressibility from a bounded buffer.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, task};

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{Error, Result};

/// Default length of the circular buffer: one MiB plus one byte.
pub const DEFAULT_BUFFER_SIZE: usize = (1 << 20) + 1;
/// Default size of a compressible chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 32_000;
/// Content type of generated objects.
pub const CONTENT_TYPE: &str = "application/octet-stream";
/// Suffix appended to generated object names.
pub const OBJECT_SUFFIX: &str = ".crnd";

const NAME_LEN: usize = 16;

/// How the size of generated objects is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectSize {
    /// Every object has exactly this many bytes.
    Fixed(u64),
    /// Sizes are drawn uniformly from `1..=max` bytes.
    Random {
        /// Largest size that may be drawn.
        max: u64,
    },
}

impl ObjectSize {
    fn sample(&self, rng: &mut impl Rng) -> u64 {
        match *self {
            ObjectSize::Fixed(size) => size,
            ObjectSize::Random { max: 0 } => 0,
            ObjectSize::Random { max } => rng.random_range(1..=max),
        }
    }
}

impl fmt::Display for ObjectSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectSize::Fixed(size) => write!(f, "{size} bytes total"),
            ObjectSize::Random { max } => write!(f, "random size up to {max} bytes"),
        }
    }
}

/// Configuration of a [`Generator`].
///
/// The configuration is validated once by [`Generator::new`].
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Length of the circular buffer in bytes. Must exceed `compressible_chunk_size`.
    pub buffer_size: usize,
    /// Length of a zeroed chunk in bytes.
    pub compressible_chunk_size: usize,
    /// Approximate share of the buffer to zero, in percent (1 to 100).
    pub percent_compressible: u32,
    /// Fixed RNG seed. A random seed is used when absent.
    pub seed: Option<u64>,
    /// Size policy of generated objects.
    pub object_size: ObjectSize,
    /// Namespace segment prepended to object names.
    pub prefix: Option<String>,
}

impl GeneratorConfig {
    /// Creates a configuration with the default buffer and chunk sizes.
    pub fn new(percent_compressible: u32, object_size: ObjectSize) -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            compressible_chunk_size: DEFAULT_CHUNK_SIZE,
            percent_compressible,
            seed: None,
            object_size,
            prefix: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config(format!(
                "circular random: size must be > 0, got {}",
                self.buffer_size
            )));
        }
        if self.compressible_chunk_size == 0 {
            return Err(Error::Config(
                "circular random: compressibleChunkSize must be > 0".into(),
            ));
        }
        if self.buffer_size <= self.compressible_chunk_size {
            return Err(Error::Config(format!(
                "circular random: size must be > compressibleChunkSize, got {} and {}",
                self.buffer_size, self.compressible_chunk_size
            )));
        }
        if self.percent_compressible == 0 || self.percent_compressible > 100 {
            return Err(Error::Config(format!(
                "circular random: percentCompressible must be in 1..=100, got {}",
                self.percent_compressible
            )));
        }
        Ok(())
    }
}

/// Zeroes every k-th chunk of `buf`, with `k = 100 / percent`.
///
/// A trailing chunk that would run past the end of the buffer is left untouched.
fn make_compressible(buf: &mut [u8], chunk_size: usize, percent: u32) {
    let interval = (100 / percent as usize).max(1);
    let len = buf.len();

    for (index, start) in (0..len).step_by(chunk_size).enumerate() {
        if (index + 1) % interval != 0 {
            continue;
        }
        let end = start + chunk_size;
        if end > len {
            continue;
        }
        buf[start..end].fill(0);
    }
}

/// Owner of the circular buffer; hands out per-worker [`ByteSource`]s.
pub struct Generator {
    config: GeneratorConfig,
    buffer: Arc<[u8]>,
    seed: u64,
    sources: AtomicU64,
}

impl Generator {
    /// Validates the configuration and fills the circular buffer.
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut buffer = vec![0; config.buffer_size];
        rng.fill_bytes(&mut buffer);
        make_compressible(
            &mut buffer,
            config.compressible_chunk_size,
            config.percent_compressible,
        );

        Ok(Self {
            config,
            buffer: buffer.into(),
            seed,
            sources: AtomicU64::new(0),
        })
    }

    /// The configuration this generator was built from.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// The circular buffer all payloads are read from.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Creates a new source of objects.
    ///
    /// Every source has its own RNG stream and starting position in the buffer, so concurrent
    /// workers neither collide on names nor upload identical payloads. With a fixed seed, the
    /// n-th source is the same across runs.
    pub fn source(&self) -> ByteSource {
        let index = self.sources.fetch_add(1, Ordering::Relaxed);
        let stream_seed = self
            .seed
            .wrapping_add((index + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut rng = StdRng::seed_from_u64(stream_seed);
        let pos = rng.random_range(0..self.buffer.len() as u64);

        ByteSource {
            buffer: Arc::clone(&self.buffer),
            rng,
            pos,
            object_size: self.config.object_size,
            prefix: self.config.prefix.clone(),
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circular Random data ({}% compressible); {}",
            self.config.percent_compressible, self.config.object_size
        )
    }
}

/// Metadata of an object, without its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    /// Unique name, including the prefix.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Content type the object is uploaded with.
    pub content_type: String,
    /// Namespace segment of the name, if any.
    pub prefix: Option<String>,
}

/// A freshly generated object together with its payload.
#[derive(Debug)]
pub struct GeneratedObject {
    /// The object's metadata.
    pub object: Object,
    /// Reader producing exactly `object.size` bytes.
    pub payload: Payload,
}

/// Generates objects for one worker.
pub struct ByteSource {
    buffer: Arc<[u8]>,
    rng: StdRng,
    pos: u64,
    object_size: ObjectSize,
    prefix: Option<String>,
}

impl ByteSource {
    /// Generates the next object.
    ///
    /// The payload starts where the previous object's payload ended.
    pub fn object(&mut self) -> GeneratedObject {
        let random_name: String = (0..NAME_LEN)
            .map(|_| char::from(self.rng.sample(Alphanumeric)))
            .collect();
        let name = match &self.prefix {
            Some(prefix) => format!("{prefix}/{random_name}{OBJECT_SUFFIX}"),
            None => format!("{random_name}{OBJECT_SUFFIX}"),
        };
        let size = self.object_size.sample(&mut self.rng);

        let payload = Payload {
            buffer: Arc::clone(&self.buffer),
            start: self.pos,
            len: size,
            offset: 0,
        };
        self.pos = (self.pos + size) % self.buffer.len() as u64;

        GeneratedObject {
            object: Object {
                name,
                size,
                content_type: CONTENT_TYPE.to_owned(),
                prefix: self.prefix.clone(),
            },
            payload,
        }
    }

    /// Position in the circular buffer where the next payload starts.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("pos", &self.pos)
            .field("object_size", &self.object_size)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Reader over an object's payload in the circular buffer.
///
/// Reads wrap around the end of the buffer. Seeking is relative to the start of the object.
#[derive(Clone)]
pub struct Payload {
    buffer: Arc<[u8]>,
    start: u64,
    len: u64,
    offset: u64,
}

impl Payload {
    /// Total length of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the payload has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.len - self.offset
    }

    fn fill(&mut self, out: &mut [u8]) -> usize {
        let n = (out.len() as u64).min(self.remaining()) as usize;
        let buf_len = self.buffer.len();
        let mut pos = ((self.start + self.offset) % buf_len as u64) as usize;

        let mut written = 0;
        while written < n {
            let chunk = (n - written).min(buf_len - pos);
            out[written..written + chunk].copy_from_slice(&self.buffer[pos..pos + chunk]);
            written += chunk;
            pos = 0;
        }

        self.offset += n as u64;
        n
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl io::Read for Payload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf))
    }
}

impl io::Seek for Payload {
    /// Seeking past the end leaves nothing to read and returns an `UnexpectedEof` error.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => (offset, 0),
            SeekFrom::Current(delta) => (self.offset, delta),
            SeekFrom::End(delta) => (self.len, delta),
        };

        let Some(target) = base.checked_add_signed(delta) else {
            if delta < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("negative position: {}", i128::from(base) + i128::from(delta)),
                ));
            }
            self.offset = self.len;
            return Err(io::ErrorKind::UnexpectedEof.into());
        };

        if target > self.len {
            self.offset = self.len;
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        self.offset = target;
        Ok(target)
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.remaining()) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        let filled = self.fill(fill_buf);
        buf.advance(filled);

        task::Poll::Ready(Ok(()))
    }
}
