//! A byte stream together with the framing spoken over it.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use strand_mtproto::transport::{Abridged, Full, Intermediate, Obfuscated, Transport};

use crate::connector::{ByteStream, Connector};
use crate::{Framing, InvocationError, TransportKind};

const READ_CHUNK: usize = 16 * 1024;

pub(crate) struct Link {
    stream: Box<dyn ByteStream>,
    framing: Box<dyn Transport>,
    read_buf: Box<[u8]>,
}

impl TransportKind {
    fn framing(&self) -> Result<Box<dyn Transport>, InvocationError> {
        Ok(match self {
            Self::Abridged => Box::new(Abridged::new()),
            Self::Intermediate => Box::new(Intermediate::new()),
            Self::Full => Box::new(Full::new()),
            Self::Obfuscated { framing: Framing::Abridged, secret } => {
                Box::new(Obfuscated::new(Abridged::new(), secret.as_ref())?)
            }
            Self::Obfuscated { framing: Framing::Intermediate, secret } => {
                Box::new(Obfuscated::new(Intermediate::new(), secret.as_ref())?)
            }
            Self::Obfuscated { framing: Framing::Full, secret } => {
                Box::new(Obfuscated::new(Full::new(), secret.as_ref())?)
            }
        })
    }
}

impl Link {
    /// Connect to `addr` and send the framing's init bytes.
    pub(crate) async fn open(connector: &dyn Connector, addr: &str, kind: &TransportKind) -> Result<Self, InvocationError> {
        let mut framing = kind.framing()?;
        let mut stream = connector.connect(addr).await?;
        let init = framing.init();
        if !init.is_empty() {
            stream.write_all(&init).await?;
        }
        Ok(Self { stream, framing, read_buf: vec![0; READ_CHUNK].into_boxed_slice() })
    }

    /// Frame and write every payload with a single flush.
    pub(crate) async fn send_all(&mut self, payloads: &[Vec<u8>]) -> Result<(), InvocationError> {
        let mut wire = Vec::new();
        for payload in payloads {
            self.framing.pack(payload, &mut wire);
        }
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub(crate) async fn send(&mut self, payload: Vec<u8>) -> Result<(), InvocationError> {
        self.send_all(std::slice::from_ref(&payload)).await
    }

    /// The next complete frame. Cancel-safe: bytes already read stay
    /// buffered in the framing.
    pub(crate) async fn recv(&mut self) -> Result<Vec<u8>, InvocationError> {
        loop {
            if let Some(frame) = self.framing.next_frame()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            self.framing.feed(&self.read_buf[..n]);
        }
    }

    pub(crate) async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
