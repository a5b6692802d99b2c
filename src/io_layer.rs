//! Component C3: the pluggable read/write stack over a connection's socket.
//!
//! Bottom is a plain TCP (or UNIX-domain) stream; TLS, if negotiated, wraps
//! it; a SASL security layer, if negotiated, wraps that. Because the stack
//! can grow at runtime (StartTLS, SASL layer activation) it's represented
//! as a single type-erased `Box<dyn Transport>` that gets re-wrapped in
//! place rather than as an explicit `Vec` of layers — each wrapper already
//! owns "the layer below it", so nesting the box *is* the stack.
//!
//! Deferred layer changes (spec §4.3): `queue_push_tls`/`queue_push_sasl`
//! only record what to do; `apply_pending` performs the swap, and must be
//! called exactly once per read cycle with the connection lock held.

use std::io::{self, Cursor, Read, Write};
use std::net::TcpStream;

use crate::error::{FrontendError, Result};

/// Any object usable as the current transport.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// SASL PDUs are length-prefixed with a 4-byte big-endian count (spec
/// §4.3). This wraps an inner transport, peeking/reading the prefix, and
/// decoding ciphertext through the pluggable `SaslSecurityLayer` before
/// returning it as a flat byte stream.
pub trait SaslSecurityLayer: Send {
    fn decode(&mut self, ciphertext: &[u8]) -> io::Result<Vec<u8>>;
    fn encode(&mut self, plaintext: &[u8]) -> io::Result<Vec<u8>>;
}

pub struct SaslWrap<S> {
    inner: S,
    layer: Box<dyn SaslSecurityLayer>,
    max_sasl_io_size: i64,
    read_buf: Vec<u8>,
    read_pos: usize,
}

impl<S: Read + Write> SaslWrap<S> {
    pub fn new(inner: S, layer: Box<dyn SaslSecurityLayer>, max_sasl_io_size: i64) -> SaslWrap<S> {
        SaslWrap { inner, layer, max_sasl_io_size, read_buf: Vec::new(), read_pos: 0 }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut len_bytes = [0u8; 4];
        self.inner.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if self.max_sasl_io_size >= 0 && len as i64 > self.max_sasl_io_size {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "SASL PDU exceeds max-sasl-io-size"));
        }
        let mut ciphertext = vec![0u8; len];
        self.inner.read_exact(&mut ciphertext)?;
        self.read_buf = self
            .layer
            .decode(&ciphertext)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.read_pos = 0;
        Ok(())
    }
}

impl<S: Read + Write> Read for SaslWrap<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_pos >= self.read_buf.len() {
            self.fill()?;
        }
        let avail = &self.read_buf[self.read_pos..];
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl<S: Read + Write> Write for SaslWrap<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let ciphertext = self.layer.encode(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
        self.inner.write_all(&ciphertext)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A layer change the dispatcher must apply at the top of the next read
/// cycle, never mid-read.
pub enum PendingChange {
    #[cfg(feature = "tls")]
    PushTls(native_tls::TlsAcceptor),
    PushSasl { layer: Box<dyn SaslSecurityLayer>, max_sasl_io_size: i64, ssf: u32 },
}

/// The connection's current transport plus the three independent SSF
/// contributions (spec §3 invariant 5: `ssf_effective = max of the three`).
pub struct IoLayers {
    transport: Box<dyn Transport>,
    pub ssf_ssl: u32,
    pub ssf_sasl: u32,
    pub ssf_local: u32,
    pending: Option<PendingChange>,
    /// DER bytes of the client's TLS certificate, captured at handshake
    /// time, since the transport is type-erased afterward and can no
    /// longer be downcast back to a `native_tls::TlsStream`.
    peer_cert_der: Option<Vec<u8>>,
}

impl IoLayers {
    pub fn plain(stream: TcpStream, local_ssf: u32) -> IoLayers {
        IoLayers {
            transport: Box::new(stream),
            ssf_ssl: 0,
            ssf_sasl: 0,
            ssf_local: local_ssf,
            pending: None,
            peer_cert_der: None,
        }
    }

    pub fn from_transport(transport: Box<dyn Transport>, local_ssf: u32) -> IoLayers {
        IoLayers { transport, ssf_ssl: 0, ssf_sasl: 0, ssf_local: local_ssf, pending: None, peer_cert_der: None }
    }

    /// DER bytes of the peer's TLS client certificate, if one was presented
    /// during the handshake (spec §4.8's SASL EXTERNAL fallback).
    pub fn peer_cert_der(&self) -> Option<&[u8]> {
        self.peer_cert_der.as_deref()
    }

    pub fn effective_ssf(&self) -> u32 {
        self.ssf_ssl.max(self.ssf_sasl).max(self.ssf_local)
    }

    #[cfg(feature = "tls")]
    pub fn queue_push_tls(&mut self, acceptor: native_tls::TlsAcceptor) {
        self.pending = Some(PendingChange::PushTls(acceptor));
    }

    pub fn queue_push_sasl(&mut self, layer: Box<dyn SaslSecurityLayer>, max_sasl_io_size: i64, ssf: u32) {
        self.pending = Some(PendingChange::PushSasl { layer, max_sasl_io_size, ssf });
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending.is_some()
    }

    /// Apply exactly one queued layer change. Must be called with the
    /// connection lock held, at the top of a read cycle (spec §4.3).
    pub fn apply_pending(&mut self) -> Result<()> {
        let Some(change) = self.pending.take() else { return Ok(()) };
        let old = std::mem::replace(&mut self.transport, Box::new(Cursor::new(Vec::new())));
        match change {
            #[cfg(feature = "tls")]
            PendingChange::PushTls(acceptor) => {
                let tls = acceptor.accept(old).map_err(|e| {
                    FrontendError::Tls(match e {
                        native_tls::HandshakeError::Failure(e) => e,
                        native_tls::HandshakeError::WouldBlock(_) => {
                            native_tls::Error::from(io::Error::new(io::ErrorKind::WouldBlock, "handshake incomplete"))
                        }
                    })
                })?;
                self.peer_cert_der = tls.peer_certificate().ok().flatten().and_then(|c| c.to_der().ok());
                self.transport = Box::new(tls);
                self.ssf_ssl = 128;
            }
            PendingChange::PushSasl { layer, max_sasl_io_size, ssf } => {
                self.transport = Box::new(SaslWrap::new(old, layer, max_sasl_io_size));
                self.ssf_sasl = ssf;
            }
        }
        Ok(())
    }
}

impl Read for IoLayers {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.read(buf)
    }
}

impl Write for IoLayers {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// An in-memory duplex pipe, standing in for a socket in tests.
    #[derive(Clone)]
    struct Pipe {
        read_side: Arc<Mutex<VecDeque<u8>>>,
        write_side: Arc<Mutex<VecDeque<u8>>>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut side = self.read_side.lock().unwrap();
            let n = side.len().min(buf.len());
            for (i, b) in side.drain(..n).enumerate() {
                buf[i] = b;
            }
            Ok(n)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_side.lock().unwrap().extend(buf.iter().copied());
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Xor(u8);
    impl SaslSecurityLayer for Xor {
        fn decode(&mut self, ciphertext: &[u8]) -> io::Result<Vec<u8>> {
            Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
        }
        fn encode(&mut self, plaintext: &[u8]) -> io::Result<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }
    }

    #[test]
    fn effective_ssf_is_the_max_of_the_three() {
        let (a, b) = (Arc::new(Mutex::new(VecDeque::new())), Arc::new(Mutex::new(VecDeque::new())));
        let pipe = Pipe { read_side: a, write_side: b };
        let mut layers = IoLayers::from_transport(Box::new(pipe), 0);
        layers.ssf_ssl = 128;
        layers.ssf_sasl = 56;
        assert_eq!(layers.effective_ssf(), 128);
    }

    #[test]
    fn sasl_wrap_round_trips_through_a_pipe() {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        let client_side = Pipe { read_side: a.clone(), write_side: b.clone() };
        let server_side = Pipe { read_side: b, write_side: a };

        let mut writer = SaslWrap::new(client_side, Box::new(Xor(0x42)), -1);
        writer.write_all(b"hello, sasl").unwrap();

        let mut reader = SaslWrap::new(server_side, Box::new(Xor(0x42)), -1);
        let mut out = [0u8; 32];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"hello, sasl");
    }

    #[test]
    fn oversize_sasl_pdu_is_rejected() {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        let client_side = Pipe { read_side: a.clone(), write_side: b.clone() };
        let server_side = Pipe { read_side: b, write_side: a };

        let mut writer = SaslWrap::new(client_side, Box::new(Xor(0)), 4);
        writer.write_all(b"too long for the cap").unwrap();

        let mut reader = SaslWrap::new(server_side, Box::new(Xor(0)), 4);
        let mut out = [0u8; 32];
        assert!(reader.read(&mut out).is_err());
    }
}
