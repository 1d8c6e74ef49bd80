//! Drives the sans-IO key exchange over a live connection.

use std::time::Duration;

use strand_crypto::rsa::TrustedKeys;
use strand_mtproto::authentication::{self as auth, Finished};
use strand_mtproto::{NegotiationError, PlainSession};
use strand_tl::{Deserializable, RemoteCall, Serializable};
use tokio::time;

use crate::connector::Connector;
use crate::link::Link;
use crate::{InvocationError, TransportKind};

/// Attempts before giving up when the server keeps failing verification.
pub const MAX_HANDSHAKE_ATTEMPTS: u32 = 5;

/// Where to negotiate and what to trust.
pub(crate) struct Dial<'a> {
    pub connector: &'a dyn Connector,
    pub addr: &'a str,
    pub dc_id: i32,
    pub transport: &'a TransportKind,
    pub trusted_keys: &'a TrustedKeys,
    pub step_timeout: Duration,
}

/// Negotiate a new auth key, returning it with the connection it was made on.
///
/// Each attempt opens a fresh connection. Only
/// [`NegotiationError::VerificationFailed`] is retried.
pub(crate) async fn negotiate(dial: &Dial<'_>) -> Result<(Link, Finished), InvocationError> {
    let mut attempt = 1;
    loop {
        tracing::info!("[strand] Negotiating auth key with DC{} at {} (attempt {attempt}) …", dial.dc_id, dial.addr);
        let mut link = Link::open(dial.connector, dial.addr, dial.transport).await?;
        match exchange(&mut link, dial).await {
            Ok(done) => {
                tracing::info!("[strand] Auth key ready (time offset {}s)", done.time_offset);
                return Ok((link, done));
            }
            Err(InvocationError::Negotiation(NegotiationError::VerificationFailed { reason }))
                if attempt < MAX_HANDSHAKE_ATTEMPTS =>
            {
                tracing::warn!("[strand] Key verification failed ({reason}), starting over");
                link.shutdown().await;
                attempt += 1;
            }
            Err(e) => {
                link.shutdown().await;
                return Err(e);
            }
        }
    }
}

async fn exchange(link: &mut Link, dial: &Dial<'_>) -> Result<Finished, InvocationError> {
    let mut plain = PlainSession::new();

    let (req, s1) = auth::step1()?;
    let res_pq = round_trip(link, &mut plain, &req, dial.step_timeout).await?;

    let (req, s2) = auth::step2(s1, res_pq, dial.dc_id, dial.trusted_keys)?;
    let dh_params = round_trip(link, &mut plain, &req, dial.step_timeout).await?;

    let (req, s3) = auth::step3(s2, dh_params)?;
    let answer = round_trip(link, &mut plain, &req, dial.step_timeout).await?;

    Ok(auth::finish(s3, answer)?)
}

async fn round_trip<R: RemoteCall>(
    link: &mut Link,
    plain: &mut PlainSession,
    request: &R,
    timeout: Duration,
) -> Result<R::Return, InvocationError> {
    link.send(plain.pack(&request.to_bytes())).await?;
    let frame = time::timeout(timeout, link.recv()).await.map_err(|_| InvocationError::Timeout)??;
    let body = PlainSession::unpack(&frame).map_err(|e| InvocationError::Deserialize(e.to_string()))?;
    Ok(R::Return::from_bytes(body)?)
}
