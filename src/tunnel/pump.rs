//! Tunnel ⇄ link pumps
//!
//! Two tasks move traffic once the tunnel is up: inbound frames are unwrapped
//! and written to the link process, and link output is cut into MTU-sized
//! chunks and framed onto the tunnel. The first error from either task, or the
//! shutdown token, ends the bridge.

use crate::error::{Result, VpnError};
use crate::tunnel::framing::{self, FrameDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pump sizing
#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    /// Largest payload carried by one outbound frame
    pub mtu: usize,
    /// Read buffer size for each pump
    pub buffer_size: usize,
}

/// Relay between `tunnel` and `link` until shutdown or the first pump error
///
/// Returns `Ok(())` when `shutdown` fires, including when it was already
/// cancelled before a pump failed. Both streams are dropped before returning.
pub async fn run_bridge<T, L>(
    tunnel: T,
    link: L,
    config: PumpConfig,
    shutdown: &CancellationToken,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    let (tunnel_rd, tunnel_wr) = tokio::io::split(tunnel);
    let (link_rd, link_wr) = tokio::io::split(link);

    let (err_tx, mut err_rx) = mpsc::channel::<VpnError>(2);
    let mut pumps = JoinSet::new();

    let inbound_tx = err_tx.clone();
    pumps.spawn(async move {
        let err = pump_inbound(tunnel_rd, link_wr, config.buffer_size).await;
        let _ = inbound_tx.send(err).await;
    });
    pumps.spawn(async move {
        let err = pump_outbound(link_rd, tunnel_wr, config).await;
        let _ = err_tx.send(err).await;
    });

    let result = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            log::info!("Shutdown requested, closing tunnel");
            Ok(())
        }
        Some(err) = err_rx.recv() => {
            log::error!("Tunnel bridge failed: {err}");
            Err(err)
        }
    };

    // aborting drops the stream halves, which closes the connection and the pty
    pumps.shutdown().await;
    result
}

/// Tunnel → link: reassemble frames and write each payload to the link
pub async fn pump_inbound<R, W>(mut tunnel: R, mut link: W, buffer_size: usize) -> VpnError
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut decoder = FrameDecoder::new();

    loop {
        let n = match tunnel.read(&mut buf).await {
            Ok(0) => return VpnError::Bridge("tunnel read: connection closed".to_string()),
            Ok(n) => n,
            Err(e) => return VpnError::Bridge(format!("tunnel read: {e}")),
        };
        decoder.extend(&buf[..n]);

        loop {
            let payload = match decoder.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => return e.into(),
            };
            log::trace!(
                "tunnel -> link {} bytes: {}",
                payload.len(),
                hex::encode(&payload[..payload.len().min(32)])
            );
            if let Err(e) = link.write_all(&payload).await {
                return VpnError::Bridge(format!("link write: {e}"));
            }
        }

        if decoder.buffered() > 0 {
            log::debug!("Holding {} bytes of a partial frame", decoder.buffered());
        }
    }
}

/// Link → tunnel: frame link output in chunks of at most `mtu` bytes
pub async fn pump_outbound<R, W>(mut link: R, mut tunnel: W, config: PumpConfig) -> VpnError
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; config.buffer_size];

    loop {
        let n = match link.read(&mut buf).await {
            Ok(0) => return VpnError::Bridge("link read: process closed the pty".to_string()),
            Ok(n) => n,
            Err(e) => return VpnError::Bridge(format!("link read: {e}")),
        };
        if n > config.mtu {
            log::debug!("Splitting {n} bytes of link output at MTU {}", config.mtu);
        }

        for frame in framing::encode_chunked(&buf[..n], config.mtu) {
            log::trace!(
                "link -> tunnel {} bytes: {}",
                frame.len(),
                hex::encode(&frame[..frame.len().min(32)])
            );
            if let Err(e) = tunnel.write_all(&frame).await {
                return VpnError::Bridge(format!("tunnel write: {e}"));
            }
        }
        if let Err(e) = tunnel.flush().await {
            return VpnError::Bridge(format!("tunnel write: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::framing::{decode, encode, FrameError};
    use std::time::Duration;
    use tokio::io::duplex;

    const CONFIG: PumpConfig = PumpConfig {
        mtu: 1280,
        buffer_size: 8192,
    };

    #[tokio::test]
    async fn test_inbound_unwraps_frames() {
        let (mut gateway, tunnel) = duplex(64 * 1024);
        let (link, mut pppd) = duplex(64 * 1024);
        let task = tokio::spawn(pump_inbound(tunnel, link, 16));

        // two frames split across writes that do not line up with frame bounds
        let mut stream = encode(b"hello");
        stream.extend(encode(b" world"));
        for piece in stream.chunks(3) {
            gateway.write_all(piece).await.unwrap();
        }

        let mut out = [0u8; 11];
        pppd.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello world");

        drop(gateway);
        let err = task.await.unwrap();
        assert!(err.to_string().contains("tunnel read"));
    }

    #[tokio::test]
    async fn test_inbound_rejects_oversized_frame() {
        let (mut gateway, tunnel) = duplex(1024);
        let (link, _pppd) = duplex(1024);
        let task = tokio::spawn(pump_inbound(tunnel, link, 64));

        gateway.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = task.await.unwrap();
        assert!(matches!(err, VpnError::Frame(FrameError::Oversized { .. })));
    }

    #[tokio::test]
    async fn test_outbound_chunks_at_mtu() {
        let (mut pppd, link) = duplex(64 * 1024);
        let (tunnel, mut gateway) = duplex(64 * 1024);
        let task = tokio::spawn(pump_outbound(link, tunnel, CONFIG));

        let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        pppd.write_all(&data).await.unwrap();
        drop(pppd);
        let err = task.await.unwrap();
        assert!(err.to_string().contains("link read"));

        let mut wire = Vec::new();
        gateway.read_to_end(&mut wire).await.unwrap();

        let mut rest = &wire[..];
        let mut rebuilt = Vec::new();
        while !rest.is_empty() {
            let (declared, payload) = decode(rest).unwrap();
            assert!(declared as usize <= 1280);
            rebuilt.extend_from_slice(payload);
            rest = &rest[4 + payload.len()..];
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_shutdown_returns_ok() {
        let (_gateway, tunnel) = duplex(1024);
        let (link, _pppd) = duplex(1024);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = run_bridge(tunnel, link, CONFIG, &shutdown).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_before_pump_error_wins() {
        let (gateway, tunnel) = duplex(1024);
        let (link, pppd) = duplex(1024);
        // both pumps will fail immediately on EOF
        drop(gateway);
        drop(pppd);

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = run_bridge(tunnel, link, CONFIG, &shutdown).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_pump_error_before_shutdown_is_returned() {
        let (gateway, tunnel) = duplex(1024);
        let (link, _pppd) = duplex(1024);
        drop(gateway);

        let shutdown = CancellationToken::new();
        let err = run_bridge(tunnel, link, CONFIG, &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::Bridge(_)));

        // a late disconnect after the bridge ended must not block or panic
        shutdown.cancel();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bridge_relays_both_directions() {
        let (mut gateway, tunnel) = duplex(64 * 1024);
        let (link, mut pppd) = duplex(64 * 1024);
        let shutdown = CancellationToken::new();

        let bridge_token = shutdown.clone();
        let bridge =
            tokio::spawn(async move { run_bridge(tunnel, link, CONFIG, &bridge_token).await });

        gateway.write_all(&encode(b"LCP from gateway")).await.unwrap();
        let mut inbound = [0u8; 16];
        pppd.read_exact(&mut inbound).await.unwrap();
        assert_eq!(&inbound, b"LCP from gateway");

        pppd.write_all(b"LCP reply").await.unwrap();
        let mut outbound = [0u8; 13];
        gateway.read_exact(&mut outbound).await.unwrap();
        assert_eq!(decode(&outbound).unwrap(), (9, &b"LCP reply"[..]));

        shutdown.cancel();
        assert!(bridge.await.unwrap().is_ok());

        // the bridge dropped its side of the tunnel
        let mut rest = Vec::new();
        gateway.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
