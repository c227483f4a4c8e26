//! pppd link process attached to a pseudo-terminal
//!
//! pppd expects to talk to a serial line, so it is started as a session
//! leader with the pty slave as its controlling terminal. The master side is
//! exposed as an async byte stream for the bridge pumps.

use crate::config::TunnelConfig;
use crate::error::{Result, VpnError};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use nix::unistd::setsid;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, Command};

const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// pppd arguments for the tunnel link
///
/// Option reference: https://ppp.samba.org/pppd.html
pub fn pppd_args(config: &TunnelConfig) -> Vec<String> {
    let mtu = config.mtu.to_string();
    vec![
        "call".to_string(),
        config.peer.clone(),
        "mtu".to_string(),
        mtu.clone(),
        "mru".to_string(),
        mtu,
        "debug".to_string(),
        "debug".to_string(),
        "logfd".to_string(),
        "2".to_string(),
    ]
}

/// Running link process
///
/// Dropping the handle kills the process.
pub struct LinkProcess {
    child: Child,
}

impl LinkProcess {
    /// Spawn pppd on a fresh pty, returning the process and the master stream
    pub fn spawn(config: &TunnelConfig) -> Result<(Self, PtyStream)> {
        let pty = openpty(None, None)
            .map_err(|e| VpnError::Process(format!("failed to open pty: {e}")))?;
        let slave = File::from(pty.slave);
        let slave_in = slave
            .try_clone()
            .map_err(|e| VpnError::Process(format!("failed to dup pty slave: {e}")))?;

        let args = pppd_args(config);
        log::debug!("Starting {} {}", config.pppd_path, args.join(" "));

        let mut command = Command::new(&config.pppd_path);
        command
            .args(&args)
            .stdin(Stdio::from(slave_in))
            .stdout(Stdio::from(slave))
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // SAFETY: only async-signal-safe calls run between fork and exec
        unsafe {
            command.pre_exec(|| {
                setsid()?;
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            VpnError::Process(format!("failed to start {}: {e}", config.pppd_path))
        })?;
        // the Command still holds the parent's copies of the slave fds
        drop(command);

        log::info!("pppd started (pid {:?})", child.id());
        let stream = PtyStream::new(pty.master)?;
        Ok((Self { child }, stream))
    }

    /// OS process id, if the process has not been reaped yet
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the process and wait for it to exit
    pub async fn terminate(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::info!("pppd already exited with {status}");
                return;
            }
            Ok(None) => {}
            Err(e) => log::warn!("failed to poll pppd: {e}"),
        }

        if let Err(e) = self.child.start_kill() {
            log::warn!("failed to kill pppd: {e}");
            return;
        }
        match tokio::time::timeout(TERMINATE_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => log::info!("pppd exited with {status}"),
            Ok(Err(e)) => log::warn!("failed to wait for pppd: {e}"),
            Err(_) => log::warn!("pppd did not exit within {TERMINATE_TIMEOUT:?}"),
        }
    }
}

/// Non-blocking async stream over a pty master
pub struct PtyStream {
    inner: AsyncFd<File>,
}

impl PtyStream {
    fn new(master: OwnedFd) -> Result<Self> {
        set_nonblocking(&master)
            .map_err(|e| VpnError::Process(format!("failed to configure pty: {e}")))?;
        let inner = AsyncFd::new(File::from(master))
            .map_err(|e| VpnError::Process(format!("failed to register pty: {e}")))?;
        Ok(Self { inner })
    }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

impl AsyncRead for PtyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for PtyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
