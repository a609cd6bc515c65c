// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;

/// pty master fd, registered with the tokio reactor through `AsyncFd`.
#[derive(Debug)]
pub struct PtyFd(pub OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for PtyFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Put the descriptor in non-blocking mode (required before `AsyncFd::new`).
pub fn set_nonblocking(fd: impl AsFd) -> io::Result<()> {
    rustix::io::ioctl_fionbio(fd, true)?;
    Ok(())
}

/// Read the next chunk of output. `Ok(0)` means end of stream.
pub async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| Ok(rustix::io::read(inner.get_ref(), &mut *buf)?)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write as much of `data` as the pty accepts in one go, waiting for
/// writability first. Returns the number of bytes written.
///
/// Cancel-safe: bytes are only written in the poll that completes the future.
pub async fn write_some(afd: &AsyncFd<PtyFd>, data: &[u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| Ok(rustix::io::write(inner.get_ref(), data)?)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// True for the errno a pty master reports once the child side has closed.
pub fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::libc::EIO)
}
