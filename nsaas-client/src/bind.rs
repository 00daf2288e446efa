// SPDX-License-Identifier: BSD-3-Clause

//! Maps the `memfd` the controller hands back in a `REQ_CHANNEL` reply into
//! this process's address space (spec.md §4.2), and unmaps it again on
//! `detach()`.
//!
//! Grounded on the `libc::mmap`/`munmap` lifecycle in
//! `examples/other_examples/...bearcove-dodeca...shm.rs.rs`: map with
//! `MAP_SHARED`, size the mapping from the fd itself rather than trusting
//! the caller, unmap exactly once.

use std::os::fd::{AsRawFd, OwnedFd};

use log::debug;
use nsaas_proto::channel::Channel;

use crate::error::NsaasError;

/// An attached channel: the live `mmap` plus the interpreted ring/buffer
/// layout on top of it. Dropping a `ChannelHandle` without calling
/// `detach()` leaves the mapping in place — per spec.md §4.6, unmapping is
/// only guaranteed to happen when the application asks for it explicitly,
/// since the controller may still be writing into the region on the other
/// side of a crash.
pub struct ChannelHandle {
    base: *mut libc::c_void,
    size: usize,
    channel: Channel,
    _fd: OwnedFd,
}

unsafe impl Send for ChannelHandle {}

impl ChannelHandle {
    /// Maps `fd` (received over `SCM_RIGHTS`) and validates the channel
    /// header written by the controller.
    pub fn bind(fd: OwnedFd, hugepages: bool) -> Result<Self, NsaasError> {
        let size = fd_size(&fd)?;

        let mut flags = libc::MAP_SHARED | libc::MAP_POPULATE;
        if hugepages {
            flags |= libc::MAP_HUGETLB;
        }

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd.as_raw_fd(),
                0,
            )
        };

        let base = if base == libc::MAP_FAILED && hugepages {
            debug!("bind: MAP_HUGETLB mmap failed, falling back to ordinary pages");
            unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_POPULATE,
                    fd.as_raw_fd(),
                    0,
                )
            }
        } else {
            base
        };

        if base == libc::MAP_FAILED {
            return Err(NsaasError::Io(std::io::Error::last_os_error()));
        }

        let channel = unsafe { Channel::from_mapped(base as *mut u8, size)? };

        Ok(ChannelHandle {
            base,
            size,
            channel,
            _fd: fd,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Unmaps the channel region, consuming the handle. This is the only
    /// path that actually calls `munmap`: letting a `ChannelHandle` simply
    /// drop leaves the mapping intact (spec.md §4.6, REDESIGN FLAGS).
    pub fn detach(self) -> Result<(), NsaasError> {
        let ret = unsafe { libc::munmap(self.base, self.size) };
        // `self` drops normally here, closing `_fd`; there is no custom
        // Drop impl on ChannelHandle, so an un-detached handle simply
        // leaks the mapping (spec.md §4.6) while still closing its fd.
        if ret != 0 {
            return Err(NsaasError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

fn fd_size(fd: &OwnedFd) -> Result<usize, NsaasError> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) };
    if ret != 0 {
        return Err(NsaasError::Io(std::io::Error::last_os_error()));
    }
    Ok(stat.st_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;

    fn memfd_with_channel(sq_size: u32, buf_count: u32, buf_len: usize) -> OwnedFd {
        let name = std::ffi::CString::new("nsaas-test").unwrap();
        let raw = unsafe { libc::memfd_create(name.as_ptr(), 0) };
        assert!(raw >= 0);
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let layout = nsaas_proto::ChannelLayout::compute(sq_size, buf_count, buf_len);
        let ret = unsafe { libc::ftruncate(fd.as_raw_fd(), layout.total_size as libc::off_t) };
        assert_eq!(ret, 0);

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                layout.total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        assert_ne!(base, libc::MAP_FAILED);
        unsafe {
            nsaas_proto::Channel::create_in_place(base as *mut u8, layout, sq_size, buf_count);
            libc::munmap(base, layout.total_size);
        }

        fd
    }

    #[test]
    fn bind_then_detach_round_trips() {
        let fd = memfd_with_channel(4, 4, 64);
        let handle = ChannelHandle::bind(fd, false).unwrap();
        assert_eq!(handle.channel().buf_count(), 4);
        handle.detach().unwrap();
    }

    #[test]
    fn dropping_without_detach_does_not_panic() {
        let fd = memfd_with_channel(4, 4, 64);
        let handle = ChannelHandle::bind(fd, false).unwrap();
        // Intentionally not calling detach(): the mapping is leaked on
        // purpose per spec.md §4.6, not unmapped implicitly.
        drop(handle);
    }

    #[test]
    fn fd_size_matches_computed_layout() {
        let layout = nsaas_proto::ChannelLayout::compute(4, 4, 64);
        let fd = memfd_with_channel(4, 4, 64);
        assert_eq!(fd_size(&fd).unwrap(), layout.total_size);
    }
}
