// SPDX-License-Identifier: BSD-3-Clause

//! A stand-in controller used by `nsaas-client`'s integration tests and by
//! manual exercising of the client library. It speaks just enough of the
//! control-socket and control-queue protocol to register applications,
//! hand out `memfd`-backed channels over `SCM_RIGHTS`, and answer (or, for
//! a couple of test scenarios, deliberately fail to answer) control-queue
//! entries.
//!
//! Shaped after `rpcbind/src/server.rs`: bind a `UnixListener` after
//! clearing any stale socket file, then dispatch each connection in its own
//! thread rather than multiplexing with an event loop.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use nix::sys::socket::{sendmsg, ControlMessage as NixControlMessage, MsgFlags};
use nsaas_proto::channel::{Channel, ChannelLayout};
use nsaas_proto::wire::{
    ChannelInfo, ControlMessage, CtrlOpcode, MsgType, CONTROL_MESSAGE_SIZE, STATUS_ERROR,
    STATUS_SUCCESS,
};

/// Behaviors the integration tests dial in to exercise spec.md §8's failure
/// scenarios without a real network stack underneath.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// S5: reply to every request with a `msg_type` the client won't
    /// recognize, instead of `Response`.
    pub protocol_mismatch: bool,

    /// S4: accept control-queue submissions but never post a completion,
    /// to exercise the client's poll timeout.
    pub never_complete: bool,

    /// Echo every buffer the application pushes onto the app ring straight
    /// back onto the stack ring, standing in for a peer that loops
    /// messages back to the sender.
    pub loopback: bool,
}

/// A running stub controller. `run()` blocks the calling thread in the
/// accept loop; spawn it on its own thread the way the tests do.
pub struct StubController {
    listener: UnixListener,
    behavior: Behavior,
    shutdown: Arc<AtomicBool>,
    register_count: Arc<AtomicUsize>,
}

impl StubController {
    /// Binds `socket_path`, removing any stale file left behind by a
    /// previous run (same idiom as `rpcbind::server::main`'s Unix case).
    pub fn bind(socket_path: &str, behavior: Behavior) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        Ok(StubController {
            listener,
            behavior,
            shutdown: Arc::new(AtomicBool::new(false)),
            register_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A handle that can be used to ask `run()` to stop accepting new
    /// connections after the current one finishes.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// A handle tracking how many `REQ_REGISTER` requests this controller
    /// has answered, for tests asserting on a client's idempotent `init()`.
    pub fn register_count(&self) -> Arc<AtomicUsize> {
        self.register_count.clone()
    }

    pub fn run(self) {
        info!("stub controller listening");
        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let behavior = self.behavior;
                    let register_count = self.register_count.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, behavior, register_count) {
                            warn!("connection handler exited: {e}");
                        }
                    });
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }
}

fn handle_connection(
    mut stream: UnixStream,
    behavior: Behavior,
    register_count: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let mut buf = [0u8; CONTROL_MESSAGE_SIZE];
    stream.read_exact(&mut buf)?;
    let request = match ControlMessage::from_bytes(&buf) {
        Ok(request) => request,
        Err(e) => {
            warn!("malformed control message: {e}");
            return Ok(());
        }
    };

    match MsgType::from_u32(request.msg_type) {
        Some(MsgType::ReqRegister) => {
            register_count.fetch_add(1, Ordering::Relaxed);
            handle_register(&mut stream, &request, behavior)
        }
        Some(MsgType::ReqChannel) => handle_channel(&mut stream, &request, behavior),
        other => {
            debug!("ignoring request of type {other:?}");
            Ok(())
        }
    }
}

fn handle_register(
    stream: &mut UnixStream,
    request: &ControlMessage,
    behavior: Behavior,
) -> std::io::Result<()> {
    let mut reply = *request;
    reply.msg_type = if behavior.protocol_mismatch {
        0xffff_ffff
    } else {
        MsgType::Response as u32
    };
    reply.status = STATUS_SUCCESS;
    stream.write_all(&reply.to_bytes())
}

fn handle_channel(
    stream: &mut UnixStream,
    request: &ControlMessage,
    behavior: Behavior,
) -> std::io::Result<()> {
    if behavior.protocol_mismatch {
        let mut reply = *request;
        reply.msg_type = 0xffff_ffff;
        reply.status = STATUS_ERROR;
        stream.write_all(&reply.to_bytes())?;
        return Ok(());
    }

    let ChannelInfo { sq_size, buf_count, .. } = request.channel_info;
    let buf_data_len = 1024;

    let (fd, channel) = match create_channel_memfd(sq_size.max(1), buf_count.max(1), buf_data_len) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("failed to create channel memfd: {e}");
            let mut reply = *request;
            reply.msg_type = MsgType::Response as u32;
            reply.status = STATUS_ERROR;
            return stream.write_all(&reply.to_bytes());
        }
    };

    let mut reply = *request;
    reply.msg_type = MsgType::Response as u32;
    reply.status = STATUS_SUCCESS;

    send_reply_with_fd(stream, &reply, fd.as_raw_fd())?;

    if !behavior.never_complete {
        let channel = Arc::new(channel);
        let fd_keepalive = fd;
        thread::spawn(move || poll_channel(channel, fd_keepalive, behavior));
    } else {
        std::mem::forget(fd);
    }

    Ok(())
}

fn send_reply_with_fd(
    stream: &UnixStream,
    reply: &ControlMessage,
    fd: RawFd,
) -> std::io::Result<()> {
    let bytes = reply.to_bytes();
    let iov = [std::io::IoSlice::new(&bytes)];
    let fds = [fd];
    let cmsg = [NixControlMessage::ScmRights(&fds)];
    sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map(|_| ())
        .map_err(std::io::Error::from)
}

fn create_channel_memfd(
    sq_size: u32,
    buf_count: u32,
    buf_data_len: usize,
) -> std::io::Result<(OwnedFd, Channel)> {
    let name = std::ffi::CString::new("nsaas-channel").unwrap();
    let raw = unsafe { libc::memfd_create(name.as_ptr(), 0) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let layout = ChannelLayout::compute(sq_size, buf_count, buf_data_len);
    if unsafe { libc::ftruncate(fd.as_raw_fd(), layout.total_size as libc::off_t) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

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
    if base == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    let channel = unsafe { Channel::create_in_place(base as *mut u8, layout, sq_size, buf_count) };
    Ok((fd, channel))
}

/// Background loop driving one bound channel: answers control-queue
/// submissions and, in loopback mode, echoes app-ring buffers back onto the
/// stack ring. Runs until the process exits; the mapping it holds via
/// `_fd` keeps the memfd alive for as long as this thread does.
fn poll_channel(channel: Arc<Channel>, _fd: OwnedFd, behavior: Behavior) {
    loop {
        if let Some(entry) = channel.sq().pop() {
            if behavior.never_complete {
                debug!("dropping control entry {} (never_complete)", entry.id);
            } else {
                let mut completed = entry;
                completed.status = STATUS_SUCCESS;
                if !channel.cq().push(completed) {
                    warn!("completion queue full, dropping completion for {}", entry.id);
                }
                match CtrlOpcode::from_u32(entry.opcode) {
                    Some(CtrlOpcode::CreateFlow) => debug!("completed CREATE_FLOW {}", entry.id),
                    Some(CtrlOpcode::Listen) => debug!("completed LISTEN {}", entry.id),
                    None => warn!("unknown control opcode {}", entry.opcode),
                }
            }
        }

        if behavior.loopback {
            if let Some(slot) = channel.app_ring().pop() {
                channel.stack_ring().push(slot);
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}
