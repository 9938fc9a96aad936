//! The Linux HCI user-channel transport: a raw `AF_BLUETOOTH` socket
//! bound to `(device_index, HCI_CHANNEL_USER)`, with a dedicated reader
//! thread feeding a bounded channel into the cooperative world (spec
//! §4.2, §9 "Cross-process inbound queue" — here a thread plays the role
//! the source gave a separate OS process, since there is no GIL to
//! escape). Grounded in
//! `original_source/tools/hci_throughput/hci_socket.py`'s
//! `HCI_User_Channel_Socket` and in `bo-tie`'s own `hci::unix` socket
//! handling (`FileDescriptor` RAII wrapper, non-blocking bind-then-drain).

use super::{InboundFrame, InboundReceiver, Transport, INBOUND_QUEUE_CAPACITY};
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::os::unix::io::RawFd;
use std::process::Command;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const AF_BLUETOOTH: libc::sa_family_t = 31;
const BTPROTO_HCI: libc::c_int = 1;
const HCI_CHANNEL_USER: u16 = 1;
const SOCKET_RECV_BUFFER_SIZE: usize = 425_984;
const BIND_RETRY_ATTEMPTS: usize = 2;

/// Mirrors `struct sockaddr_hci` from `<bluetooth/hci.h>`.
#[repr(C)]
struct SockAddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

/// RAII wrapper closing the underlying fd on drop, the same role
/// `bo-tie`'s `FileDescriptor` plays around its raw sockets.
struct RawSocket(RawFd);

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

pub struct UnixChannelTransport {
    device_index: u16,
    socket: RawSocket,
    frame_tx: mpsc::Sender<InboundFrame>,
    reader_stop: Option<mpsc::Sender<()>>,
    reader_handle: Option<std::thread::JoinHandle<()>>,
}

impl UnixChannelTransport {
    /// Open and bind the raw socket; does not start the reader thread.
    pub fn open(device_index: u16) -> Result<(Self, InboundReceiver)> {
        let socket = create_socket()?;
        bind_with_retry(socket.0, device_index)?;
        drain_residual(socket.0);
        let (frame_tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        Ok((
            UnixChannelTransport {
                device_index,
                socket,
                frame_tx,
                reader_stop: None,
                reader_handle: None,
            },
            rx,
        ))
    }
}

fn create_socket() -> Result<RawSocket> {
    let fd = unsafe { libc::socket(AF_BLUETOOTH as libc::c_int, libc::SOCK_RAW, BTPROTO_HCI) };
    if fd < 0 {
        return Err(Error::TransportBind("socket() failed".into()));
    }
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    unsafe {
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        let bufsize: libc::c_int = SOCKET_RECV_BUFFER_SIZE as libc::c_int;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &bufsize as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
    Ok(RawSocket(fd))
}

fn bind_with_retry(fd: RawFd, device_index: u16) -> Result<()> {
    let addr = SockAddrHci {
        hci_family: AF_BLUETOOTH,
        hci_dev: device_index,
        hci_channel: HCI_CHANNEL_USER,
    };
    for attempt in 0..BIND_RETRY_ATTEMPTS {
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const SockAddrHci as *const libc::sockaddr,
                std::mem::size_of::<SockAddrHci>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            info!("bound HCI user channel on device {device_index}");
            return Ok(());
        }
        warn!("bind failed on device {device_index} (attempt {attempt}); power-cycling device");
        power_cycle_device(device_index);
    }
    Err(Error::TransportBind(format!(
        "binding to HCI user channel on device {device_index} failed after {BIND_RETRY_ATTEMPTS} attempts"
    )))
}

/// One OS-specific recovery attempt before giving up (spec §4.2).
fn power_cycle_device(device_index: u16) {
    let _ = Command::new("btmgmt")
        .args(["-i", &device_index.to_string(), "power", "off"])
        .output();
}

fn drain_residual(fd: RawFd) {
    std::thread::sleep(Duration::from_millis(200));
    let mut buf = [0u8; SOCKET_RECV_BUFFER_SIZE];
    let mut drained = 0usize;
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        drained += n as usize;
    }
    debug!("drained {drained} residual bytes before start");
}

#[async_trait]
impl Transport for UnixChannelTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let fd = self.socket.0;
        let buf = bytes.to_vec();
        tokio::task::spawn_blocking(move || loop {
            let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.kind() == std::io::ErrorKind::WouldBlock {
                    std::thread::sleep(Duration::from_micros(200));
                    continue;
                }
                return Err(Error::Io(errno.to_string()));
            }
            return Ok(());
        })
        .await
        .map_err(|e| Error::Io(e.to_string()))?
    }

    fn start(&mut self) -> Result<()> {
        let fd = self.socket.0;
        let device_index = self.device_index;
        let (stop_tx, mut stop_rx) = mpsc::channel(1);
        let frame_tx = self.frame_tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("hci-reader-{device_index}"))
            .spawn(move || reader_loop(fd, frame_tx, &mut stop_rx))
            .map_err(|e| Error::Io(e.to_string()))?;
        self.reader_stop = Some(stop_tx);
        self.reader_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.reader_stop.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop(fd: RawFd, frame_tx: mpsc::Sender<InboundFrame>, stop_rx: &mut mpsc::Receiver<()>) {
    let mut buf = [0u8; SOCKET_RECV_BUFFER_SIZE];
    loop {
        if stop_rx.try_recv().is_ok() {
            return;
        }
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            let received_at = Instant::now();
            let bytes = buf[..n as usize].to_vec();
            if frame_tx.blocking_send(InboundFrame { bytes, received_at }).is_err() {
                return;
            }
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
