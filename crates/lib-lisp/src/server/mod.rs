use std::{collections::VecDeque, io, net::SocketAddr, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UdpSocket, UnixListener, UnixStream},
    signal,
    sync::mpsc,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    api,
    config::Settings,
    constants::{LISP_CONTROL_PORT, MAX_CONTROL_PKT_SIZE, TICK_INTERVAL},
    control::{dispatch, ControlDevice, Ctx, Device, OutPacket, PendingKind},
    iface::IfaceEvent,
    nonces::NonceTable,
    timers::{TimerEvent, TimerWheel},
};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Neither IPv4 nor IPv6 control socket is enabled")]
    NoControlSocket,
}

/// Handle the platform collaborator uses to feed interface events into
/// the running reactor.
#[derive(Clone)]
pub struct IfaceHandle {
    tx: mpsc::Sender<IfaceEvent>,
}

impl IfaceHandle {
    /// Queue an event; `false` when the daemon is gone.
    pub fn notify(&self, event: IfaceEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

/// The single-threaded reactor owning every input of the control plane:
/// the UDP control sockets, the management IPC socket, the timer tick and
/// the interface-event channel. Each event's handler runs to completion
/// before the next is dispatched, which is the whole concurrency story.
pub struct Daemon {
    settings: Settings,
    device: Device,
    wheel: TimerWheel<TimerEvent>,
    nonces: NonceTable<PendingKind>,
    out: VecDeque<OutPacket>,
    iface_tx: mpsc::Sender<IfaceEvent>,
    iface_rx: mpsc::Receiver<IfaceEvent>,
}

impl Daemon {
    pub fn new(settings: Settings) -> Self {
        let device = Device::from_settings(&settings);
        let (iface_tx, iface_rx) = mpsc::channel(64);

        Self {
            settings,
            device,
            wheel: TimerWheel::new(),
            nonces: NonceTable::new(),
            out: VecDeque::new(),
            iface_tx,
            iface_rx,
        }
    }

    pub fn iface_handle(&self) -> IfaceHandle {
        IfaceHandle {
            tx: self.iface_tx.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run until ctrl-c. Fatal setup failures (socket binds, IPC path)
    /// surface as errors; everything after that is log-and-continue.
    #[tokio::main(flavor = "current_thread")]
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let sock4 = if self.settings.bind_v4 {
            Some(UdpSocket::bind(("0.0.0.0", LISP_CONTROL_PORT)).await?)
        } else {
            None
        };
        let sock6 = if self.settings.bind_v6 {
            Some(UdpSocket::bind(("::", LISP_CONTROL_PORT)).await?)
        } else {
            None
        };
        if sock4.is_none() && sock6.is_none() {
            return Err(DaemonError::NoControlSocket);
        }

        // A stale socket file from a previous run would fail the bind.
        let _ = std::fs::remove_file(&self.settings.ipc_socket);
        let ipc = UnixListener::bind(&self.settings.ipc_socket)?;

        info!(
            role = ?self.settings.role,
            ipc = %self.settings.ipc_socket.display(),
            "control plane up"
        );

        let mut ticker = time::interval(Duration::from_secs(TICK_INTERVAL));
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;

        {
            let mut ctx = Ctx {
                wheel: &mut self.wheel,
                nonces: &mut self.nonces,
                out: &mut self.out,
            };
            self.device.start(&mut ctx);
        }
        flush_out(&mut self.out, &sock4, &sock6, &mut self.wheel);

        let mut buf4 = vec![0u8; MAX_CONTROL_PKT_SIZE];
        let mut buf6 = vec![0u8; MAX_CONTROL_PKT_SIZE];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for event in self.wheel.tick() {
                        let mut ctx = Ctx {
                            wheel: &mut self.wheel,
                            nonces: &mut self.nonces,
                            out: &mut self.out,
                        };
                        self.device.on_timer(&mut ctx, event);
                    }
                }

                result = recv_opt(&sock4, &mut buf4) => {
                    match result {
                        Ok((len, src)) => {
                            let raw = buf4[..len].to_vec();
                            let mut ctx = Ctx {
                                wheel: &mut self.wheel,
                                nonces: &mut self.nonces,
                                out: &mut self.out,
                            };
                            dispatch(&mut self.device, &mut ctx, &raw, src);
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => warn!(%err, "control socket read failed"),
                    }
                }

                result = recv_opt(&sock6, &mut buf6) => {
                    match result {
                        Ok((len, src)) => {
                            let raw = buf6[..len].to_vec();
                            let mut ctx = Ctx {
                                wheel: &mut self.wheel,
                                nonces: &mut self.nonces,
                                out: &mut self.out,
                            };
                            dispatch(&mut self.device, &mut ctx, &raw, src);
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => warn!(%err, "control socket read failed"),
                    }
                }

                accepted = ipc.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let mut ctx = Ctx {
                                wheel: &mut self.wheel,
                                nonces: &mut self.nonces,
                                out: &mut self.out,
                            };
                            if let Err(err) =
                                serve_ipc(stream, &mut self.device, &mut ctx).await
                            {
                                warn!(%err, "management connection failed");
                            }
                        }
                        Err(err) => warn!(%err, "management accept failed"),
                    }
                }

                event = self.iface_rx.recv() => {
                    if let Some(event) = event {
                        let mut ctx = Ctx {
                            wheel: &mut self.wheel,
                            nonces: &mut self.nonces,
                            out: &mut self.out,
                        };
                        self.device.on_iface_change(&mut ctx, event);
                    }
                }

                _ = signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }

            flush_out(&mut self.out, &sock4, &sock6, &mut self.wheel);
        }

        // Teardown in reverse construction order: IPC first, then the
        // control sockets fall out of scope.
        drop(ipc);
        let _ = std::fs::remove_file(&self.settings.ipc_socket);
        info!("control plane down");
        Ok(())
    }
}

/// Receive on an optional socket; an absent socket never becomes ready.
async fn recv_opt(
    sock: &Option<UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match sock {
        Some(s) => s.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

/// Drain the outbound queue with non-blocking sends. A would-block puts
/// the packet back and arms a short retry timer instead of stalling the
/// loop.
fn flush_out(
    out: &mut VecDeque<OutPacket>,
    sock4: &Option<UdpSocket>,
    sock6: &Option<UdpSocket>,
    wheel: &mut TimerWheel<TimerEvent>,
) {
    while let Some(packet) = out.pop_front() {
        let sock = if packet.dst.is_ipv4() { sock4 } else { sock6 };
        let Some(sock) = sock else {
            warn!(dst = %packet.dst, "no socket for address family, dropping");
            continue;
        };

        match sock.try_send_to(&packet.bytes, packet.dst) {
            Ok(_) => debug!(dst = %packet.dst, len = packet.bytes.len(), "sent"),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                out.push_front(packet);
                wheel.start(1, TimerEvent::ResendQueued);
                break;
            }
            Err(err) => {
                warn!(dst = %packet.dst, %err, "send failed, dropping");
            }
        }
    }
}

/// One management exchange: fixed header, payload, single result frame.
async fn serve_ipc(
    mut stream: UnixStream,
    device: &mut Device,
    ctx: &mut Ctx<'_>,
) -> io::Result<()> {
    let mut header = [0u8; api::API_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let datalen = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if datalen > MAX_CONTROL_PKT_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "management payload too large",
        ));
    }

    let mut request = header.to_vec();
    if datalen > 0 {
        let mut payload = vec![0u8; datalen];
        stream.read_exact(&mut payload).await?;
        request.extend_from_slice(&payload);
    }

    let reply = api::handle_request(device, ctx, &request);
    stream.write_all(&reply).await?;
    stream.shutdown().await?;
    Ok(())
}
