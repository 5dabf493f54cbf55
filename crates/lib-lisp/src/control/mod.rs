use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use lispbuf::{ReadBuffer, Readable, WriteBuffer, Writeable};
use tracing::warn;

use crate::{
    auth,
    config::{DeviceRole, Settings},
    iface::IfaceEvent,
    local_db::LocalDb,
    map_cache::MapCache,
    nonces::NonceTable,
    timers::{TimerEvent, TimerWheel},
    types::{
        Address, ControlMessage, InfoMessage, MapNotify, MapRegister, MapReply, MapRequest,
        MessageError, MessageType,
    },
};

mod ms;
mod rtr;
mod xtr;

pub use ms::*;
pub use rtr::*;
pub use xtr::*;

/// A serialized control datagram waiting for the reactor to put it on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPacket {
    pub dst: SocketAddr,
    pub bytes: Vec<u8>,
}

/// What an outstanding nonce was issued for, so the reply (or the final
/// timeout) can resume the right state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// A Map-Request for this EID through the mapping system.
    Resolution { eid: Address, smr_invoked: bool },

    /// An RLOC-probe of one locator of a cached mapping.
    Probe { eid: Address, rloc: Address },

    /// A Map-Register awaiting its Map-Notify.
    Register { ms: IpAddr },

    /// An Info-Request awaiting its Info-Reply.
    Info { ms: IpAddr },
}

/// Mutable plumbing every handler gets: the wheel for scheduling, the
/// nonce table for request pairing, and the outbound queue the reactor
/// flushes after the handler returns. Handlers never touch sockets.
pub struct Ctx<'a> {
    pub wheel: &'a mut TimerWheel<TimerEvent>,
    pub nonces: &'a mut NonceTable<PendingKind>,
    pub out: &'a mut VecDeque<OutPacket>,
}

impl Ctx<'_> {
    pub fn send(&mut self, dst: SocketAddr, msg: &ControlMessage) -> Result<(), MessageError> {
        let mut buf = WriteBuffer::new();
        msg.write(&mut buf)?;
        self.out.push_back(OutPacket {
            dst,
            bytes: buf.into_bytes(),
        });
        Ok(())
    }

    /// Serialize with a zeroed auth-data field, patch in the HMAC, queue.
    pub fn send_signed(
        &mut self,
        dst: SocketAddr,
        msg: &ControlMessage,
        key: &str,
    ) -> Result<(), MessageError> {
        let mut buf = WriteBuffer::new();
        msg.write(&mut buf)?;
        auth::sign(&mut buf, key)?;
        self.out.push_back(OutPacket {
            dst,
            bytes: buf.into_bytes(),
        });
        Ok(())
    }
}

/// The per-role dispatch surface. Handlers run to completion on the
/// event-loop thread and communicate only through [`Ctx`]; errors stay
/// inside (log and drop), nothing propagates across the loop boundary.
pub trait ControlDevice {
    /// One-time boot work once the reactor is live: preload caches, kick
    /// off registrations, arm periodic timers.
    fn start(&mut self, ctx: &mut Ctx<'_>);

    fn handle_map_request(&mut self, ctx: &mut Ctx<'_>, req: MapRequest, src: SocketAddr);
    fn handle_map_reply(&mut self, ctx: &mut Ctx<'_>, reply: MapReply, src: SocketAddr);
    fn handle_map_register(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        reg: MapRegister,
        src: SocketAddr,
    );
    fn handle_map_notify(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        notify: MapNotify,
        src: SocketAddr,
    );
    fn handle_info_request(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        info: InfoMessage,
        src: SocketAddr,
    );
    fn handle_info_reply(&mut self, ctx: &mut Ctx<'_>, info: InfoMessage, src: SocketAddr);

    fn on_iface_change(&mut self, ctx: &mut Ctx<'_>, event: IfaceEvent);
    fn on_timer(&mut self, ctx: &mut Ctx<'_>, event: TimerEvent);
}

/// Parse one control datagram and hand it to the right handler. An
/// Encapsulated Control Message is unwrapped once, with the inner source
/// taken from the inner headers.
pub fn dispatch<D: ControlDevice>(device: &mut D, ctx: &mut Ctx<'_>, raw: &[u8], src: SocketAddr) {
    let mut buf = ReadBuffer::new(raw);
    let msg = match ControlMessage::read(&mut buf) {
        Ok(msg) => msg,
        Err(err) => {
            log_malformed(src, &err);
            return;
        }
    };

    match msg {
        ControlMessage::MapRequest(req) => device.handle_map_request(ctx, req, src),
        ControlMessage::MapReply(reply) => device.handle_map_reply(ctx, reply, src),
        ControlMessage::MapRegister(reg) => device.handle_map_register(ctx, raw, reg, src),
        ControlMessage::MapNotify(notify) => device.handle_map_notify(ctx, raw, notify, src),
        ControlMessage::EncapControl(ecm) => {
            // Exactly one level of encapsulation is legal.
            match ControlMessage::peek_type(&ecm.payload) {
                Ok(MessageType::EncapControl) | Err(_) => {
                    warn!(%src, "dropping nested or empty encapsulated control message");
                }
                Ok(_) => {
                    let inner_src = SocketAddr::new(ecm.src, ecm.src_port);
                    dispatch(device, ctx, &ecm.payload, inner_src);
                }
            }
        }
        ControlMessage::Info(info) if info.is_reply() => {
            device.handle_info_reply(ctx, info, src)
        }
        ControlMessage::Info(info) => device.handle_info_request(ctx, raw, info, src),
    }
}

/// A peer spraying garbage must not flood the log: malformed packets are
/// reported at most once per source per minute. The loop is single
/// threaded, so a thread-local is the whole synchronization story.
fn log_malformed(src: SocketAddr, err: &MessageError) {
    thread_local! {
        static LAST_LOGGED: RefCell<HashMap<IpAddr, Instant>> = RefCell::new(HashMap::new());
    }

    let now = Instant::now();
    let should_log = LAST_LOGGED.with(|last| {
        let mut last = last.borrow_mut();
        match last.get(&src.ip()) {
            Some(at) if now.duration_since(*at) < Duration::from_secs(60) => false,
            _ => {
                last.insert(src.ip(), now);
                true
            }
        }
    });

    if should_log {
        warn!(%src, %err, "dropping malformed control message");
    }
}

/// The composed device for one daemon: role-specific state behind one
/// dispatch surface.
pub enum Device {
    Xtr(Box<Xtr>),
    MsMr(Box<MsMr>),
    Rtr(Box<Rtr>),
}

impl Device {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.role {
            DeviceRole::Xtr | DeviceRole::Mn => Device::Xtr(Box::new(Xtr::from_settings(settings))),
            DeviceRole::Ms | DeviceRole::Mr => {
                Device::MsMr(Box::new(MsMr::from_settings(settings)))
            }
            DeviceRole::Rtr => Device::Rtr(Box::new(Rtr::from_settings(settings))),
        }
    }

    /// The map-cache, on roles that keep one.
    pub fn map_cache(&self) -> Option<&MapCache> {
        match self {
            Device::Xtr(x) => Some(x.map_cache()),
            Device::Rtr(r) => Some(r.base().map_cache()),
            Device::MsMr(_) => None,
        }
    }

    /// The local mapping database, on roles that keep one.
    pub fn local_db(&self) -> Option<&LocalDb> {
        match self {
            Device::Xtr(x) => Some(x.local_db()),
            Device::Rtr(r) => Some(r.base().local_db()),
            Device::MsMr(_) => None,
        }
    }

    pub fn as_xtr_mut(&mut self) -> Option<&mut Xtr> {
        match self {
            Device::Xtr(x) => Some(x),
            Device::Rtr(r) => Some(r.base_mut()),
            Device::MsMr(_) => None,
        }
    }

    pub fn as_ms_mut(&mut self) -> Option<&mut MsMr> {
        match self {
            Device::MsMr(ms) => Some(ms),
            _ => None,
        }
    }
}

impl ControlDevice for Device {
    fn start(&mut self, ctx: &mut Ctx<'_>) {
        match self {
            Device::Xtr(x) => x.start(ctx),
            Device::MsMr(ms) => ms.start(ctx),
            Device::Rtr(r) => r.start(ctx),
        }
    }

    fn handle_map_request(&mut self, ctx: &mut Ctx<'_>, req: MapRequest, src: SocketAddr) {
        match self {
            Device::Xtr(x) => x.handle_map_request(ctx, req, src),
            Device::MsMr(ms) => ms.handle_map_request(ctx, req, src),
            Device::Rtr(r) => r.handle_map_request(ctx, req, src),
        }
    }

    fn handle_map_reply(&mut self, ctx: &mut Ctx<'_>, reply: MapReply, src: SocketAddr) {
        match self {
            Device::Xtr(x) => x.handle_map_reply(ctx, reply, src),
            Device::MsMr(ms) => ms.handle_map_reply(ctx, reply, src),
            Device::Rtr(r) => r.handle_map_reply(ctx, reply, src),
        }
    }

    fn handle_map_register(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        reg: MapRegister,
        src: SocketAddr,
    ) {
        match self {
            Device::Xtr(x) => x.handle_map_register(ctx, raw, reg, src),
            Device::MsMr(ms) => ms.handle_map_register(ctx, raw, reg, src),
            Device::Rtr(r) => r.handle_map_register(ctx, raw, reg, src),
        }
    }

    fn handle_map_notify(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        notify: MapNotify,
        src: SocketAddr,
    ) {
        match self {
            Device::Xtr(x) => x.handle_map_notify(ctx, raw, notify, src),
            Device::MsMr(ms) => ms.handle_map_notify(ctx, raw, notify, src),
            Device::Rtr(r) => r.handle_map_notify(ctx, raw, notify, src),
        }
    }

    fn handle_info_request(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        info: InfoMessage,
        src: SocketAddr,
    ) {
        match self {
            Device::Xtr(x) => x.handle_info_request(ctx, raw, info, src),
            Device::MsMr(ms) => ms.handle_info_request(ctx, raw, info, src),
            Device::Rtr(r) => r.handle_info_request(ctx, raw, info, src),
        }
    }

    fn handle_info_reply(&mut self, ctx: &mut Ctx<'_>, info: InfoMessage, src: SocketAddr) {
        match self {
            Device::Xtr(x) => x.handle_info_reply(ctx, info, src),
            Device::MsMr(ms) => ms.handle_info_reply(ctx, info, src),
            Device::Rtr(r) => r.handle_info_reply(ctx, info, src),
        }
    }

    fn on_iface_change(&mut self, ctx: &mut Ctx<'_>, event: IfaceEvent) {
        match self {
            Device::Xtr(x) => x.on_iface_change(ctx, event),
            Device::MsMr(ms) => ms.on_iface_change(ctx, event),
            Device::Rtr(r) => r.on_iface_change(ctx, event),
        }
    }

    fn on_timer(&mut self, ctx: &mut Ctx<'_>, event: TimerEvent) {
        match self {
            Device::Xtr(x) => x.on_timer(ctx, event),
            Device::MsMr(ms) => ms.on_timer(ctx, event),
            Device::Rtr(r) => r.on_timer(ctx, event),
        }
    }
}
