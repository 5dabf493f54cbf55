use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tracing::{info, warn};

use crate::{
    config::Settings,
    constants::DEFAULT_MAPPING_TTL,
    control::{ControlDevice, Ctx, Xtr},
    iface::IfaceEvent,
    timers::TimerEvent,
    types::{
        Address, InfoMessage, Locator, LocatorState, MapNotify, MapRegister, MapReply, MapRequest,
        Mapping,
    },
};

/// Re-encapsulating tunnel router. Control-plane-wise an RTR is an xTR
/// whose database anchors every configured interface RLOC under the
/// wildcard EID of each family, so it registers, answers probes and keeps
/// a cache like any other tunnel router while the data plane re-wraps
/// traffic for NATed sites.
pub struct Rtr {
    base: Xtr,
}

impl Rtr {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut base = Xtr::from_settings(settings);

        let mut v4 = Mapping::new(wildcard_v4(), DEFAULT_MAPPING_TTL);
        let mut v6 = Mapping::new(wildcard_v6(), DEFAULT_MAPPING_TTL);
        let mut have_v4 = false;
        let mut have_v6 = false;

        for rtr_iface in &settings.rtr_ifaces {
            let is_v4 = matches!(rtr_iface.addr.ip(), Some(ip) if ip.is_ipv4());
            let locator = Locator::local(
                rtr_iface.addr.clone(),
                LocatorState::Up,
                rtr_iface.priority,
                rtr_iface.weight,
                None,
            );

            let (mapping, have) = if is_v4 {
                (&mut v4, &mut have_v4)
            } else {
                (&mut v6, &mut have_v6)
            };
            match mapping.add_locator(locator) {
                Ok(()) => {
                    *have = true;
                    base.local_db_mut().bind_iface(
                        &rtr_iface.iface,
                        mapping.eid().clone(),
                        rtr_iface.addr.clone(),
                    );
                }
                Err(err) => warn!(%err, iface = %rtr_iface.iface, "skipping rtr locator"),
            }
        }

        if have_v4 {
            info!(rlocs = v4.locators().len(), "rtr wildcard v4 mapping");
            base.local_db_mut().add_mapping(v4);
        }
        if have_v6 {
            info!(rlocs = v6.locators().len(), "rtr wildcard v6 mapping");
            base.local_db_mut().add_mapping(v6);
        }

        Self { base }
    }

    pub fn base(&self) -> &Xtr {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Xtr {
        &mut self.base
    }
}

fn wildcard_v4() -> Address {
    Address::IpPrefix(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

fn wildcard_v6() -> Address {
    Address::IpPrefix(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
}

impl ControlDevice for Rtr {
    fn start(&mut self, ctx: &mut Ctx<'_>) {
        self.base.start(ctx);
    }

    fn handle_map_request(&mut self, ctx: &mut Ctx<'_>, req: MapRequest, src: SocketAddr) {
        self.base.handle_map_request(ctx, req, src);
    }

    fn handle_map_reply(&mut self, ctx: &mut Ctx<'_>, reply: MapReply, src: SocketAddr) {
        self.base.handle_map_reply(ctx, reply, src);
    }

    fn handle_map_register(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        reg: MapRegister,
        src: SocketAddr,
    ) {
        self.base.handle_map_register(ctx, raw, reg, src);
    }

    fn handle_map_notify(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        notify: MapNotify,
        src: SocketAddr,
    ) {
        self.base.handle_map_notify(ctx, raw, notify, src);
    }

    fn handle_info_request(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        info: InfoMessage,
        src: SocketAddr,
    ) {
        self.base.handle_info_request(ctx, raw, info, src);
    }

    fn handle_info_reply(&mut self, ctx: &mut Ctx<'_>, info: InfoMessage, src: SocketAddr) {
        self.base.handle_info_reply(ctx, info, src);
    }

    fn on_iface_change(&mut self, ctx: &mut Ctx<'_>, event: IfaceEvent) {
        self.base.on_iface_change(ctx, event);
    }

    fn on_timer(&mut self, ctx: &mut Ctx<'_>, event: TimerEvent) {
        self.base.on_timer(ctx, event);
    }
}
