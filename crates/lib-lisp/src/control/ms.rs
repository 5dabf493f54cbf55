use std::{
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use lispbuf::{WriteBuffer, Writeable};
use tracing::{debug, info, warn};

use crate::{
    auth,
    config::{Settings, Site},
    constants::{LISP_CONTROL_PORT, NEGATIVE_REPLY_TTL},
    control::{ControlDevice, Ctx},
    iface::IfaceEvent,
    ptree::PrefixIndex,
    timers::TimerEvent,
    types::{
        Address, ControlMessage, EncapControl, InfoMessage, LcafAddr, MapAction, MapNotify,
        MapRegister, MapReply, MapRequest, Mapping, MappingRecord,
    },
};

/// TTL in minutes of a negative reply for an EID inside a configured but
/// currently unregistered site. Short so the requester retries soon after
/// the ETR comes up.
const UNREGISTERED_SITE_TTL: u32 = 1;

/// One registration held by the Map-Server.
#[derive(Debug)]
struct RegEntry {
    mapping: Mapping,
    /// The registering ETR asked us to proxy-reply.
    proxy: bool,
    updated: Instant,
}

/// A configured site: the prefix an ETR may claim, its shared key and
/// the policy bits, plus whatever that ETR has registered so far.
struct LispSite {
    cfg: Site,
    registered: PrefixIndex<RegEntry>,
}

/// Map-Server / Map-Resolver: accepts authenticated registrations and
/// answers (or forwards) Map-Requests from its site table.
pub struct MsMr {
    sites: PrefixIndex<LispSite>,
    /// RTRs advertised in Info-Replies for NAT traversal.
    rtrs: Vec<IpAddr>,
    auth_failures: u64,
}

impl MsMr {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut sites = PrefixIndex::new();
        for site in &settings.sites {
            let prefix = site.prefix.clone();
            sites.insert(
                &prefix,
                LispSite {
                    cfg: site.clone(),
                    registered: PrefixIndex::new(),
                },
            );
            info!(prefix = %prefix, "site configured");
        }

        Self {
            sites,
            rtrs: settings.rtrs.clone(),
            auth_failures: 0,
        }
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures
    }

    pub fn registered_mapping(&self, eid: &Address) -> Option<&Mapping> {
        let site = self.sites.longest_prefix_match(eid)?;
        site.registered
            .longest_prefix_match(eid)
            .map(|r| &r.mapping)
    }

    fn send_negative_reply(
        &self,
        ctx: &mut Ctx<'_>,
        eid: &Address,
        ttl: u32,
        nonce: u64,
        dst: SocketAddr,
    ) {
        let reply = ControlMessage::MapReply(MapReply {
            probe: false,
            echo_nonce_capable: false,
            security: false,
            nonce,
            records: vec![MappingRecord::negative(
                eid.clone(),
                ttl,
                MapAction::NativelyForward,
            )],
        });
        if let Err(err) = ctx.send(dst, &reply) {
            warn!(%dst, %err, "failed to send negative map-reply");
        }
    }

    /// Re-encapsulate the request toward a registered ETR that will
    /// answer it itself.
    fn forward_to_etr(&self, ctx: &mut Ctx<'_>, req: &MapRequest, src: SocketAddr, etr: IpAddr) {
        let inner = {
            let mut buf = WriteBuffer::new();
            if let Err(err) = req.write(&mut buf) {
                warn!(%err, "failed to rebuild map-request for forwarding");
                return;
            }
            buf.into_bytes()
        };

        let ecm = ControlMessage::EncapControl(EncapControl {
            src: src.ip(),
            dst: etr,
            src_port: src.port(),
            dst_port: LISP_CONTROL_PORT,
            payload: inner,
        });
        let dst = SocketAddr::new(etr, LISP_CONTROL_PORT);
        if let Err(err) = ctx.send(dst, &ecm) {
            warn!(%dst, %err, "failed to forward map-request");
        } else {
            debug!(%dst, "map-request forwarded to etr");
        }
    }
}

impl ControlDevice for MsMr {
    fn start(&mut self, _ctx: &mut Ctx<'_>) {
        info!(sites = self.sites.len(), "map-server ready");
    }

    fn handle_map_request(&mut self, ctx: &mut Ctx<'_>, req: MapRequest, src: SocketAddr) {
        for eid in &req.eids {
            let Some(site) = self.sites.longest_prefix_match(eid) else {
                debug!(eid = %eid, "no site for requested EID");
                self.send_negative_reply(ctx, eid, NEGATIVE_REPLY_TTL, req.nonce, src);
                continue;
            };

            let Some(reg) = site.registered.longest_prefix_match(eid) else {
                debug!(eid = %eid, "site known but not registered");
                self.send_negative_reply(ctx, eid, UNREGISTERED_SITE_TTL, req.nonce, src);
                continue;
            };

            if site.cfg.proxy_reply || reg.proxy {
                debug!(eid = %eid, age = ?reg.updated.elapsed(), "serving registration");
                let reply = ControlMessage::MapReply(MapReply {
                    probe: req.probe,
                    echo_nonce_capable: false,
                    security: false,
                    nonce: req.nonce,
                    records: vec![MappingRecord::from_mapping(&reg.mapping)],
                });
                if let Err(err) = ctx.send(src, &reply) {
                    warn!(%src, %err, "failed to proxy-reply");
                } else {
                    debug!(eid = %eid, %src, "proxy map-reply sent");
                }
                continue;
            }

            match reg
                .mapping
                .locators()
                .iter()
                .find(|l| l.is_usable())
                .and_then(|l| l.address().ip())
            {
                Some(etr) => self.forward_to_etr(ctx, &req, src, etr),
                None => {
                    self.send_negative_reply(ctx, eid, UNREGISTERED_SITE_TTL, req.nonce, src)
                }
            }
        }
    }

    fn handle_map_reply(&mut self, _ctx: &mut Ctx<'_>, _reply: MapReply, src: SocketAddr) {
        debug!(%src, "map-server ignores map-reply");
    }

    fn handle_map_register(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        reg: MapRegister,
        src: SocketAddr,
    ) {
        let Some(first_eid) = reg.records.first().map(|r| r.eid.clone()) else {
            debug!(%src, "empty map-register dropped");
            return;
        };

        // One key authenticates the whole message: the key of the site
        // the first record belongs to.
        let Some(key) = self
            .sites
            .longest_prefix_match(&first_eid)
            .map(|s| s.cfg.key.clone())
        else {
            debug!(%src, eid = %first_eid, "map-register for unknown site dropped");
            return;
        };

        if let Err(err) = auth::verify(&key, raw, reg.key_id, reg.auth_data.len()) {
            self.auth_failures += 1;
            warn!(%src, %err, failures = self.auth_failures, "map-register failed authentication");
            return;
        }

        for record in &reg.records {
            let eid = record.eid.clone();
            let Some(site) = self.sites.longest_prefix_match_mut(&eid) else {
                debug!(eid = %eid, "record outside any site skipped");
                continue;
            };

            let exact = site.cfg.prefix == eid;
            if !exact && !site.cfg.accept_more_specifics {
                warn!(eid = %eid, site = %site.cfg.prefix, "more-specific registration refused");
                continue;
            }

            let incoming = record.to_mapping();
            match site.registered.exact_lookup_mut(&eid) {
                Some(existing) if site.cfg.merge_registrations => {
                    // Union of locator sets across registering ETRs.
                    for loc in incoming.locators().iter() {
                        let _ = existing.mapping.add_locator(loc.clone());
                    }
                    existing.proxy = existing.proxy || reg.proxy_reply;
                    existing.updated = Instant::now();
                    existing.mapping.touch();
                }
                _ => {
                    site.registered.insert(
                        &eid,
                        RegEntry {
                            mapping: incoming,
                            proxy: reg.proxy_reply,
                            updated: Instant::now(),
                        },
                    );
                }
            }
            info!(eid = %eid, %src, "registration accepted");
        }

        if reg.want_notify {
            let notify = ControlMessage::MapNotify(MapNotify {
                nonce: reg.nonce,
                key_id: auth::KEY_ID_HMAC_SHA1_96,
                auth_data: vec![0; auth::AUTH_DATA_LEN],
                records: reg.records.clone(),
            });
            if let Err(err) = ctx.send_signed(src, &notify, &key) {
                warn!(%src, %err, "failed to send map-notify");
            } else {
                debug!(%src, nonce = reg.nonce, "map-notify sent");
            }
        }
    }

    fn handle_map_notify(
        &mut self,
        _ctx: &mut Ctx<'_>,
        _raw: &[u8],
        _notify: MapNotify,
        src: SocketAddr,
    ) {
        debug!(%src, "map-server ignores map-notify");
    }

    fn handle_info_request(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        info: InfoMessage,
        src: SocketAddr,
    ) {
        let Some(key) = self
            .sites
            .longest_prefix_match(&info.eid)
            .map(|s| s.cfg.key.clone())
        else {
            debug!(%src, eid = %info.eid, "info-request for unknown site dropped");
            return;
        };

        if let Err(err) = auth::verify(&key, raw, info.key_id, info.auth_data.len()) {
            self.auth_failures += 1;
            warn!(%src, %err, "info-request failed authentication");
            return;
        }

        let reply = ControlMessage::Info(InfoMessage {
            nonce: info.nonce,
            key_id: auth::KEY_ID_HMAC_SHA1_96,
            auth_data: vec![0; auth::AUTH_DATA_LEN],
            ttl: info.ttl,
            eid: info.eid.clone(),
            nat: Some(LcafAddr::NatTraversal {
                ms_udp_port: LISP_CONTROL_PORT,
                etr_udp_port: src.port(),
                global_etr_rloc: Box::new(Address::Ip(src.ip())),
                ms_rloc: Box::new(Address::NoAddr),
                private_etr_rloc: Box::new(Address::NoAddr),
                rtr_rlocs: self.rtrs.iter().map(|ip| Address::Ip(*ip)).collect(),
            }),
        });
        if let Err(err) = ctx.send_signed(src, &reply, &key) {
            warn!(%src, %err, "failed to send info-reply");
        } else {
            debug!(%src, "info-reply sent");
        }
    }

    fn handle_info_reply(&mut self, _ctx: &mut Ctx<'_>, _info: InfoMessage, src: SocketAddr) {
        debug!(%src, "map-server ignores info-reply");
    }

    fn on_iface_change(&mut self, _ctx: &mut Ctx<'_>, event: IfaceEvent) {
        debug!(iface = %event.iface, "map-server has no interface-bound locators");
    }

    fn on_timer(&mut self, _ctx: &mut Ctx<'_>, _event: TimerEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Site;

    fn settings_with_site(proxy_reply: bool) -> Settings {
        Settings {
            role: crate::config::DeviceRole::Ms,
            ipc_socket: "/tmp/test.sock".into(),
            bind_v4: true,
            bind_v6: false,
            probing: crate::config::ProbingParams {
                interval: 0,
                retries: 0,
                retry_interval: 1,
            },
            map_servers: vec![],
            map_resolvers: vec![],
            mappings: vec![],
            static_cache: vec![],
            petrs: vec![],
            sites: vec![Site {
                prefix: "203.0.113.0/24".parse().unwrap(),
                key: "s".into(),
                accept_more_specifics: false,
                proxy_reply,
                merge_registrations: false,
            }],
            rtr_ifaces: vec![],
            nat_traversal: false,
            rtrs: vec![],
        }
    }

    #[test]
    fn unknown_site_lookup_is_none() {
        let ms = MsMr::from_settings(&settings_with_site(true));
        assert!(ms
            .registered_mapping(&"198.51.100.1".parse().unwrap())
            .is_none());
    }
}
