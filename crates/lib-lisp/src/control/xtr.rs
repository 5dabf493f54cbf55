use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, SocketAddr},
};

use lispbuf::{WriteBuffer, Writeable};
use tracing::{debug, info, warn};

use crate::{
    auth,
    config::{MapServer, ProbingParams, Settings},
    constants::{
        DEFAULT_MAPPING_TTL, DEFAULT_RETRIES, DEFAULT_RETRY_INTERVAL, LISP_CONTROL_PORT,
        MAP_REGISTER_INTERVAL, NEGATIVE_REPLY_TTL, SMR_HOLDOFF,
    },
    control::{ControlDevice, Ctx, PendingKind},
    iface::IfaceEvent,
    local_db::LocalDb,
    map_cache::{MapCache, ProbeState},
    timers::TimerEvent,
    types::{
        Address, ControlMessage, EncapControl, InfoMessage, LcafAddr, Locator, LocatorState,
        MapAction, MapNotify, MapRegister, MapReply, MapRequest, MappingRecord, Mapping,
    },
};

/// Ingress/egress tunnel router: registers its EID-prefixes, resolves
/// remote ones, probes cached locators and keeps peers honest with SMRs.
/// A Mobile Node is an xTR whose database holds one host-width EID.
pub struct Xtr {
    local_db: LocalDb,
    map_cache: MapCache,
    map_servers: Vec<MapServer>,
    map_resolvers: Vec<IpAddr>,
    next_resolver: usize,
    /// Proxy-ETRs as a wildcard mapping, the last-resort egress.
    petrs: Mapping,
    probing: ProbingParams,
    nat_traversal: bool,
    /// RTRs learned from Info-Replies.
    rtrs: Vec<IpAddr>,
    /// Cache entries to preload once the reactor is live.
    static_seed: Vec<Mapping>,
    /// Peers that asked for each of our EIDs, the SMR audience.
    requesters: HashMap<Address, HashSet<IpAddr>>,
    /// (EID, peer) pairs currently inside the SMR holdoff window.
    smr_gate: HashSet<(Address, IpAddr)>,
    auth_failures: u64,
}

impl Xtr {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut local_db = LocalDb::new();
        for db_mapping in &settings.mappings {
            let mut mapping = Mapping::new(db_mapping.eid.clone(), DEFAULT_MAPPING_TTL);
            for rloc in &db_mapping.rlocs {
                if let Err(err) = mapping.add_locator(Locator::local(
                    rloc.addr.clone(),
                    LocatorState::Up,
                    rloc.priority,
                    rloc.weight,
                    None,
                )) {
                    warn!(%err, "skipping database locator");
                    continue;
                }
                if let Some(iface) = &db_mapping.iface {
                    local_db.bind_iface(iface, db_mapping.eid.clone(), rloc.addr.clone());
                }
            }
            local_db.add_mapping(mapping);
        }

        let mut petrs = Mapping::new("0.0.0.0/0".parse().unwrap_or(Address::NoAddr), 0);
        for petr in &settings.petrs {
            if let Err(err) =
                petrs.add_locator(Locator::petr(petr.addr.clone(), petr.priority, petr.weight))
            {
                warn!(%err, "skipping proxy-etr");
            }
        }

        let static_seed = settings
            .static_cache
            .iter()
            .map(|cfg| {
                let mut mapping = Mapping::new(cfg.eid.clone(), DEFAULT_MAPPING_TTL);
                for rloc in &cfg.rlocs {
                    let _ = mapping.add_locator(Locator::remote(
                        rloc.addr.clone(),
                        LocatorState::Up,
                        rloc.priority,
                        rloc.weight,
                    ));
                }
                mapping
            })
            .collect();

        Self {
            local_db,
            map_cache: MapCache::new(),
            map_servers: settings.map_servers.clone(),
            map_resolvers: settings.map_resolvers.clone(),
            next_resolver: 0,
            petrs,
            probing: settings.probing,
            nat_traversal: settings.nat_traversal,
            rtrs: Vec::new(),
            static_seed,
            requesters: HashMap::new(),
            smr_gate: HashSet::new(),
            auth_failures: 0,
        }
    }

    pub fn local_db(&self) -> &LocalDb {
        &self.local_db
    }

    pub fn local_db_mut(&mut self) -> &mut LocalDb {
        &mut self.local_db
    }

    pub fn map_cache(&self) -> &MapCache {
        &self.map_cache
    }

    pub fn map_cache_mut(&mut self) -> &mut MapCache {
        &mut self.map_cache
    }

    pub fn petrs(&self) -> &Mapping {
        &self.petrs
    }

    pub fn rtrs(&self) -> &[IpAddr] {
        &self.rtrs
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures
    }

    /// The local RLOC addresses a Map-Request advertises as reply
    /// targets.
    fn local_rlocs(&self) -> Vec<Address> {
        let mut rlocs: Vec<Address> = Vec::new();
        for mapping in self.local_db.mappings() {
            for loc in mapping.locators().iter() {
                if loc.is_local() && !rlocs.contains(loc.address()) {
                    rlocs.push(loc.address().clone());
                }
            }
        }
        rlocs
    }

    fn source_eid(&self) -> Address {
        self.local_db
            .mappings()
            .first()
            .and_then(|m| m.eid().ip())
            .map(Address::Ip)
            .unwrap_or(Address::NoAddr)
    }

    fn build_register(&self, ms: &MapServer, nonce: u64) -> MapRegister {
        MapRegister {
            proxy_reply: ms.proxy_reply,
            want_notify: true,
            nonce,
            key_id: auth::KEY_ID_HMAC_SHA1_96,
            auth_data: vec![0; auth::AUTH_DATA_LEN],
            records: self
                .local_db
                .mappings()
                .into_iter()
                .map(MappingRecord::from_mapping)
                .collect(),
        }
    }

    pub fn map_servers(&self) -> &[MapServer] {
        &self.map_servers
    }

    /// Add a Map-Server at runtime; duplicates are ignored the same way
    /// the loader drops them.
    pub fn add_map_server(&mut self, ms: MapServer) -> bool {
        if self.map_servers.iter().any(|m| m.addr == ms.addr) {
            return false;
        }
        self.map_servers.push(ms);
        true
    }

    pub fn remove_map_server(&mut self, addr: IpAddr) -> bool {
        let before = self.map_servers.len();
        self.map_servers.retain(|m| m.addr != addr);
        self.map_servers.len() != before
    }

    pub fn add_petr(&mut self, locator: Locator) -> bool {
        self.petrs.add_locator(locator).is_ok()
    }

    pub fn remove_petr(&mut self, addr: &Address) -> bool {
        self.petrs.locators_mut().remove(addr).is_ok()
    }

    /// Register every authoritative mapping with every Map-Server, each
    /// under a fresh nonce with a bounded retransmission budget.
    pub(crate) fn send_registers(&mut self, ctx: &mut Ctx<'_>) {
        if self.local_db.is_empty() {
            return;
        }

        for ms in self.map_servers.clone() {
            let nonce = ctx.nonces.issue(
                Address::Ip(ms.addr),
                DEFAULT_RETRIES,
                PendingKind::Register { ms: ms.addr },
            );
            self.send_register(ctx, &ms, nonce);
            ctx.wheel
                .start(DEFAULT_RETRY_INTERVAL, TimerEvent::RequestRetry { nonce });
        }
    }

    fn send_register(&mut self, ctx: &mut Ctx<'_>, ms: &MapServer, nonce: u64) {
        let msg = ControlMessage::MapRegister(self.build_register(ms, nonce));
        let dst = SocketAddr::new(ms.addr, LISP_CONTROL_PORT);
        if let Err(err) = ctx.send_signed(dst, &msg, &ms.key) {
            warn!(%dst, %err, "failed to build map-register");
            return;
        }
        debug!(%dst, nonce, "map-register sent");
    }

    fn build_request(&self, eid: &Address, nonce: u64, smr_invoked: bool, probe: bool) -> MapRequest {
        let mut req = MapRequest::new(self.source_eid(), self.local_rlocs(), eid.clone(), nonce);
        req.smr_invoked = smr_invoked;
        req.probe = probe;
        req
    }

    /// Start resolving `eid` through the next Map-Resolver, leaving an
    /// inactive placeholder behind.
    pub fn resolve(&mut self, ctx: &mut Ctx<'_>, eid: &Address, smr_invoked: bool) {
        if self.map_resolvers.is_empty() {
            warn!(eid = %eid, "cannot resolve: no map-resolver configured");
            return;
        }
        if self.local_rlocs().is_empty() {
            warn!(eid = %eid, "cannot resolve: no local RLOC to reply to");
            return;
        }

        let resolver = self.map_resolvers[self.next_resolver % self.map_resolvers.len()];
        self.next_resolver = (self.next_resolver + 1) % self.map_resolvers.len();

        let nonce = ctx.nonces.issue(
            Address::Ip(resolver),
            DEFAULT_RETRIES,
            PendingKind::Resolution {
                eid: eid.clone(),
                smr_invoked,
            },
        );
        self.map_cache.add_placeholder(eid.clone(), nonce);
        self.send_encap_request(ctx, resolver, eid, nonce, smr_invoked);
        ctx.wheel
            .start(DEFAULT_RETRY_INTERVAL, TimerEvent::RequestRetry { nonce });
        info!(eid = %eid, %resolver, "map-request issued");
    }

    /// Map-Requests travel to the resolver wrapped in an ECM whose inner
    /// headers name the EID, so the mapping system can route them.
    fn send_encap_request(
        &mut self,
        ctx: &mut Ctx<'_>,
        resolver: IpAddr,
        eid: &Address,
        nonce: u64,
        smr_invoked: bool,
    ) {
        let req = self.build_request(eid, nonce, smr_invoked, false);

        let Some(eid_ip) = eid.ip() else {
            warn!(eid = %eid, "cannot request a non-IP-bearing EID");
            return;
        };
        let src_ip = req
            .itr_rlocs
            .iter()
            .find_map(Address::ip)
            .unwrap_or(eid_ip);

        let inner = {
            let mut buf = WriteBuffer::new();
            if let Err(err) = req.write(&mut buf) {
                warn!(%err, "failed to build map-request");
                return;
            }
            buf.into_bytes()
        };

        let ecm = ControlMessage::EncapControl(EncapControl {
            src: src_ip,
            dst: eid_ip,
            src_port: LISP_CONTROL_PORT,
            dst_port: LISP_CONTROL_PORT,
            payload: inner,
        });

        let dst = SocketAddr::new(resolver, LISP_CONTROL_PORT);
        if let Err(err) = ctx.send(dst, &ecm) {
            warn!(%dst, %err, "failed to send encapsulated map-request");
        }
    }

    /// Probe one locator of a cached mapping: a Map-Request with the
    /// probe bit, sent directly to the RLOC.
    fn send_probe(&mut self, ctx: &mut Ctx<'_>, eid: &Address, rloc: &Address) {
        let Some(rloc_ip) = rloc.ip() else {
            return;
        };

        let nonce = ctx.nonces.issue(
            rloc.clone(),
            self.probing.retries,
            PendingKind::Probe {
                eid: eid.clone(),
                rloc: rloc.clone(),
            },
        );

        let req = self.build_request(eid, nonce, false, true);
        let dst = SocketAddr::new(rloc_ip, LISP_CONTROL_PORT);
        if let Err(err) = ctx.send(dst, &ControlMessage::MapRequest(req)) {
            warn!(%dst, %err, "failed to send rloc-probe");
            return;
        }

        if let Some(entry) = self.map_cache.exact_mut(eid) {
            entry.set_probe_state(rloc, ProbeState::Probing { nonce });
        }
        ctx.wheel.start(
            self.probing.retry_interval,
            TimerEvent::RequestRetry { nonce },
        );
        debug!(eid = %eid, rloc = %rloc, "rloc-probe sent");
    }

    /// Arm the per-locator probe cycle of a cache entry.
    fn schedule_probes(&mut self, ctx: &mut Ctx<'_>, eid: &Address) {
        if self.probing.interval == 0 {
            return;
        }
        let Some(entry) = self.map_cache.exact_mut(eid) else {
            return;
        };

        let rlocs: Vec<Address> = entry
            .mapping()
            .locators()
            .iter()
            .map(|l| l.address().clone())
            .collect();
        for rloc in rlocs {
            let timer = ctx.wheel.start(
                self.probing.interval,
                TimerEvent::RlocProbe {
                    eid: eid.clone(),
                    rloc: rloc.clone(),
                },
            );
            entry.set_probe_timer(&rloc, timer, ctx.wheel);
        }
    }

    /// Solicit a fresh Map-Request from every peer caching `eid`, at most
    /// one per peer per holdoff window.
    fn smr_peers(&mut self, ctx: &mut Ctx<'_>, eid: &Address) {
        let Some(peers) = self.requesters.get(eid).cloned() else {
            return;
        };

        for peer in peers {
            if self.smr_gate.contains(&(eid.clone(), peer)) {
                continue;
            }

            let nonce: u64 = rand::random();
            let mut req = self.build_request(eid, nonce, false, false);
            req.smr = true;

            let dst = SocketAddr::new(peer, LISP_CONTROL_PORT);
            if let Err(err) = ctx.send(dst, &ControlMessage::MapRequest(req)) {
                warn!(%dst, %err, "failed to send smr");
                continue;
            }

            self.smr_gate.insert((eid.clone(), peer));
            ctx.wheel.start(
                SMR_HOLDOFF,
                TimerEvent::SmrGateClear {
                    eid: eid.clone(),
                    peer: Address::Ip(peer),
                },
            );
            info!(eid = %eid, %peer, "smr sent");
        }
    }

    /// Answer a request for one of our own EIDs (forwarded by the
    /// Map-Server, or a probe straight from a peer).
    fn reply_from_db(&mut self, ctx: &mut Ctx<'_>, req: &MapRequest, src: SocketAddr) {
        let mut records = Vec::new();
        for eid in &req.eids {
            match self.local_db.lookup(eid) {
                Some(entry) => records.push(MappingRecord::from_mapping(entry.mapping())),
                None => records.push(MappingRecord::negative(
                    eid.clone(),
                    NEGATIVE_REPLY_TTL,
                    MapAction::NativelyForward,
                )),
            }

            if !req.probe {
                for itr in &req.itr_rlocs {
                    if let Some(ip) = itr.ip() {
                        self.requesters.entry(eid.clone()).or_default().insert(ip);
                    }
                }
            }
        }

        let reply = ControlMessage::MapReply(MapReply {
            probe: req.probe,
            echo_nonce_capable: false,
            security: false,
            nonce: req.nonce,
            records,
        });
        if let Err(err) = ctx.send(src, &reply) {
            warn!(%src, %err, "failed to send map-reply");
        }
    }

    fn apply_resolution(&mut self, ctx: &mut Ctx<'_>, reply: &MapReply, smr_invoked: bool) {
        if reply.records.is_empty() {
            debug!(nonce = reply.nonce, "empty map-reply");
            return;
        }

        for record in &reply.records {
            let mapping = record.to_mapping();
            let eid = mapping.eid().clone();
            self.map_cache.activate(mapping, ctx.wheel);
            if smr_invoked {
                if let Some(entry) = self.map_cache.exact_mut(&eid) {
                    entry.set_smr_inflight(false);
                }
            }
            self.schedule_probes(ctx, &eid);
        }
    }

    fn apply_probe_reply(&mut self, ctx: &mut Ctx<'_>, eid: &Address, rloc: &Address) {
        if let Some(entry) = self.map_cache.exact_mut(eid) {
            entry.set_probe_state(rloc, ProbeState::Idle);
            entry.set_locator_state(rloc, LocatorState::Up);
            debug!(eid = %eid, rloc = %rloc, "rloc-probe answered, locator up");
        }
        if self.probing.interval > 0 {
            let timer = ctx.wheel.start(
                self.probing.interval,
                TimerEvent::RlocProbe {
                    eid: eid.clone(),
                    rloc: rloc.clone(),
                },
            );
            if let Some(entry) = self.map_cache.exact_mut(eid) {
                entry.set_probe_timer(rloc, timer, ctx.wheel);
            }
        }
    }

    fn probe_timed_out(&mut self, ctx: &mut Ctx<'_>, eid: &Address, rloc: &Address) {
        if let Some(entry) = self.map_cache.exact_mut(eid) {
            entry.set_probe_state(rloc, ProbeState::Idle);
            entry.set_locator_state(rloc, LocatorState::Down);
            warn!(eid = %eid, rloc = %rloc, "rloc-probe exhausted, locator down");
        }
        // Keep probing a down locator so it can come back.
        if self.probing.interval > 0 {
            let timer = ctx.wheel.start(
                self.probing.interval,
                TimerEvent::RlocProbe {
                    eid: eid.clone(),
                    rloc: rloc.clone(),
                },
            );
            if let Some(entry) = self.map_cache.exact_mut(eid) {
                entry.set_probe_timer(rloc, timer, ctx.wheel);
            }
        }
    }

    fn send_info_requests(&mut self, ctx: &mut Ctx<'_>) {
        let Some(eid) = self.local_db.mappings().first().map(|m| m.eid().clone()) else {
            return;
        };

        for ms in self.map_servers.clone() {
            let nonce = ctx.nonces.issue(
                Address::Ip(ms.addr),
                DEFAULT_RETRIES,
                PendingKind::Info { ms: ms.addr },
            );
            let msg = ControlMessage::Info(InfoMessage {
                nonce,
                key_id: auth::KEY_ID_HMAC_SHA1_96,
                auth_data: vec![0; auth::AUTH_DATA_LEN],
                ttl: MAP_REGISTER_INTERVAL as u32,
                eid: eid.clone(),
                nat: None,
            });
            let dst = SocketAddr::new(ms.addr, LISP_CONTROL_PORT);
            if let Err(err) = ctx.send_signed(dst, &msg, &ms.key) {
                warn!(%dst, %err, "failed to send info-request");
                continue;
            }
            ctx.wheel
                .start(DEFAULT_RETRY_INTERVAL, TimerEvent::RequestRetry { nonce });
        }
    }

    fn retry_request(&mut self, ctx: &mut Ctx<'_>, nonce: u64) {
        let Some((kind, target)) = ctx
            .nonces
            .get(nonce)
            .map(|req| (req.kind.clone(), req.target.clone()))
        else {
            // Resolved in the meantime; the stale retry timer is noise.
            return;
        };

        let budget_left = ctx.nonces.retry(nonce).is_some();

        match (budget_left, kind) {
            (true, PendingKind::Register { ms }) => {
                if let Some(ms_cfg) = self.map_servers.iter().find(|m| m.addr == ms).cloned() {
                    self.send_register(ctx, &ms_cfg, nonce);
                }
                ctx.wheel
                    .start(DEFAULT_RETRY_INTERVAL, TimerEvent::RequestRetry { nonce });
            }
            (false, PendingKind::Register { ms }) => {
                ctx.nonces.expire(nonce);
                warn!(%ms, "map-register unacknowledged; periodic cycle will retry");
            }
            (true, PendingKind::Resolution { eid, smr_invoked }) => {
                if let Some(resolver) = target.ip() {
                    self.send_encap_request(ctx, resolver, &eid, nonce, smr_invoked);
                }
                ctx.wheel
                    .start(DEFAULT_RETRY_INTERVAL, TimerEvent::RequestRetry { nonce });
            }
            (false, PendingKind::Resolution { eid, .. }) => {
                ctx.nonces.expire(nonce);
                // Drop the placeholder; the next miss will try again.
                let inactive = self
                    .map_cache
                    .exact(&eid)
                    .map(|e| !e.is_active())
                    .unwrap_or(false);
                if inactive {
                    self.map_cache.remove(&eid, ctx.wheel);
                    warn!(eid = %eid, "map-request timed out, placeholder dropped");
                }
            }
            (true, PendingKind::Probe { eid, rloc }) => {
                let req = self.build_request(&eid, nonce, false, true);
                if let Some(ip) = rloc.ip() {
                    let dst = SocketAddr::new(ip, LISP_CONTROL_PORT);
                    if let Err(err) = ctx.send(dst, &ControlMessage::MapRequest(req)) {
                        warn!(%dst, %err, "failed to resend rloc-probe");
                    }
                }
                ctx.wheel.start(
                    self.probing.retry_interval,
                    TimerEvent::RequestRetry { nonce },
                );
            }
            (false, PendingKind::Probe { eid, rloc }) => {
                ctx.nonces.expire(nonce);
                self.probe_timed_out(ctx, &eid, &rloc);
            }
            (true, PendingKind::Info { ms }) => {
                if let Some(ms_cfg) = self.map_servers.iter().find(|m| m.addr == ms).cloned() {
                    let Some(eid) = self.local_db.mappings().first().map(|m| m.eid().clone())
                    else {
                        return;
                    };
                    let msg = ControlMessage::Info(InfoMessage {
                        nonce,
                        key_id: auth::KEY_ID_HMAC_SHA1_96,
                        auth_data: vec![0; auth::AUTH_DATA_LEN],
                        ttl: MAP_REGISTER_INTERVAL as u32,
                        eid,
                        nat: None,
                    });
                    let dst = SocketAddr::new(ms, LISP_CONTROL_PORT);
                    if let Err(err) = ctx.send_signed(dst, &msg, &ms_cfg.key) {
                        warn!(%dst, %err, "failed to resend info-request");
                    }
                }
                ctx.wheel
                    .start(DEFAULT_RETRY_INTERVAL, TimerEvent::RequestRetry { nonce });
            }
            (false, PendingKind::Info { ms }) => {
                ctx.nonces.expire(nonce);
                warn!(%ms, "info-request unanswered");
            }
        }
    }
}

impl ControlDevice for Xtr {
    fn start(&mut self, ctx: &mut Ctx<'_>) {
        for mapping in std::mem::take(&mut self.static_seed) {
            let eid = mapping.eid().clone();
            self.map_cache.install(mapping, ctx.wheel);
            self.schedule_probes(ctx, &eid);
        }

        self.send_registers(ctx);
        ctx.wheel
            .start(MAP_REGISTER_INTERVAL, TimerEvent::PeriodicMapRegister);

        if self.nat_traversal {
            self.send_info_requests(ctx);
        }
    }

    fn handle_map_request(&mut self, ctx: &mut Ctx<'_>, req: MapRequest, src: SocketAddr) {
        if req.smr {
            // Our cached binding for these EIDs is stale; re-request
            // through the mapping system, one in-flight per EID.
            for eid in &req.eids {
                let eid = eid.clone().into_prefix().normalize();
                let gated = self
                    .map_cache
                    .exact(&eid)
                    .map(|e| e.smr_inflight())
                    .unwrap_or(false);
                if gated {
                    continue;
                }
                self.resolve(ctx, &eid, true);
                if let Some(entry) = self.map_cache.exact_mut(&eid) {
                    entry.set_smr_inflight(true);
                }
            }
            return;
        }

        self.reply_from_db(ctx, &req, src);
    }

    fn handle_map_reply(&mut self, ctx: &mut Ctx<'_>, reply: MapReply, src: SocketAddr) {
        let Some(pending) = ctx.nonces.resolve(reply.nonce) else {
            debug!(%src, nonce = reply.nonce, "map-reply with unknown nonce dropped");
            return;
        };

        match pending.kind {
            PendingKind::Resolution { smr_invoked, .. } => {
                self.apply_resolution(ctx, &reply, smr_invoked)
            }
            PendingKind::Probe { eid, rloc } => self.apply_probe_reply(ctx, &eid, &rloc),
            other => {
                warn!(?other, "map-reply answered a non-request nonce");
            }
        }
    }

    fn handle_map_register(&mut self, _ctx: &mut Ctx<'_>, _raw: &[u8], _reg: MapRegister, src: SocketAddr) {
        debug!(%src, "xtr ignores map-register");
    }

    fn handle_map_notify(
        &mut self,
        ctx: &mut Ctx<'_>,
        raw: &[u8],
        notify: MapNotify,
        src: SocketAddr,
    ) {
        let Some(ms) = self.map_servers.iter().find(|m| m.addr == src.ip()) else {
            debug!(%src, "map-notify from unknown map-server dropped");
            return;
        };

        if let Err(err) = auth::verify(&ms.key, raw, notify.key_id, notify.auth_data.len()) {
            self.auth_failures += 1;
            warn!(%src, %err, failures = self.auth_failures, "map-notify failed authentication");
            return;
        }

        if ctx.nonces.resolve(notify.nonce).is_some() {
            debug!(%src, nonce = notify.nonce, "registration acknowledged");
        } else {
            debug!(%src, nonce = notify.nonce, "map-notify with unknown nonce dropped");
        }
    }

    fn handle_info_request(&mut self, _ctx: &mut Ctx<'_>, _raw: &[u8], _info: InfoMessage, src: SocketAddr) {
        debug!(%src, "xtr ignores info-request");
    }

    fn handle_info_reply(&mut self, ctx: &mut Ctx<'_>, info: InfoMessage, src: SocketAddr) {
        let Some(pending) = ctx.nonces.resolve(info.nonce) else {
            debug!(%src, nonce = info.nonce, "info-reply with unknown nonce dropped");
            return;
        };
        let PendingKind::Info { ms } = pending.kind else {
            warn!(%src, "info-reply answered a non-info nonce");
            return;
        };

        if let Some(LcafAddr::NatTraversal { rtr_rlocs, .. }) = info.nat {
            self.rtrs = rtr_rlocs.iter().filter_map(Address::ip).collect();
            info!(%ms, rtrs = self.rtrs.len(), "nat-traversal info received");
        }
    }

    fn on_iface_change(&mut self, ctx: &mut Ctx<'_>, event: IfaceEvent) {
        let affected = self.local_db.apply_iface_event(&event);
        if affected.is_empty() {
            return;
        }

        info!(iface = %event.iface, mappings = affected.len(), "interface change applied");
        self.send_registers(ctx);
        for eid in affected {
            self.smr_peers(ctx, &eid);
        }
    }

    fn on_timer(&mut self, ctx: &mut Ctx<'_>, event: TimerEvent) {
        match event {
            TimerEvent::PeriodicMapRegister => {
                self.send_registers(ctx);
                ctx.wheel
                    .start(MAP_REGISTER_INTERVAL, TimerEvent::PeriodicMapRegister);
            }
            TimerEvent::RequestRetry { nonce } => self.retry_request(ctx, nonce),
            TimerEvent::CacheExpiry { eid } => self.map_cache.expire(&eid, ctx.wheel),
            TimerEvent::RlocProbe { eid, rloc } => {
                let due = matches!(
                    self.map_cache
                        .exact(&eid)
                        .map(|e| (e.is_active(), e.probe_state(&rloc))),
                    Some((true, ProbeState::Idle))
                );
                if due && self.probing.interval > 0 {
                    self.send_probe(ctx, &eid, &rloc);
                }
            }
            TimerEvent::SmrGateClear { eid, peer } => {
                if let Some(ip) = peer.ip() {
                    self.smr_gate.remove(&(eid, ip));
                }
            }
            TimerEvent::ResendQueued => {}
        }
    }
}
