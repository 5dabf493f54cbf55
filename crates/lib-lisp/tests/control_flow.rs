//! End-to-end control-plane exchanges: an xTR and a Map-Server wired
//! together through their serialized messages, no sockets involved.

use std::collections::VecDeque;
use std::net::SocketAddr;

use lispbuf::{ReadBuffer, Readable, WriteBuffer, Writeable};
use lisp::{
    auth, dispatch,
    types::{
        Address, ControlMessage, Locator, LocatorState, MapAction, MapRegister, MapReply,
        MapRequest, Mapping, MappingRecord,
    },
    ControlDevice, Ctx, DeviceRole, IfaceEvent, IfaceStatus, MapServer, MsMr, NonceTable,
    OutPacket, PendingKind, ProbingParams, Settings, Site, TimerEvent, TimerWheel, Xtr,
};

struct Loop {
    wheel: TimerWheel<TimerEvent>,
    nonces: NonceTable<PendingKind>,
    out: VecDeque<OutPacket>,
}

impl Loop {
    fn new() -> Self {
        Self {
            wheel: TimerWheel::new(),
            nonces: NonceTable::new(),
            out: VecDeque::new(),
        }
    }

    fn ctx(&mut self) -> Ctx<'_> {
        Ctx {
            wheel: &mut self.wheel,
            nonces: &mut self.nonces,
            out: &mut self.out,
        }
    }

    /// Advance the wheel one second and feed the due events to `device`.
    fn tick<D: ControlDevice>(&mut self, device: &mut D) {
        for event in self.wheel.tick() {
            let mut ctx = Ctx {
                wheel: &mut self.wheel,
                nonces: &mut self.nonces,
                out: &mut self.out,
            };
            device.on_timer(&mut ctx, event);
        }
    }

    fn drain(&mut self) -> Vec<OutPacket> {
        self.out.drain(..).collect()
    }
}

fn base_settings(role: DeviceRole) -> Settings {
    Settings {
        role,
        ipc_socket: "/tmp/ovr-test.sock".into(),
        bind_v4: true,
        bind_v6: false,
        probing: ProbingParams {
            interval: 0,
            retries: 0,
            retry_interval: 1,
        },
        map_servers: vec![],
        map_resolvers: vec![],
        mappings: vec![],
        static_cache: vec![],
        petrs: vec![],
        sites: vec![],
        rtr_ifaces: vec![],
        nat_traversal: false,
        rtrs: vec![],
    }
}

fn xtr_settings() -> Settings {
    let mut settings = base_settings(DeviceRole::Xtr);
    settings.map_servers = vec![MapServer {
        addr: "192.0.2.1".parse().unwrap(),
        key: "s".into(),
        proxy_reply: false,
    }];
    settings.map_resolvers = vec!["192.0.2.1".parse().unwrap()];
    settings.mappings = vec![lisp::DbMapping {
        eid: "10.0.0.0/24".parse().unwrap(),
        iface: Some("eth0".into()),
        rlocs: vec![lisp::Rloc {
            addr: "198.51.100.1".parse().unwrap(),
            priority: 1,
            weight: 100,
        }],
    }];
    settings
}

fn ms_settings() -> Settings {
    let mut settings = base_settings(DeviceRole::Ms);
    settings.sites = vec![Site {
        prefix: "10.0.0.0/24".parse().unwrap(),
        key: "s".into(),
        accept_more_specifics: false,
        proxy_reply: true,
        merge_registrations: false,
    }];
    settings
}

fn parse(bytes: &[u8]) -> ControlMessage {
    let mut buf = ReadBuffer::new(bytes);
    ControlMessage::read(&mut buf).expect("well-formed control message")
}

fn sock(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[test]
fn register_carries_valid_hmac_and_notify_cancels_retry() {
    let mut xtr = Xtr::from_settings(&xtr_settings());
    let mut lp = Loop::new();

    xtr.start(&mut lp.ctx());

    let packets = lp.drain();
    assert_eq!(packets.len(), 1);
    let register = &packets[0];
    assert_eq!(register.dst, sock("192.0.2.1:4342"));

    // The HMAC-SHA1-96 must verify under the shared key.
    auth::verify("s", &register.bytes, auth::KEY_ID_HMAC_SHA1_96, auth::AUTH_DATA_LEN)
        .expect("register authenticates");

    let ControlMessage::MapRegister(reg) = parse(&register.bytes) else {
        panic!("expected a map-register");
    };
    assert!(reg.want_notify);
    assert_eq!(reg.records.len(), 1);
    assert_eq!(reg.records[0].eid, "10.0.0.0/24".parse().unwrap());

    // No notify: the retransmission fires after the retry interval.
    lp.tick(&mut xtr);
    lp.tick(&mut xtr);
    assert!(lp.drain().is_empty());
    lp.tick(&mut xtr);
    let retries = lp.drain();
    assert_eq!(retries.len(), 1, "retry after 3 seconds");

    // A Map-Server acknowledges; the pending register resolves and later
    // retry timers go quiet.
    let mut ms = MsMr::from_settings(&ms_settings());
    let mut ms_lp = Loop::new();
    dispatch(&mut ms, &mut ms_lp.ctx(), &register.bytes, sock("198.51.100.1:4342"));

    let ms_out = ms_lp.drain();
    assert_eq!(ms_out.len(), 1);
    let ControlMessage::MapNotify(_) = parse(&ms_out[0].bytes) else {
        panic!("expected a map-notify");
    };

    dispatch(&mut xtr, &mut lp.ctx(), &ms_out[0].bytes, sock("192.0.2.1:4342"));
    assert!(lp.nonces.is_empty(), "notify resolves the pending register");

    for _ in 0..6 {
        lp.tick(&mut xtr);
    }
    assert!(lp.drain().is_empty(), "no further retransmissions");
}

#[test]
fn proxy_reply_and_negative_reply_from_map_server() {
    let mut ms = MsMr::from_settings(&ms_settings());
    let mut lp = Loop::new();

    // Register the site prefix with one locator.
    let mut mapping = Mapping::new("10.0.0.0/24".parse().unwrap(), 10);
    mapping
        .add_locator(Locator::remote(
            "198.51.100.7".parse().unwrap(),
            LocatorState::Up,
            1,
            50,
        ))
        .unwrap();
    let register = MapRegister {
        proxy_reply: false,
        want_notify: false,
        nonce: 9,
        key_id: auth::KEY_ID_HMAC_SHA1_96,
        auth_data: vec![0; auth::AUTH_DATA_LEN],
        records: vec![MappingRecord::from_mapping(&mapping)],
    };
    let raw = {
        let mut buf = WriteBuffer::new();
        register.write(&mut buf).unwrap();
        auth::sign(&mut buf, "s").unwrap();
        buf.into_bytes()
    };
    dispatch(&mut ms, &mut lp.ctx(), &raw, sock("198.51.100.7:4342"));
    assert!(lp.drain().is_empty(), "no notify requested");

    // A query for a host inside the site is proxy-answered with the
    // registered prefix and locator-set.
    let request = MapRequest::new(
        "172.16.0.1".parse().unwrap(),
        vec!["203.0.113.9".parse().unwrap()],
        "10.0.0.5".parse().unwrap(),
        77,
    );
    let raw = {
        let mut buf = WriteBuffer::new();
        request.write(&mut buf).unwrap();
        buf.into_bytes()
    };
    dispatch(&mut ms, &mut lp.ctx(), &raw, sock("203.0.113.9:4342"));

    let out = lp.drain();
    assert_eq!(out.len(), 1);
    let ControlMessage::MapReply(reply) = parse(&out[0].bytes) else {
        panic!("expected a map-reply");
    };
    assert_eq!(reply.nonce, 77);
    assert_eq!(reply.records[0].eid, "10.0.0.0/24".parse().unwrap());
    assert_eq!(reply.records[0].locators.len(), 1);
    assert_eq!(
        reply.records[0].locators[0].address,
        "198.51.100.7".parse().unwrap()
    );

    // A query outside every site draws a negative reply.
    let request = MapRequest::new(
        "172.16.0.1".parse().unwrap(),
        vec!["203.0.113.9".parse().unwrap()],
        "198.18.0.1".parse().unwrap(),
        78,
    );
    let raw = {
        let mut buf = WriteBuffer::new();
        request.write(&mut buf).unwrap();
        buf.into_bytes()
    };
    dispatch(&mut ms, &mut lp.ctx(), &raw, sock("203.0.113.9:4342"));

    let out = lp.drain();
    let ControlMessage::MapReply(reply) = parse(&out[0].bytes) else {
        panic!("expected a negative map-reply");
    };
    assert_eq!(reply.nonce, 78);
    assert!(reply.records[0].locators.is_empty());
    assert_eq!(reply.records[0].action, MapAction::NativelyForward);
    assert_eq!(reply.records[0].ttl, 15);
}

#[test]
fn probe_loss_marks_locator_down_and_reply_restores_it() {
    let mut settings = xtr_settings();
    settings.probing = ProbingParams {
        interval: 30,
        retries: 2,
        retry_interval: 3,
    };
    let mut xtr = Xtr::from_settings(&settings);
    let mut lp = Loop::new();

    let eid: Address = "203.0.113.0/24".parse().unwrap();
    let rloc: Address = "198.51.100.7".parse().unwrap();

    let mut mapping = Mapping::new(eid.clone(), 10);
    mapping
        .add_locator(Locator::remote(rloc.clone(), LocatorState::Up, 1, 50))
        .unwrap();
    {
        let mut ctx = lp.ctx();
        xtr.map_cache_mut().install(mapping, ctx.wheel);
    }
    assert!(!xtr.map_cache().exact(&eid).unwrap().vecs().is_empty());

    // Probe goes out, and the wire eats it plus both retransmissions.
    xtr.on_timer(
        &mut lp.ctx(),
        TimerEvent::RlocProbe {
            eid: eid.clone(),
            rloc: rloc.clone(),
        },
    );
    let out = lp.drain();
    assert_eq!(out.len(), 1);
    let ControlMessage::MapRequest(probe) = parse(&out[0].bytes) else {
        panic!("expected a probe request");
    };
    assert!(probe.probe);
    let nonce = probe.nonce;

    xtr.on_timer(&mut lp.ctx(), TimerEvent::RequestRetry { nonce });
    assert_eq!(lp.drain().len(), 1, "first retransmission");
    xtr.on_timer(&mut lp.ctx(), TimerEvent::RequestRetry { nonce });
    assert_eq!(lp.drain().len(), 1, "second retransmission");
    xtr.on_timer(&mut lp.ctx(), TimerEvent::RequestRetry { nonce });
    assert!(lp.drain().is_empty(), "budget exhausted");

    let entry = xtr.map_cache().exact(&eid).unwrap();
    assert!(entry.vecs().is_empty(), "down locator leaves no egress");

    // The next probe cycle gets an answer and the locator comes back.
    xtr.on_timer(
        &mut lp.ctx(),
        TimerEvent::RlocProbe {
            eid: eid.clone(),
            rloc: rloc.clone(),
        },
    );
    let out = lp.drain();
    assert_eq!(out.len(), 1);
    let ControlMessage::MapRequest(probe) = parse(&out[0].bytes) else {
        panic!("expected a probe request");
    };

    let reply = MapReply {
        probe: true,
        echo_nonce_capable: false,
        security: false,
        nonce: probe.nonce,
        records: vec![],
    };
    let raw = {
        let mut buf = WriteBuffer::new();
        reply.write(&mut buf).unwrap();
        buf.into_bytes()
    };
    dispatch(&mut xtr, &mut lp.ctx(), &raw, sock("198.51.100.7:4342"));

    let entry = xtr.map_cache().exact(&eid).unwrap();
    assert!(!entry.vecs().is_empty(), "probe reply restores egress");
}

#[test]
fn iface_change_triggers_register_and_gated_smr() {
    let mut xtr = Xtr::from_settings(&xtr_settings());
    let mut lp = Loop::new();

    // A peer asks for our prefix; it becomes part of the SMR audience.
    let request = MapRequest::new(
        "172.16.0.1".parse().unwrap(),
        vec!["203.0.113.9".parse().unwrap()],
        "10.0.0.0/24".parse().unwrap(),
        5,
    );
    let raw = {
        let mut buf = WriteBuffer::new();
        request.write(&mut buf).unwrap();
        buf.into_bytes()
    };
    dispatch(&mut xtr, &mut lp.ctx(), &raw, sock("203.0.113.9:4342"));
    let _reply = lp.drain();

    // The interface address changes: re-register plus one SMR.
    let event = IfaceEvent {
        iface: "eth0".into(),
        addr: Some("198.51.100.2".parse().unwrap()),
        status: IfaceStatus::Up,
    };
    xtr.on_iface_change(&mut lp.ctx(), event);

    let out = lp.drain();
    let smrs: Vec<_> = out
        .iter()
        .filter(|p| matches!(parse(&p.bytes), ControlMessage::MapRequest(r) if r.smr))
        .collect();
    let registers: Vec<_> = out
        .iter()
        .filter(|p| matches!(parse(&p.bytes), ControlMessage::MapRegister(_)))
        .collect();
    assert_eq!(smrs.len(), 1);
    assert_eq!(smrs[0].dst, sock("203.0.113.9:4342"));
    assert_eq!(registers.len(), 1);

    // A second flap inside the holdoff window is suppressed.
    let event = IfaceEvent {
        iface: "eth0".into(),
        addr: Some("198.51.100.3".parse().unwrap()),
        status: IfaceStatus::Up,
    };
    xtr.on_iface_change(&mut lp.ctx(), event);

    let out = lp.drain();
    let smrs = out
        .iter()
        .filter(|p| matches!(parse(&p.bytes), ControlMessage::MapRequest(r) if r.smr))
        .count();
    assert_eq!(smrs, 0, "smr replay suppressed inside the holdoff window");

    // After the holdoff tick the gate reopens.
    lp.tick(&mut xtr);
    let event = IfaceEvent {
        iface: "eth0".into(),
        addr: Some("198.51.100.4".parse().unwrap()),
        status: IfaceStatus::Up,
    };
    xtr.on_iface_change(&mut lp.ctx(), event);

    let out = lp.drain();
    let smrs = out
        .iter()
        .filter(|p| matches!(parse(&p.bytes), ControlMessage::MapRequest(r) if r.smr))
        .count();
    assert_eq!(smrs, 1);
}

#[test]
fn smr_reception_reissues_one_gated_request() {
    let mut xtr = Xtr::from_settings(&xtr_settings());
    let mut lp = Loop::new();

    let mut smr = MapRequest::new(
        "172.16.0.1".parse().unwrap(),
        vec!["203.0.113.9".parse().unwrap()],
        "203.0.113.0/24".parse().unwrap(),
        11,
    );
    smr.smr = true;
    let raw = {
        let mut buf = WriteBuffer::new();
        smr.write(&mut buf).unwrap();
        buf.into_bytes()
    };

    dispatch(&mut xtr, &mut lp.ctx(), &raw, sock("203.0.113.9:4342"));
    let first = lp.drain();
    assert_eq!(first.len(), 1);
    let ControlMessage::EncapControl(ecm) = parse(&first[0].bytes) else {
        panic!("smr-invoked request travels encapsulated");
    };
    let ControlMessage::MapRequest(inner) = parse(&ecm.payload) else {
        panic!("expected an inner map-request");
    };
    assert!(inner.smr_invoked);

    // The same SMR again, while the re-request is in flight: gated.
    dispatch(&mut xtr, &mut lp.ctx(), &raw, sock("203.0.113.9:4342"));
    assert!(lp.drain().is_empty());
}

#[test]
fn resolution_reply_activates_placeholder() {
    let mut xtr = Xtr::from_settings(&xtr_settings());
    let mut lp = Loop::new();

    let eid: Address = "203.0.113.0/24".parse().unwrap();
    xtr.resolve(&mut lp.ctx(), &eid, false);

    let out = lp.drain();
    assert_eq!(out.len(), 1);
    let ControlMessage::EncapControl(ecm) = parse(&out[0].bytes) else {
        panic!("expected an encapsulated request");
    };
    let ControlMessage::MapRequest(inner) = parse(&ecm.payload) else {
        panic!("expected an inner map-request");
    };
    assert!(!xtr.map_cache().exact(&eid).unwrap().is_active());

    let mut mapping = Mapping::new(eid.clone(), 10);
    mapping
        .add_locator(Locator::remote(
            "198.51.100.7".parse().unwrap(),
            LocatorState::Up,
            1,
            50,
        ))
        .unwrap();
    let reply = MapReply {
        probe: false,
        echo_nonce_capable: false,
        security: false,
        nonce: inner.nonce,
        records: vec![MappingRecord::from_mapping(&mapping)],
    };
    let raw = {
        let mut buf = WriteBuffer::new();
        reply.write(&mut buf).unwrap();
        buf.into_bytes()
    };
    dispatch(&mut xtr, &mut lp.ctx(), &raw, sock("192.0.2.1:4342"));

    let entry = xtr.map_cache().exact(&eid).unwrap();
    assert!(entry.is_active());
    assert_eq!(entry.vecs().all().len(), 50);

    // A reply bearing a nonce nobody issued is dropped silently.
    let forged = MapReply {
        probe: false,
        echo_nonce_capable: false,
        security: false,
        nonce: 0x1234,
        records: vec![],
    };
    let raw = {
        let mut buf = WriteBuffer::new();
        forged.write(&mut buf).unwrap();
        buf.into_bytes()
    };
    dispatch(&mut xtr, &mut lp.ctx(), &raw, sock("192.0.2.1:4342"));
    assert!(entryish_still_active(&xtr, &eid));
}

fn entryish_still_active(xtr: &Xtr, eid: &Address) -> bool {
    xtr.map_cache().exact(eid).map(|e| e.is_active()).unwrap_or(false)
}
