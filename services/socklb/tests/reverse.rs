
use harness::{tcp, udp, v4, TestLb, HOST_IP, POD_NETNS};
use socklb::config::LbConfig;
use socklb::lb::{Action, ServiceFlags, SockAddr, XlateError};
use socklb::metrics::{Direction, Reason};

const BACKENDS: [(u32, &str); 2] = [(1, "10.0.1.1:5353"), (2, "10.0.1.2:5353")];

#[test]
fn peer_query_reports_service_after_connect() {
    let t = TestLb::new();
    t.add_service_v4("10.96.0.10:53", ServiceFlags::default(), 4, &BACKENDS);

    let ctx = tcp(11, POD_NETNS);
    let backend = *t.lb.connect4(&ctx, v4("10.96.0.10:53")).rewritten().unwrap();

    assert_eq!(
        t.lb.getpeername4(&ctx, backend),
        Action::Rewrite(v4("10.96.0.10:53"))
    );
}

#[test]
fn datagram_receive_reports_service() {
    let t = TestLb::new();
    t.add_service_v4("10.96.0.10:53", ServiceFlags::default(), 4, &BACKENDS);

    let ctx = udp(12, POD_NETNS);
    let backend = *t.lb.sendmsg4(&ctx, v4("10.96.0.10:53")).rewritten().unwrap();
    assert_eq!(t.lb.recvmsg4(&ctx, backend), Action::Rewrite(v4("10.96.0.10:53")));

    // Traffic from an address nobody was translated to stays literal.
    assert_eq!(
        t.lb.recvmsg4(&ctx, v4("10.0.9.9:5353")),
        Action::Passthrough(Some(XlateError::NotFound))
    );
}

#[test]
fn version_change_exposes_backend_and_purges() {
    let t = TestLb::new();
    t.add_service_v4("10.96.0.10:53", ServiceFlags::default(), 4, &BACKENDS);

    let ctx = udp(13, POD_NETNS);
    let backend = *t.lb.sendmsg4(&ctx, v4("10.96.0.10:53")).rewritten().unwrap();

    // Backend set changed; the service gets a new version.
    t.add_service_v4("10.96.0.10:53", ServiceFlags::default(), 5, &BACKENDS);

    assert_eq!(
        t.lb.getpeername4(&ctx, backend),
        Action::Passthrough(Some(XlateError::Stale))
    );
    // Second query misses: the entry is gone, not resurrected.
    assert_eq!(
        t.lb.getpeername4(&ctx, backend),
        Action::Passthrough(Some(XlateError::NotFound))
    );
    assert_eq!(t.metrics.count(Direction::Ingress, Reason::RevNatStale), 1);
}

#[test]
fn wildcard_service_round_trips_original_address() {
    let t = TestLb::new();
    let flags = ServiceFlags {
        nodeport: true,
        ..Default::default()
    };
    t.add_service_v4("0.0.0.0:30053", flags, 6, &BACKENDS[..1]);

    let ctx = udp(14, POD_NETNS);
    let dst = SockAddr::new(HOST_IP, 30053);
    let backend = *t.lb.sendmsg4(&ctx, dst).rewritten().unwrap();

    // The caller sees the node address it used, not the wildcard.
    assert_eq!(t.lb.recvmsg4(&ctx, backend), Action::Rewrite(dst));
}

#[test]
fn reverse_hooks_inert_when_disabled() {
    let t = TestLb::with_config(LbConfig {
        enable_udp: false,
        enable_peer: false,
        ..LbConfig::default()
    });
    t.add_service_v4("10.96.0.10:53", ServiceFlags::default(), 4, &BACKENDS);

    let ctx = tcp(15, POD_NETNS);
    let backend = *t.lb.connect4(&ctx, v4("10.96.0.10:53")).rewritten().unwrap();
    assert!(t.lb.maps().v4.revnat.is_empty());
    assert_eq!(t.lb.getpeername4(&ctx, backend), Action::Passthrough(None));
}
