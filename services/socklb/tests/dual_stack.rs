
use std::net::Ipv4Addr;

use harness::{tcp, udp, v4, v6, TestLb, POD_NETNS};
use proptest::prelude::*;
use socklb::config::LbConfig;
use socklb::lb::{Action, ServiceFlags, SockAddr, XlateError};
use socklb_networking::build_v4_in_v6;

const BACKENDS: [(u32, &str); 3] = [
    (1, "10.0.1.1:8080"),
    (2, "10.0.1.2:8080"),
    (3, "10.0.1.3:8080"),
];

fn mapped(addr: SockAddr<Ipv4Addr>) -> SockAddr<std::net::Ipv6Addr> {
    SockAddr::new(build_v4_in_v6(addr.address), addr.port)
}

proptest! {
    #[test]
    fn mapped_send_matches_ipv4_send(cookie in any::<u64>(), port in 1u16..=u16::MAX) {
        let t = TestLb::new();
        let frontend = format!("10.96.0.20:{port}");
        t.add_service_v4(&frontend, ServiceFlags::default(), 1, &BACKENDS);

        let dst = v4(&frontend);
        let plain = t.lb.sendmsg4(&udp(cookie, POD_NETNS), dst);
        let dual = t.lb.sendmsg6(&udp(cookie, POD_NETNS), mapped(dst));
        prop_assert_eq!(dual, plain.map(build_v4_in_v6));
    }
}

#[test]
fn mapped_connect_rewrites_to_mapped_backend() {
    let t = TestLb::new();
    t.add_service_v4("10.96.0.1:80", ServiceFlags::default(), 1, &BACKENDS);

    t.rng.set(1);
    let action = t.lb.connect6(&tcp(1, POD_NETNS), v6("[::ffff:10.96.0.1]:80"));
    assert_eq!(action, Action::Rewrite(v6("[::ffff:10.0.1.2]:8080")));
}

#[test]
fn native_ipv6_service() {
    let t = TestLb::new();
    t.add_service_v6(
        "[fd00::10]:443",
        ServiceFlags::default(),
        9,
        &[(11, "[fd00:1::1]:8443"), (12, "[fd00:1::2]:8443")],
    );

    t.rng.set(0);
    let ctx = tcp(5, POD_NETNS);
    let action = t.lb.connect6(&ctx, v6("[fd00::10]:443"));
    assert_eq!(action, Action::Rewrite(v6("[fd00:1::1]:8443")));

    // The IPv4 tables are untouched.
    assert!(t.lb.maps().v4.revnat.is_empty());
    assert_eq!(
        t.lb.getpeername6(&ctx, v6("[fd00:1::1]:8443")),
        Action::Rewrite(v6("[fd00::10]:443"))
    );
}

#[test]
fn mapped_peer_query_uses_ipv4_state() {
    let t = TestLb::new();
    t.add_service_v4("10.96.0.1:80", ServiceFlags::default(), 1, &BACKENDS);

    t.rng.set(2);
    let ctx = tcp(6, POD_NETNS);
    // The connect went out over IPv4; the query arrives over a dual-stack socket.
    let backend = *t.lb.connect4(&ctx, v4("10.96.0.1:80")).rewritten().unwrap();
    assert_eq!(
        t.lb.getpeername6(&ctx, mapped(backend)),
        Action::Rewrite(v6("[::ffff:10.96.0.1]:80"))
    );
}

#[test]
fn ipv6_disabled_still_serves_mapped_addresses() {
    let t = TestLb::with_config(LbConfig {
        enable_ipv6: false,
        ..LbConfig::default()
    });
    t.add_service_v4("10.96.0.1:80", ServiceFlags::default(), 1, &BACKENDS);
    t.add_service_v6("[fd00::10]:443", ServiceFlags::default(), 9, &[(11, "[fd00:1::1]:8443")]);

    t.rng.set(0);
    let mapped_action = t.lb.connect6(&tcp(1, POD_NETNS), v6("[::ffff:10.96.0.1]:80"));
    assert_eq!(mapped_action, Action::Rewrite(v6("[::ffff:10.0.1.1]:8080")));

    let native = t.lb.connect6(&tcp(1, POD_NETNS), v6("[fd00::10]:443"));
    assert_eq!(native, Action::Passthrough(Some(XlateError::NotSupported)));
}
