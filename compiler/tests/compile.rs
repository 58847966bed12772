// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end runs of the analysis phases over small topologies.

use diag::{CompileError, Diagnostics, Options};
use lpm::Prefix;
use policyplane_compiler::compile;
use pretty_assertions::assert_eq;
use std::net::IpAddr;
use topology::{
    Address, HostAddr, HostConfig, InterfaceConfig, NatDefConfig, NatKind, NetObject,
    NetworkConfig, RouterConfig, Topology,
};
use tracing_test::traced_test;

fn prefix(s: &str) -> Prefix {
    s.parse().expect("valid prefix")
}

fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid address")
}

/// network:n sits behind router:r1; its dynamic translation is bound
/// toward the outside at r1 and stays active behind router:r2 as well.
fn dynamic_nat_topology() -> Topology {
    let mut topo = Topology::new();
    let inside = topo.add_zone("zone:inside");
    let outside = topo.add_zone("zone:outside");
    let far = topo.add_zone("zone:far");
    let n = topo
        .add_network(NetworkConfig::new(
            "network:n",
            prefix("10.0.0.0/24"),
            inside,
        ))
        .expect("network");
    topo.add_nat(
        n,
        NatDefConfig::new("x", NatKind::Dynamic).set_prefix(prefix("192.0.2.0/24")),
    )
    .expect("nat");
    let out_net = topo
        .add_network(NetworkConfig::new(
            "network:out",
            prefix("10.1.0.0/24"),
            outside,
        ))
        .expect("network");
    let far_net = topo
        .add_network(NetworkConfig::new(
            "network:far",
            prefix("10.2.0.0/24"),
            far,
        ))
        .expect("network");
    let r1 = topo.add_router(RouterConfig::new("router:r1"));
    topo.add_interface(
        InterfaceConfig::new("r1.n", r1, n)
            .set_ip(ip("10.0.0.1"))
            .set_hardware("inside"),
    )
    .expect("interface");
    topo.add_interface(
        InterfaceConfig::new("r1.out", r1, out_net)
            .set_ip(ip("10.1.0.1"))
            .set_bind_nat(&["x"])
            .set_hardware("outside"),
    )
    .expect("interface");
    let r2 = topo.add_router(RouterConfig::new("router:r2").set_acl_use_real_ip(true));
    topo.add_interface(
        InterfaceConfig::new("r2.out", r2, out_net).set_ip(ip("10.1.0.2")),
    )
    .expect("interface");
    topo.add_interface(
        InterfaceConfig::new("r2.far", r2, far_net).set_ip(ip("10.2.0.1")),
    )
    .expect("interface");
    topo.add_host(HostConfig::new("host:h", n, HostAddr::Ip(ip("10.0.0.7"))))
        .expect("host");
    topo
}

#[traced_test]
#[test]
fn test_dynamic_nat_addresses_per_domain() {
    let mut topo = dynamic_nat_topology();
    let mut diag = Diagnostics::new();
    topo.finalize(&mut diag).expect("finalize");
    compile(&mut topo, &Options::default(), &mut diag).expect("compile");

    let n = topo
        .networks
        .iter()
        .find(|(_, net)| net.name == "network:n")
        .map(|(id, _)| id)
        .expect("network:n");
    let inside = topo.domain_of(n).expect("inside domain");
    let outside = topo
        .zones
        .iter()
        .find(|(_, zone)| zone.name == "zone:outside")
        .and_then(|(_, zone)| zone.nat_domain)
        .expect("outside domain");
    let far = topo
        .zones
        .iter()
        .find(|(_, zone)| zone.name == "zone:far")
        .and_then(|(_, zone)| zone.nat_domain)
        .expect("far domain");

    // The tag stays active in every domain beyond its binding.
    let inside_map = &topo.domains[inside].nat_map;
    let outside_map = &topo.domains[outside].nat_map;
    let far_map = &topo.domains[far].nat_map;
    assert_eq!(
        NetObject::Network(n).address(&topo, inside_map),
        Some(Address::Prefix(prefix("10.0.0.0/24")))
    );
    assert_eq!(
        NetObject::Network(n).address(&topo, outside_map),
        Some(Address::Prefix(prefix("192.0.2.0/24")))
    );
    assert_eq!(
        NetObject::Network(n).address(&topo, far_map),
        Some(Address::Prefix(prefix("192.0.2.0/24")))
    );

    // Hosts lose their precision under the dynamic translation.
    let h = topo
        .hosts
        .iter()
        .find(|(_, host)| host.name == "host:h")
        .map(|(id, _)| id)
        .expect("host:h");
    assert_eq!(
        NetObject::Host(h).address(&topo, outside_map),
        Some(Address::Prefix(prefix("192.0.2.0/24")))
    );
    assert_eq!(
        NetObject::Host(h).address(&topo, inside_map),
        Some(Address::Prefix(prefix("10.0.0.7/32")))
    );

    // Hardware ports reference the map of the domain they face.
    let r1 = topo
        .routers
        .iter()
        .find(|(_, router)| router.name == "router:r1")
        .map(|(id, _)| id)
        .expect("router:r1");
    let hw: Vec<(String, Option<_>)> = topo.routers[r1]
        .hardware
        .iter()
        .map(|hw| (hw.name.clone(), hw.nat_domain))
        .collect();
    assert_eq!(
        hw,
        vec![
            ("inside".to_string(), Some(inside)),
            ("outside".to_string(), Some(outside)),
        ]
    );

    // The real-ip router combines the views of both adjacent domains; the
    // tag is active in both of them here.
    let r2 = topo
        .routers
        .iter()
        .find(|(_, router)| router.name == "router:r2")
        .map(|(id, _)| id)
        .expect("router:r2");
    let combined = topo.routers[r2].real_ip_set.as_ref().expect("combined set");
    assert_eq!(combined, &topo.domains[outside].nat_set);
    let real_map = topo.routers[r2].real_ip_map.as_ref().expect("combined map");
    assert_eq!(
        NetObject::Network(n).address(&topo, real_map),
        Some(Address::Prefix(prefix("192.0.2.0/24")))
    );
}

#[test]
fn test_inconsistent_loop_aborts_compilation() {
    let mut topo = Topology::new();
    let za = topo.add_zone("zone:a");
    let zb = topo.add_zone("zone:b");
    let na = topo
        .add_network(NetworkConfig::new("network:a", prefix("10.1.0.0/24"), za))
        .expect("network");
    topo.add_nat(
        na,
        NatDefConfig::new("x", NatKind::Static).set_prefix(prefix("192.0.2.0/24")),
    )
    .expect("nat");
    let nb = topo
        .add_network(NetworkConfig::new("network:b", prefix("10.2.0.0/24"), zb))
        .expect("network");
    let r1 = topo.add_router(RouterConfig::new("router:r1"));
    topo.add_interface(InterfaceConfig::new("r1.a", r1, na)).expect("interface");
    topo.add_interface(InterfaceConfig::new("r1.b", r1, nb)).expect("interface");
    let r2 = topo.add_router(RouterConfig::new("router:r2"));
    topo.add_interface(InterfaceConfig::new("r2.a", r2, na)).expect("interface");
    topo.add_interface(InterfaceConfig::new("r2.b", r2, nb).set_bind_nat(&["x"]))
        .expect("interface");

    let mut diag = Diagnostics::new();
    topo.finalize(&mut diag).expect("finalize");
    let result = compile(&mut topo, &Options::default(), &mut diag);
    assert_eq!(result.err(), Some(CompileError::AbortedByErrors { count: 1 }));
    let errors: Vec<&str> = diag.errors().collect();
    assert_eq!(errors, vec!["Inconsistent NAT applied in loop at router:r2"]);
}

#[test]
fn test_diagnostics_are_deterministic() {
    let run = || {
        let mut topo = dynamic_nat_topology();
        // An extra conflict to produce output worth comparing.
        let zc = topo.add_zone("zone:c");
        let nc = topo
            .add_network(NetworkConfig::new("network:c", prefix("10.0.0.0/24"), zc))
            .expect("network");
        let r3 = topo.add_router(RouterConfig::new("router:r3"));
        topo.add_interface(InterfaceConfig::new("r3.c", r3, nc)).expect("interface");
        let far_net = topo
            .networks
            .iter()
            .find(|(_, net)| net.name == "network:far")
            .map(|(id, _)| id)
            .expect("network:far");
        topo.add_interface(InterfaceConfig::new("r3.far", r3, far_net))
            .expect("interface");

        let mut diag = Diagnostics::new();
        topo.finalize(&mut diag).expect("finalize");
        let _ = compile(&mut topo, &Options::default(), &mut diag);
        diag.entries()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
    // network:c has the same address as network:n; in the domains where n
    // is untranslated the conflict is real.
    assert!(
        first
            .iter()
            .any(|entry| entry.contains("have identical address")),
        "{first:?}"
    );
}
