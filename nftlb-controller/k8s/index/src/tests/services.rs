use super::*;
use nftlb_controller_core::{Family, FieldParam, Mode, PacketField, Scheduler, State};
use pretty_assertions::assert_eq;

#[test]
fn hashed_service_declares_cluster_farm() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .port(Some("http"), 80)
        .annotate("scheduler", "hash-srcip")
        .build();

    let update = apply_service(&mut registry, &svc).expect("service must apply");
    assert!(update.stale.is_empty());
    assert!(update.dsr.is_empty());
    assert_eq!(update.farms.farms.len(), 1);

    let farm = update.farms.get("web--http").expect("farm must be declared");
    assert_eq!(farm.family, Some(Family::Ipv4));
    assert_eq!(farm.virtual_addr, Some("10.0.0.5".parse().unwrap()));
    assert_eq!(farm.virtual_ports, Some(80));
    assert_eq!(farm.mode, Some(Mode::Snat));
    assert_eq!(farm.scheduler, Some(Scheduler::Hash));
    assert_eq!(farm.sched_param, Some(FieldParam::Field(PacketField::SrcIp)));
    assert_eq!(farm.protocol.as_deref(), Some("tcp"));
    assert_eq!(farm.state, Some(State::Up));
    assert_eq!(farm.iface, None);
    assert!(farm.backends.is_empty());

    let json: serde_json::Value =
        serde_json::from_str(&update.farms.to_json().unwrap()).unwrap();
    assert_eq!(json["farms"][0]["name"], "web--http");
    assert_eq!(json["farms"][0]["virtual-addr"], "10.0.0.5");
    assert_eq!(json["farms"][0]["virtual-ports"], "80");
    assert_eq!(json["farms"][0]["sched-param"], "srcip");

    assert_eq!(
        registry.owner(&super::farm("web--http")),
        Some(&ResourceId::new("ns-0", "web"))
    );
}

#[test]
fn unnamed_port_uses_default_name() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("db", "10.0.0.6").port(None, 5432).build();
    let update = apply_service(&mut registry, &svc).unwrap();
    assert_eq!(
        update.farms.names().map(|n| n.as_str()).collect::<Vec<_>>(),
        vec!["db--default"]
    );
}

#[test]
fn node_port_service_declares_twin() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .node_port(Some("http"), 80, 30080)
        .build();

    let update = apply_service(&mut registry, &svc).unwrap();
    assert_eq!(
        update.farms.names().map(|n| n.as_str()).collect::<Vec<_>>(),
        vec!["web--http", "web--http--nodePort"]
    );

    let twin = update.farms.get("web--http--nodePort").unwrap();
    assert_eq!(twin.virtual_addr, None);
    assert_eq!(twin.virtual_ports, Some(30080));

    let base = super::farm("web--http");
    assert_eq!(
        registry.node_port_twin(&base),
        Some(&super::farm("web--http--nodePort"))
    );
    assert_eq!(
        registry.published_farms(&base),
        vec![base.clone(), super::farm("web--http--nodePort")]
    );
}

#[test]
fn external_ips_declare_twins() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .port(Some("http"), 80)
        .external_ip("192.0.2.10")
        .external_ip("2001:db8::10")
        .build();

    let update = apply_service(&mut registry, &svc).unwrap();
    let v6 = update
        .farms
        .get("web--http--externalIP--2001:db8::10")
        .expect("v6 twin must be declared");
    assert_eq!(v6.family, Some(Family::Ipv6));
    assert_eq!(v6.virtual_addr, Some("2001:db8::10".parse().unwrap()));

    assert_eq!(
        registry.published_farms(&super::farm("web--http")),
        vec![
            super::farm("web--http"),
            super::farm("web--http--externalIP--192.0.2.10"),
            super::farm("web--http--externalIP--2001:db8::10"),
        ]
    );
}

#[test]
fn synthesis_is_deterministic() {
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .node_port(Some("http"), 80, 30080)
        .node_port(Some("https"), 443, 30443)
        .external_ip("192.0.2.10")
        .annotate("scheduler", "symhash")
        .annotate("maxconns", "50")
        .build();

    let first = service::synthesize_farms(&svc, &Settings::default());
    let second = service::synthesize_farms(&svc, &Settings::default());
    assert_eq!(first, second);

    let mut a = Registry::default();
    let mut b = Registry::default();
    let first = apply_service(&mut a, &svc).unwrap().farms.to_json().unwrap();
    let second = apply_service(&mut b, &svc).unwrap().farms.to_json().unwrap();
    assert_eq!(first, second);
}

#[test]
fn reapplying_is_idempotent() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .node_port(Some("http"), 80, 30080)
        .build();

    let first = apply_service(&mut registry, &svc).unwrap();
    let second = apply_service(&mut registry, &svc).unwrap();
    assert_eq!(first, second);
}

#[test]
fn naming_collision_is_rejected() {
    let mut registry = Registry::default();
    let a = SvcBuilder::new("a--b", "10.0.0.5").port(Some("c"), 80).build();
    let b = SvcBuilder::new("a", "10.0.0.6").port(Some("b--c"), 80).build();

    apply_service(&mut registry, &a).unwrap();
    let error = apply_service(&mut registry, &b).expect_err("collision must be rejected");
    assert!(
        matches!(
            &error,
            Error::NamingCollision { farm, owner, claimant }
                if farm.as_str() == "a--b--c"
                    && *owner == ResourceId::new("ns-0", "a--b")
                    && *claimant == ResourceId::new("ns-0", "a")
        ),
        "unexpected error: {error}"
    );
    assert!(!error.is_recoverable());

    // The first owner is unaffected.
    assert_eq!(
        registry.owner(&super::farm("a--b--c")),
        Some(&ResourceId::new("ns-0", "a--b"))
    );

    // Once the owner is gone, the name may be claimed.
    let removal = registry.delete_service(&ResourceId::new("ns-0", "a--b"));
    assert_eq!(removal.farms, vec![super::farm("a--b--c")]);
    apply_service(&mut registry, &b).expect("name must be free");
}

#[test]
fn removed_ports_become_stale() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .node_port(Some("http"), 80, 30080)
        .node_port(Some("https"), 443, 30443)
        .build();
    apply_service(&mut registry, &svc).unwrap();

    let svc = SvcBuilder::new("web", "10.0.0.5")
        .port(Some("http"), 80)
        .build();
    let update = apply_service(&mut registry, &svc).unwrap();
    assert_eq!(
        update.stale,
        vec![
            super::farm("web--http--nodePort"),
            super::farm("web--https"),
            super::farm("web--https--nodePort"),
        ]
    );
    assert_eq!(registry.node_port_twin(&super::farm("web--http")), None);
    assert_eq!(registry.owner(&super::farm("web--https")), None);
}

#[test]
fn deleting_service_forgets_farms() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .node_port(Some("http"), 80, 30080)
        .annotate("maxconns", "10")
        .build();
    apply_service(&mut registry, &svc).unwrap();
    assert_eq!(registry.ceiling(&super::farm("web--http")), Some(10));

    let removal = registry.delete_service(&ResourceId::new("ns-0", "web"));
    assert_eq!(
        removal.farms,
        vec![super::farm("web--http"), super::farm("web--http--nodePort")]
    );
    assert_eq!(registry.ceiling(&super::farm("web--http")), None);
    assert_eq!(registry.node_port_twin(&super::farm("web--http")), None);

    // Deleting again is a no-op.
    let removal = registry.delete_service(&ResourceId::new("ns-0", "web"));
    assert_eq!(removal, ServiceRemoval::default());
}

#[test]
fn dsr_farm_forwards_through_interface() {
    let mut registry = Registry::default();
    let svc = SvcBuilder::new("web", "10.0.0.5")
        .port(Some("http"), 80)
        .annotate("mode", "dsr")
        .build();
    let settings = Settings {
        dsr_iface: "eth1".to_string(),
        ..Default::default()
    };
    let farms = service::synthesize_farms(&svc, &settings);
    let update = registry
        .apply_service(&ResourceId::of(&svc), farms)
        .unwrap();
    assert_eq!(
        update.farms.get("web--http").unwrap().iface.as_deref(),
        Some("eth1")
    );
}

#[test]
fn metrics_report_registry_state() {
    let shared = Registry::shared();
    let mut prom = prometheus_client::registry::Registry::default();
    registry::metrics::register(&mut prom, shared.clone());

    {
        let mut registry = shared.write();
        let svc = SvcBuilder::new("web", "10.0.0.5")
            .node_port(Some("http"), 80, 30080)
            .annotate("mode", "dsr")
            .label("app", "web")
            .build();
        apply_service(&mut registry, &svc).unwrap();
        let ep = mk_endpoints("web", &[("10.1.0.1", Some("a"))], &[(Some("http"), 8080)]);
        apply_endpoints(&mut registry, &ep);
    }

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
    for line in [
        "farms 2",
        "node_port_farms 1",
        "external_ip_farms 0",
        r#"dsr_records{state="pending"} 1"#,
        r#"dsr_records{state="active"} 0"#,
        "endpoints 1",
    ] {
        assert!(text.lines().any(|l| l == line), "missing {line:?} in:\n{text}");
    }
}
