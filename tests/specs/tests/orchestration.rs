// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end façade tests: the play-radio orchestration, toggle
//! round-trips, and discovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nuvoport::config::GatewayConfig;
use nuvoport::discovery::DiscoveryScanner;
use nuvoport::error::ErrorKind;
use nuvoport::gateway::Gateway;
use nuvoport::model::PartyRole;
use tokio_util::sync::CancellationToken;

use nuvoport_specs::{sources_xml, zones_xml, MockDevice, MockReply, Protocol, Responder};

fn gateway_for(mrad: &MockDevice, mcs: &MockDevice) -> Arc<Gateway> {
    let config = GatewayConfig {
        nuvo_host: "127.0.0.1".to_owned(),
        mrad_port: mrad.port(),
        mcs_port: mcs.port(),
        http_host: "127.0.0.1".to_owned(),
        http_port: 0,
        command_timeout_s: 2.0,
        mcs_command_timeout_s: 2.0,
        reconnect_settle_s: 0.0,
        reconnect_stabilize_s: 0.0,
        discovery_concurrency: 16,
        subscriber_queue_depth: 32,
        client_name: "nuvoport-test".to_owned(),
    };
    Gateway::new(config, CancellationToken::new())
}

/// MRAD responder with a party-mode latch: before the toggle no zone has a
/// role, afterwards Zone_3 reports Host.
fn party_mrad_responder(party_on: Arc<AtomicBool>) -> Responder {
    Arc::new(move |command, _conn| match command {
        "BrowseZones" => MockReply::lines(zones_xml().lines().map(str::to_owned)),
        "BrowseSources" => MockReply::lines(sources_xml().lines().map(str::to_owned)),
        "PartyMode Toggle" => {
            party_on.fetch_xor(true, Ordering::SeqCst);
            MockReply::Silence
        }
        "GetStatus" => {
            let mut lines = vec![
                "ReportState Zone_1 Volume=12".to_owned(),
                "ReportState Zone_3 Volume=50".to_owned(),
            ];
            if party_on.load(Ordering::SeqCst) {
                lines.push("ReportState Zone_3 PartyMode=Host".to_owned());
                lines.push("ReportState Zone_1 PartyMode=Slave".to_owned());
            }
            lines.push("Ok".to_owned());
            MockReply::Lines(lines)
        }
        _ => MockReply::Silence,
    })
}

/// MCS responder modelling the TuneIn navigation: the top-level menu until
/// `AckPickItem 0`, the station list afterwards.
fn tunein_mcs_responder(in_tunein: Arc<AtomicBool>) -> Responder {
    Arc::new(move |command, _conn| match command {
        "BrowseRadioStations" => {
            if in_tunein.load(Ordering::SeqCst) {
                MockReply::lines([
                    r#"<RadioStations total="5">"#,
                    r#"<RadioStation guid="st-0" name="BBC World Service"/>"#,
                    r#"<RadioStation guid="st-1" name="Jazz24"/>"#,
                    r#"<RadioStation guid="st-2" name="KEXP 90.3"/>"#,
                    r#"<RadioStation guid="st-3" name="WNYC"/>"#,
                    r#"<RadioStation guid="st-4" name="97.1 Hot 97"/>"#,
                    "</RadioStations>",
                ])
            } else {
                MockReply::lines([
                    r#"<RadioStations total="2">"#,
                    r#"<RadioStation guid="menu-0" name="TuneIn Radio"/>"#,
                    r#"<RadioStation guid="menu-1" name="Local Library"/>"#,
                    "</RadioStations>",
                ])
            }
        }
        "AckPickItem 0" => {
            in_tunein.store(true, Ordering::SeqCst);
            MockReply::done()
        }
        _ => MockReply::done(),
    })
}

// -- E4: the canonical orchestration ------------------------------------------

#[tokio::test]
async fn play_radio_by_name_walks_the_menu_in_order() -> anyhow::Result<()> {
    let party_on = Arc::new(AtomicBool::new(false));
    let in_tunein = Arc::new(AtomicBool::new(false));
    let mrad =
        MockDevice::start(Protocol::Mrad, party_mrad_responder(Arc::clone(&party_on))).await?;
    let mcs =
        MockDevice::start(Protocol::Mcs, tunein_mcs_responder(Arc::clone(&in_tunein))).await?;
    let gateway = gateway_for(&mrad, &mcs);
    gateway.start().await;

    gateway.play_radio_station_by_name("Hot 97", "Music_Server_A").await?;

    // The media server saw the canonical sequence, in order.
    let observed = mcs.observed_commands().await;
    let expected = [
        "SetInstance Music_Server_A",
        "BrowseRadioStations",
        "AckPickItem 0",
        "BrowseRadioStations",
        "AckPickItem 4",
    ];
    let mut cursor = 0;
    for command in &observed {
        if cursor < expected.len() && command == expected[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(cursor, expected.len(), "out of order: {observed:?}");

    // The zone side toggled party mode and routed the host zone.
    let mrad_observed = mrad.observed().await;
    assert!(mrad_observed.iter().any(|c| c == "PartyMode Toggle"));
    assert!(mrad_observed.iter().any(|c| c == "setZone zone-guid-3"));
    assert!(mrad_observed.iter().any(|c| c == "setSource src-msa"));
    Ok(())
}

#[tokio::test]
async fn unknown_station_applies_filter_then_fails_not_found() -> anyhow::Result<()> {
    let party_on = Arc::new(AtomicBool::new(true));
    let in_tunein = Arc::new(AtomicBool::new(false));
    let mrad =
        MockDevice::start(Protocol::Mrad, party_mrad_responder(Arc::clone(&party_on))).await?;
    let mcs =
        MockDevice::start(Protocol::Mcs, tunein_mcs_responder(Arc::clone(&in_tunein))).await?;
    let gateway = gateway_for(&mrad, &mcs);
    gateway.start().await;

    let err = gateway
        .play_radio_station_by_name("Station That Does Not Exist", "Music_Server_A")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    // The filter fallback was attempted before giving up.
    assert!(mcs.observed().await.iter().any(|c| c.starts_with("SetRadioFilter ")));
    Ok(())
}

// -- Properties 8 & 9: toggles round-trip -------------------------------------

#[tokio::test]
async fn double_mute_toggle_returns_to_original_state() -> anyhow::Result<()> {
    let muted = Arc::new(AtomicBool::new(false));
    let responder: Responder = {
        let muted = Arc::clone(&muted);
        Arc::new(move |command, _conn| match command {
            "BrowseZones" => MockReply::lines(zones_xml().lines().map(str::to_owned)),
            "Mute Toggle 1" => {
                muted.fetch_xor(true, Ordering::SeqCst);
                MockReply::Silence
            }
            "GetStatus" => {
                let mute = if muted.load(Ordering::SeqCst) { "True" } else { "False" };
                MockReply::Lines(vec![
                    format!("ReportState Zone_1 Mute={mute}"),
                    "Ok".to_owned(),
                ])
            }
            _ => MockReply::Silence,
        })
    };
    let mrad = MockDevice::start(Protocol::Mrad, responder).await?;
    let mcs = MockDevice::start(Protocol::Mcs, Arc::new(|_: &str, _| MockReply::done())).await?;
    let gateway = gateway_for(&mrad, &mcs);
    gateway.start().await;

    let before = gateway.get_zone(1).await?.mute;
    gateway.toggle_mute(1).await?;
    assert_eq!(gateway.get_zone(1).await?.mute, !before);
    gateway.toggle_mute(1).await?;
    assert_eq!(gateway.get_zone(1).await?.mute, before);
    Ok(())
}

#[tokio::test]
async fn double_party_toggle_restores_roles() -> anyhow::Result<()> {
    let party_on = Arc::new(AtomicBool::new(false));
    let mrad =
        MockDevice::start(Protocol::Mrad, party_mrad_responder(Arc::clone(&party_on))).await?;
    let mcs = MockDevice::start(Protocol::Mcs, Arc::new(|_: &str, _| MockReply::done())).await?;
    let gateway = gateway_for(&mrad, &mcs);
    gateway.start().await;

    let roles = |zones: &[nuvoport::model::Zone]| {
        zones.iter().map(|z| z.party_mode).collect::<Vec<_>>()
    };

    let original = roles(&gateway.list_zones().await?);
    assert!(original.iter().all(|r| *r == PartyRole::Off));

    gateway.toggle_party_mode().await?;
    let during = roles(&gateway.list_zones().await?);
    assert!(during.contains(&PartyRole::Host));

    gateway.toggle_party_mode().await?;
    assert_eq!(roles(&gateway.list_zones().await?), original);
    Ok(())
}

// -- Property 13: discovery ---------------------------------------------------

#[tokio::test]
async fn discovery_finds_exactly_the_responsive_host() -> anyhow::Result<()> {
    let mrad = MockDevice::start(Protocol::Mrad, Arc::new(|_: &str, _| MockReply::ok())).await?;

    // Only 127.0.0.1 listens; the rest of the /29 refuses.
    let scanner = DiscoveryScanner::new(mrad.port(), 1, 8);
    let devices = scanner.scan("127.0.0.0/29").await?;

    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.ip, "127.0.0.1");
    assert!(device.mrad_open);
    assert!(!device.mcs_open);
    assert!(device.banner.as_deref().is_some_and(|b| b.contains("NuVo")));
    assert_eq!(device.hostname.as_deref(), Some("NV-I8G"));
    Ok(())
}

#[tokio::test]
async fn discovery_rejects_malformed_networks() -> anyhow::Result<()> {
    let scanner = DiscoveryScanner::new(5006, 5004, 8);
    let err = scanner.scan("not-a-network").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    Ok(())
}
