// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end zone-control tests against a scripted mock device.

use std::sync::Arc;
use std::time::Duration;

use nuvoport::bus::EventBus;
use nuvoport::client::MradClient;
use nuvoport::error::ErrorKind;
use nuvoport::model::StateChangeEvent;
use tokio::sync::mpsc;

use nuvoport_specs::{sources_xml, zones_xml, MockDevice, MockReply, Protocol, Responder};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

fn basic_responder() -> Responder {
    Arc::new(|command, _conn| match command {
        "BrowseZones" => MockReply::lines(zones_xml().lines().map(str::to_owned)),
        "BrowseSources" => MockReply::lines(sources_xml().lines().map(str::to_owned)),
        "GetStatus" => MockReply::lines([
            "ReportState Zone_1 Volume=12",
            "ReportState Zone_1 PowerOn=False",
            "ReportState Zone_3 Volume=50",
            "ReportState Zone_3 PowerOn=True",
            "ReportState NV-I8G DeviceType=I8G",
            "ReportState NV-I8G FirmwareVersion=2.66",
            "Ok",
        ]),
        _ => MockReply::Silence,
    })
}

async fn connected_client(mock: &MockDevice) -> anyhow::Result<(Arc<EventBus>, MradClient)> {
    let bus = Arc::new(EventBus::new(32));
    let client =
        MradClient::new("127.0.0.1".to_owned(), mock.port(), COMMAND_TIMEOUT, Arc::clone(&bus));
    client.connect().await?;
    Ok((bus, client))
}

// -- E1: zone listing ---------------------------------------------------------

#[tokio::test]
async fn list_zones_merges_browse_and_status() -> anyhow::Result<()> {
    let mock = MockDevice::start(Protocol::Mrad, basic_responder()).await?;
    let (_bus, client) = connected_client(&mock).await?;

    let zones = client.browse_zones().await?;
    assert_eq!(zones.len(), 2);

    assert_eq!(zones[0].zone_number, 1);
    assert_eq!(zones[0].name, "Master Bedroom");
    assert!(!zones[0].is_on);
    assert_eq!(zones[0].volume, 12);

    assert_eq!(zones[1].zone_number, 3);
    assert_eq!(zones[1].name, "Living Room");
    assert!(zones[1].is_on);
    assert_eq!(zones[1].volume, 50);

    // Init handshake happened in order before any browse.
    let observed = mock.observed().await;
    assert_eq!(observed[0], "*");
    assert_eq!(observed[1], "SetXMLMode Lists");
    assert_eq!(observed[2], "SubscribeEvents smart");
    Ok(())
}

// -- E2: volume write reaches the wire ----------------------------------------

#[tokio::test]
async fn set_volume_frames_zone_argument() -> anyhow::Result<()> {
    let mock = MockDevice::start(Protocol::Mrad, basic_responder()).await?;
    let (_bus, client) = connected_client(&mock).await?;

    client.set_volume(50, Some(3)).await?;
    mock.wait_observed(|c| c == "Volume 50 3", Duration::from_secs(1)).await?;

    // Status read-back reports the new volume.
    let zones = client.browse_zones().await?;
    let zone3 = zones.iter().find(|z| z.zone_number == 3).expect("zone 3 present");
    assert_eq!(zone3.volume, 50);
    Ok(())
}

// -- E3: unsolicited events ---------------------------------------------------

#[tokio::test]
async fn state_changed_reaches_subscriber_quickly() -> anyhow::Result<()> {
    let mock = MockDevice::start(Protocol::Mrad, basic_responder()).await?;
    let (bus, _client) = connected_client(&mock).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(move |event: StateChangeEvent| {
        let tx = tx.clone();
        async move {
            tx.send(event)?;
            Ok(())
        }
    })
    .await;

    mock.inject("StateChanged Zone_2 Volume=37");

    let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await?
        .expect("subscriber channel open");
    assert_eq!(event.target, "Zone_2");
    assert_eq!(event.property, "Volume");
    assert_eq!(event.value, "37");
    assert!(event.timestamp > 0.0);
    Ok(())
}

#[tokio::test]
async fn events_keep_wire_order_per_target() -> anyhow::Result<()> {
    let mock = MockDevice::start(Protocol::Mrad, basic_responder()).await?;
    let (bus, _client) = connected_client(&mock).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(move |event: StateChangeEvent| {
        let tx = tx.clone();
        async move {
            tx.send(event.value)?;
            Ok(())
        }
    })
    .await;

    for volume in [10, 20, 30, 40] {
        mock.inject(&format!("StateChanged Zone_1 Volume={volume}"));
    }

    for volume in [10, 20, 30, 40] {
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await?
            .expect("subscriber channel open");
        assert_eq!(got, volume.to_string());
    }
    Ok(())
}

// -- E5: local validation -----------------------------------------------------

#[tokio::test]
async fn out_of_range_volume_never_reaches_the_device() -> anyhow::Result<()> {
    let mock = MockDevice::start(Protocol::Mrad, basic_responder()).await?;
    let (_bus, client) = connected_client(&mock).await?;

    let err = client.set_volume(80, Some(1)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    let err = client.set_volume(-1, Some(1)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!mock.observed().await.iter().any(|c| c.starts_with("Volume")));
    Ok(())
}

// -- Property 10: timeout isolation -------------------------------------------

#[tokio::test]
async fn late_reply_is_never_handed_to_the_next_command() -> anyhow::Result<()> {
    let responder: Responder = Arc::new(|command, _conn| match command {
        "GetStatus" => MockReply::Delayed(
            Duration::from_millis(700),
            vec!["ReportState Zone_1 Volume=11".to_owned(), "Ok".to_owned()],
        ),
        "BrowseSources" => MockReply::lines(sources_xml().lines().map(str::to_owned)),
        _ => MockReply::Silence,
    });
    let mock = MockDevice::start(Protocol::Mrad, responder).await?;
    let (_bus, client) = connected_client(&mock).await?;

    let err = client.execute("GetStatus", Duration::from_millis(200)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);

    // Let the late reply land while no command is awaiting: the reader
    // discards it.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let sources = client.browse_sources().await?;
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[1].name, "Music Server A");
    Ok(())
}

// -- Property 11 (MRAD): drop mid-command, no silent retry --------------------

#[tokio::test]
async fn socket_drop_fails_command_and_next_one_reconnects() -> anyhow::Result<()> {
    let responder: Responder = Arc::new(|command, conn| match command {
        "BrowseSources" if conn == 1 => MockReply::CloseConnection,
        "BrowseSources" => MockReply::lines(sources_xml().lines().map(str::to_owned)),
        _ => MockReply::Silence,
    });
    let mock = MockDevice::start(Protocol::Mrad, responder).await?;
    let (_bus, client) = connected_client(&mock).await?;
    assert_eq!(mock.connections(), 1);

    let err = client.browse_sources().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unavailable);
    assert!(!client.is_connected());

    // The failed command was not replayed behind our back; the next call
    // performs exactly one reconnect and succeeds.
    let sources = client.browse_sources().await?;
    assert_eq!(sources.len(), 2);
    assert_eq!(mock.connections(), 2);
    Ok(())
}

// -- Serialization: commands never interleave ---------------------------------

#[tokio::test]
async fn concurrent_commands_serialize_and_release_the_mutex() -> anyhow::Result<()> {
    let mock = MockDevice::start(Protocol::Mrad, basic_responder()).await?;
    let (_bus, client) = connected_client(&mock).await?;
    let client = Arc::new(client);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let client = Arc::clone(&client);
        tasks.spawn(async move { client.browse_sources().await });
    }
    while let Some(joined) = tasks.join_next().await {
        let sources = joined??;
        assert_eq!(sources.len(), 2);
    }

    // Single connection throughout: serialized, no reconnect churn.
    assert_eq!(mock.connections(), 1);
    Ok(())
}
