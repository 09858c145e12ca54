//! Master election, hot standby and takeover between nodes sharing a store

use std::sync::Arc;
use std::time::Duration;

use bkl_config::ConfigValue;
use bkl_core::BrooklynObject;
use bkl_rebind::{
    HighAvailabilityManager, HighAvailabilityMode, ManagementNodeState, RebindConfig, RebindError,
};
use bkl_test_utils::{populate_sample_app, ManagementHandle, RebindTestFixture};
use pretty_assertions::assert_eq;

fn ha(node: &ManagementHandle) -> HighAvailabilityManager {
    HighAvailabilityManager::new(Arc::clone(&node.rebind))
}

#[tokio::test]
async fn first_node_becomes_master_second_standby() -> anyhow::Result<()> {
    let fixture = RebindTestFixture::new()?;
    let first = fixture.new_node("node-1");
    let second = fixture.new_node("node-2");
    let first_ha = ha(&first);
    let second_ha = ha(&second);

    assert_eq!(
        first_ha.start(HighAvailabilityMode::Auto).await?,
        ManagementNodeState::Master
    );
    assert_eq!(
        second_ha.start(HighAvailabilityMode::Auto).await?,
        ManagementNodeState::Standby
    );

    let record = first.rebind.persister().read_plane_record().await?.unwrap();
    assert_eq!(record.master_node_id.as_deref(), Some("node-1"));
    assert_eq!(record.nodes["node-2"].state, ManagementNodeState::Standby);

    first.rebind.stop_persistence().await;
    Ok(())
}

#[tokio::test]
async fn explicit_master_refused_while_master_alive() -> anyhow::Result<()> {
    let fixture = RebindTestFixture::new()?;
    let first = fixture.new_node("node-1");
    let second = fixture.new_node("node-2");
    ha(&first).start(HighAvailabilityMode::Master).await?;

    let err = ha(&second)
        .start(HighAvailabilityMode::Master)
        .await
        .unwrap_err();
    assert!(matches!(err, RebindError::IllegalState(_)));

    first.rebind.stop_persistence().await;
    Ok(())
}

#[tokio::test]
async fn hot_standby_holds_read_only_copy() -> anyhow::Result<()> {
    let fixture = RebindTestFixture::new()?;
    let master = fixture.new_node("node-1");
    let master_ha = ha(&master);
    master_ha.start(HighAvailabilityMode::Auto).await?;
    let sample = populate_sample_app(&master.mgmt)?;
    master.rebind.checkpoint().await?;

    let standby = fixture.new_node("node-2");
    let standby_ha = ha(&standby);
    assert_eq!(
        standby_ha.start(HighAvailabilityMode::HotStandby).await?,
        ManagementNodeState::HotStandby
    );
    assert!(standby.mgmt.is_read_only());
    let child = standby.mgmt.entity(&sample.child).unwrap();
    assert!(child.is_read_only());
    assert!(child.set_config("test.port", ConfigValue::from(1)).is_err());
    assert!(standby.rebind.checkpoint().await.is_err());

    // refresh picks up new master state
    master.mgmt.entity(&sample.app).unwrap().set_display_name("renamed");
    master.rebind.checkpoint().await?;
    assert_eq!(standby_ha.check_master().await?, ManagementNodeState::HotStandby);
    assert_eq!(
        standby.mgmt.entity(&sample.app).unwrap().display_name().as_deref(),
        Some("renamed")
    );

    master.rebind.stop_persistence().await;
    Ok(())
}

#[tokio::test]
async fn standby_takes_over_from_dead_master() -> anyhow::Result<()> {
    let fixture = RebindTestFixture::new()?
        .with_config(RebindConfig::new().with_heartbeat_timeout(Duration::from_millis(50)));
    let master = fixture.new_node("node-1");
    ha(&master).start(HighAvailabilityMode::Auto).await?;
    let sample = populate_sample_app(&master.mgmt)?;
    master.rebind.checkpoint().await?;
    master.rebind.stop_persistence().await;

    let standby = fixture.new_node("node-2");
    let standby_ha = ha(&standby);
    standby_ha.start(HighAvailabilityMode::Standby).await?;
    assert_eq!(standby.mgmt.total_count(), 0);

    // master stops heartbeating
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(standby_ha.check_master().await?, ManagementNodeState::Master);

    assert_eq!(standby.mgmt.total_count(), master.mgmt.total_count());
    let child = standby.mgmt.entity(&sample.child).unwrap();
    assert!(!child.is_read_only());
    child.set_config("test.port", ConfigValue::from(1))?;

    let record = standby.rebind.persister().read_plane_record().await?.unwrap();
    assert_eq!(record.master_node_id.as_deref(), Some("node-2"));

    standby_ha.stop().await?;
    assert_eq!(standby_ha.state(), ManagementNodeState::Terminated);
    let record = standby.rebind.persister().read_plane_record().await?.unwrap();
    assert_eq!(record.master_node_id, None);
    Ok(())
}

#[tokio::test]
async fn standby_heartbeat_leaves_master_entry_alone() -> anyhow::Result<()> {
    let fixture = RebindTestFixture::new()?;
    let master = fixture.new_node("node-1");
    let standby = fixture.new_node("node-2");
    let master_ha = ha(&master);
    let standby_ha = ha(&standby);
    master_ha.start(HighAvailabilityMode::Auto).await?;
    standby_ha.start(HighAvailabilityMode::Standby).await?;
    master.rebind.stop_persistence().await;

    let plane = standby.rebind.persister();
    let mut last = plane.read_plane_record().await?.unwrap().nodes["node-1"].clone();
    for _ in 0..5 {
        // standby reads before the master beats, then beats itself
        let before = plane.read_plane_record().await?.unwrap();
        master_ha.heartbeat().await?;
        let written = plane.read_plane_record().await?.unwrap().nodes["node-1"].clone();
        standby_ha.heartbeat().await?;

        let after = plane.read_plane_record().await?.unwrap();
        assert_eq!(after.nodes["node-1"], written);
        assert!(written.last_heartbeat >= before.nodes["node-1"].last_heartbeat);
        assert!(written.last_heartbeat >= last.last_heartbeat);
        assert_eq!(after.master_node_id.as_deref(), Some("node-1"));
        last = written;
    }

    let (m, s) = tokio::join!(master_ha.heartbeat(), standby_ha.heartbeat());
    m?;
    s?;
    let record = plane.read_plane_record().await?.unwrap();
    assert!(record.nodes["node-1"].last_heartbeat >= last.last_heartbeat);

    // a third node sees the live master and stays standby
    let third = fixture.new_node("node-3");
    let third_ha = ha(&third);
    third_ha.start(HighAvailabilityMode::Standby).await?;
    assert_eq!(third_ha.check_master().await?, ManagementNodeState::Standby);
    Ok(())
}
