//! Integration tests for the catalog loader and the parameter map publisher.

mod common;

use common::{FakeBus, add_device, add_mapping, add_type, memory_catalog};
use redis_bridge_modbus::catalog::{Catalog, CatalogError, ParameterMapping};
use redis_bridge_modbus::device::{MAX_BLOCKS, MAX_DEVICES, ReadFunction};
use redis_bridge_modbus::memory_cache::MemoryCache;
use redis_bridge_modbus::params::publish_parameter_map;
use redis_bridge_modbus::runner::Bridge;

#[tokio::test]
async fn test_load_devices_in_catalog_order() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(
        pool,
        1,
        Some(r#"[{"function":3,"address":0,"count":2},{"function":4,"address":10,"count":1}]"#),
    )
    .await;
    add_type(pool, 2, Some(r#"[{"function":4,"address":5,"count":3}]"#)).await;
    add_device(pool, 9, "pump", 2).await;
    add_device(pool, 7, "tank", 1).await;

    let devices = catalog.load_devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].slave_id, 9);
    assert_eq!(devices[0].name, "pump");
    assert_eq!(devices[1].slave_id, 7);
    assert_eq!(devices[1].blocks.len(), 2);
    assert_eq!(devices[1].blocks[1].function, ReadFunction::InputRegisters);
    assert_eq!(devices[1].blocks[1].address, 10);
}

#[tokio::test]
async fn test_unparsable_devices_are_skipped() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(pool, 1, Some(r#"[{"function":3,"address":0,"count":1}]"#)).await;
    add_type(pool, 2, Some("not json")).await;
    add_type(pool, 3, None).await;
    add_type(pool, 4, Some(r#"{"function":3}"#)).await;
    add_device(pool, 1, "good", 1).await;
    add_device(pool, 2, "garbled", 2).await;
    add_device(pool, 3, "empty", 3).await;
    add_device(pool, 4, "object", 4).await;
    add_device(pool, 300, "out of range", 1).await;
    add_device(pool, 5, "no type", 99).await;

    let devices = catalog.load_devices().await.unwrap();

    let ids: Vec<u8> = devices.iter().map(|d| d.slave_id).collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_malformed_blocks_are_discarded() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(
        pool,
        1,
        Some(
            r#"[
                {"function":3,"address":0,"count":2},
                {"function":"3","address":0,"count":2},
                {"function":3,"count":2},
                {"function":6,"address":0,"count":1},
                {"function":4,"address":8,"count":100}
            ]"#,
        ),
    )
    .await;
    add_device(pool, 1, "meter", 1).await;

    let devices = catalog.load_devices().await.unwrap();

    let blocks = &devices[0].blocks;
    assert_eq!(blocks.len(), 2);
    // Out-of-range counts survive loading and are rejected at read time.
    assert_eq!(blocks[1].count, 100);
}

#[tokio::test]
async fn test_device_and_block_caps() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    let blocks: Vec<String> = (0..70)
        .map(|i| format!(r#"{{"function":3,"address":{},"count":1}}"#, i))
        .collect();
    add_type(pool, 1, Some(format!("[{}]", blocks.join(",")).as_str())).await;
    for slave_id in 0..(MAX_DEVICES as i64 + 2) {
        add_device(pool, slave_id, "node", 1).await;
    }

    let devices = catalog.load_devices().await.unwrap();

    assert_eq!(devices.len(), MAX_DEVICES);
    assert_eq!(devices[0].blocks.len(), MAX_BLOCKS);
    assert_eq!(devices[0].blocks[MAX_BLOCKS - 1].address, 63);
}

#[tokio::test]
async fn test_parameter_lookups() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(pool, 1, Some("[]")).await;
    add_device(pool, 7, "tank", 1).await;
    add_mapping(pool, 1, "level_in_mm", 2).await;
    add_mapping(pool, 1, "setpoint", 40).await;
    add_mapping(pool, 1, "bogus", 70000).await;

    assert_eq!(catalog.device_type_of(7).await.unwrap(), Some(1));
    assert_eq!(catalog.device_type_of(8).await.unwrap(), None);
    assert_eq!(
        catalog.parameter_address(1, "setpoint").await.unwrap(),
        Some(40)
    );
    assert_eq!(catalog.parameter_address(1, "missing").await.unwrap(), None);
    assert_eq!(
        catalog.parameter_map(1).await.unwrap(),
        vec![
            ParameterMapping {
                name: "level_in_mm".to_string(),
                address: 2,
            },
            ParameterMapping {
                name: "setpoint".to_string(),
                address: 40,
            },
        ]
    );
}

#[tokio::test]
async fn test_open_missing_database() {
    let result = Catalog::open("/nonexistent/rtucache/iot.db").await;

    assert!(matches!(result, Err(CatalogError::NotFound(_))));
}

#[tokio::test]
async fn test_publish_parameter_map() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(pool, 1, Some("[]")).await;
    add_type(pool, 2, Some("[]")).await;
    add_device(pool, 7, "tank", 1).await;
    add_device(pool, 8, "tank2", 1).await;
    add_device(pool, 9, "pump", 2).await;
    add_mapping(pool, 1, "level_in_mm", 2).await;
    add_mapping(pool, 2, "speed", 11).await;
    let cache = MemoryCache::new();

    let stats = publish_parameter_map(&catalog, &cache, 45).await;

    assert_eq!(stats.devices, 3);
    assert_eq!(stats.parameters, 3);
    assert_eq!(cache.value("modbus:7:level_in_mm").as_deref(), Some("2"));
    assert_eq!(cache.value("modbus:8:level_in_mm").as_deref(), Some("2"));
    assert_eq!(cache.value("modbus:9:speed").as_deref(), Some("11"));
    assert_eq!(cache.ttl("modbus:9:speed"), Some(45));
    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn test_failing_type_lookup_skips_only_its_devices() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(pool, 1, Some("[]")).await;
    add_type(pool, 2, Some("[]")).await;
    add_device(pool, 7, "tank", 1).await;
    add_device(pool, 8, "pump", 2).await;
    add_device(pool, 9, "pump2", 2).await;

    // Serve the mapping table through a view whose rows for type 2 fail to
    // evaluate, so only that type's lookups error out.
    for statement in [
        "DROP TABLE sensor_data_register_mapping",
        "CREATE TABLE raw_mapping \
         (devices_type_id INTEGER, parameter_name TEXT, register_address INTEGER)",
        "CREATE VIEW sensor_data_register_mapping AS \
         SELECT rowid AS rowid, devices_type_id, parameter_name, \
         CASE WHEN devices_type_id = 2 THEN json_extract(parameter_name, '$') \
         ELSE register_address END AS register_address \
         FROM raw_mapping",
        "INSERT INTO raw_mapping VALUES (1, 'level_in_mm', 2), (2, 'speed', 11)",
    ] {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
    assert!(catalog.parameter_map(2).await.is_err());
    let cache = MemoryCache::new();

    let stats = publish_parameter_map(&catalog, &cache, 45).await;

    assert_eq!(stats.devices, 1);
    assert_eq!(stats.devices_skipped, 2);
    assert_eq!(cache.value("modbus:7:level_in_mm").as_deref(), Some("2"));
    assert!(!cache.contains("modbus:8:speed"));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_unlistable_devices_publish_nothing() {
    let catalog = memory_catalog().await;
    sqlx::query("DROP TABLE iotdevices")
        .execute(catalog.pool())
        .await
        .unwrap();
    let cache = MemoryCache::new();

    let stats = publish_parameter_map(&catalog, &cache, 45).await;

    assert_eq!(stats, Default::default());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_bridge_cycle_polls_then_reconciles() {
    let catalog = memory_catalog().await;
    let pool = catalog.pool();
    add_type(pool, 1, Some(r#"[{"function":3,"address":0,"count":2}]"#)).await;
    add_device(pool, 7, "tank", 1).await;
    add_mapping(pool, 1, "setpoint", 1).await;
    let devices = catalog.load_devices().await.unwrap();

    let bus = FakeBus::new().with_registers(7, 0, &[10, 20]);
    let cache = MemoryCache::new();
    cache.insert("modbus:write:7:setpoint", "25");
    let mut bridge = Bridge::new(catalog, bus, cache, devices, 60);

    let first = bridge.run_cycle().await;
    assert_eq!(first.poll.values_published, 2);
    assert_eq!(first.reconcile.applied, 1);
    assert_eq!(bridge.cache().value("modbus:7:reg1").as_deref(), Some("20"));

    // The written value shows up on the next poll.
    bridge.run_cycle().await;
    assert_eq!(bridge.cache().value("modbus:7:reg1").as_deref(), Some("25"));
    assert_eq!(
        bridge.cache().value("modbus:result:7:setpoint").as_deref(),
        Some("OK")
    );
}
