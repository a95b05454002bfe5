//! Registry lifecycle tests: lazy spawning, reuse, removal, and shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::{fast_config, MockDriver};
use crate::registry::SupervisorRegistry;

fn registry(driver: &MockDriver) -> SupervisorRegistry {
    super::init_tracing();
    SupervisorRegistry::new(Arc::new(driver.clone()), fast_config())
}

#[tokio::test]
async fn get_or_spawn_reuses_the_existing_manager() {
    let driver = MockDriver::new();
    let registry = registry(&driver);

    let first = registry.get_or_spawn("main").await.unwrap();
    let second = registry.get_or_spawn("main").await.unwrap();

    let first_host = first.status().await.unwrap().host;
    let second_host = second.status().await.unwrap().host;
    assert_eq!(first_host, second_host, "same surface, same supervisor");
    assert_eq!(registry.manager_count(), 1);
    assert_eq!(driver.creation_attempts(), 1);
}

#[tokio::test]
async fn distinct_surfaces_get_distinct_supervisors() {
    let driver = MockDriver::new();
    let registry = registry(&driver);

    let main = registry.get_or_spawn("main").await.unwrap();
    let overlay = registry.get_or_spawn("overlay").await.unwrap();

    assert_eq!(registry.manager_count(), 2);
    let main_host = main.status().await.unwrap().host;
    let overlay_host = overlay.status().await.unwrap().host;
    assert_ne!(main_host, overlay_host);
}

#[tokio::test]
async fn remove_shuts_the_manager_down() {
    let driver = MockDriver::new();
    let registry = registry(&driver);

    registry.get_or_spawn("main").await.unwrap();
    let record = driver.current_record();

    registry.remove("main");
    assert_eq!(registry.manager_count(), 0);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while record.destroys.load(Ordering::SeqCst) == 0 {
        if tokio::time::Instant::now() > deadline {
            panic!("removed manager never destroyed its host");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Removing an unknown surface is a logged no-op.
    registry.remove("main");
}

#[tokio::test]
async fn shutdown_all_clears_every_manager() {
    let driver = MockDriver::new();
    let registry = registry(&driver);

    registry.get_or_spawn("main").await.unwrap();
    registry.get_or_spawn("overlay").await.unwrap();
    assert_eq!(registry.manager_count(), 2);

    registry.shutdown_all();
    assert_eq!(registry.manager_count(), 0);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let all_destroyed = driver
            .records()
            .iter()
            .all(|record| record.destroys.load(Ordering::SeqCst) == 1);
        if all_destroyed {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("shutdown_all left hosts alive");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
