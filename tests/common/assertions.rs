//! Custom test assertions for integration tests

use satstack::Event;
use satstack::raster::read_bands;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Events already queued on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the first event matching `predicate`
///
/// Returns `None` on timeout or when the channel closes.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert the merged file holds `expected` bands in order, each filled with the given value
pub fn assert_stacked(path: &Path, expected: &[(&str, f32)], width: u32, pixel_size: f64) {
    let bands = read_bands(path).unwrap();
    let names: Vec<&str> = bands.iter().map(|b| b.name.as_str()).collect();
    let expected_names: Vec<&str> = expected.iter().map(|(n, _)| *n).collect();
    assert_eq!(names, expected_names, "band order in {}", path.display());

    for (band, (name, value)) in bands.iter().zip(expected) {
        assert_eq!(band.width, width, "{name} width");
        assert_eq!(band.height, width, "{name} height");
        assert_eq!(band.pixel_size, pixel_size, "{name} pixel size");
        assert!(
            band.pixels.iter().all(|p| (p - value).abs() < 1e-4),
            "{name} should be filled with {value}"
        );
    }
}
