//! Fuzz target for change-feed notification decoding.
//!
//! Arbitrary bytes must decode to an error or an event; a decoded event
//! must survive re-encoding and feed the decision engine without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use region_sync::{should_replicate, ChangeEvent, ReplicationMode};

fuzz_target!(|data: &[u8]| {
    let Ok(event) = ChangeEvent::from_notification(data) else {
        return;
    };

    for mode in [
        ReplicationMode::None,
        ReplicationMode::SingleRegionPrimary,
        ReplicationMode::MultiRegionPrimary,
    ] {
        let _ = should_replicate(&event, "us", mode);
    }

    let reencoded = event.to_notification();
    let again = ChangeEvent::from_notification(&reencoded).unwrap();
    assert_eq!(again.kind(), event.kind());
    assert_eq!(again.resource_id(), event.resource_id());
});
