//! Fuzz target for resource id parsing.
//!
//! Parsing must never panic, whatever parses must print back to an id that
//! parses to the same parts, and region replacement must keep the id valid.

#![no_main]

use libfuzzer_sys::fuzz_target;
use region_sync::resource::{extract_path, replace_region, ResourceName};

fuzz_target!(|data: (&str, &str)| {
    let (id, region) = data;

    match ResourceName::parse(id) {
        Ok(name) => {
            assert!(!name.region.is_empty() && !name.region.contains('/'));
            assert!(!name.path.is_empty());

            let printed = name.to_string();
            assert_eq!(ResourceName::parse(&printed).ok(), Some(name));

            if !region.is_empty() && !region.contains('/') {
                assert!(extract_path(&replace_region(id, region)).is_ok());
            }
        }
        Err(_) => assert_eq!(replace_region(id, region), id),
    }
});
