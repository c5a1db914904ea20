//! Raw profile parsing and per-session call-tree building.
//!
//! Two capture shapes are supported:
//!
//! - the sample format ([`SampleProfile`]): periodic snapshots of full call
//!   stacks, one per thread, as produced by cocoa-style profilers;
//! - the Android trace format ([`AndroidProfile`]): an ordered stream of
//!   explicit method enter/exit/unwind events.
//!
//! Both convert into one forest of [`arbor_calltree::Node`] per thread via
//! their `call_trees` methods. Use [`parse_profile`] to dispatch on the
//! payload's platform tag.

use std::collections::HashMap;

use serde::Deserialize;

use arbor_calltree::Node;

pub mod android;
pub mod sample;
pub mod transaction_metadata;

mod error;
mod utils;

pub use crate::android::{parse_android_profile, AndroidProfile};
pub use crate::error::ProfileError;
pub use crate::sample::{parse_sample_profile, SampleProfile};
pub use crate::transaction_metadata::TransactionMetadata;
pub use crate::utils::deserialize_number_from_string;

#[derive(Debug, Deserialize)]
struct MinimalProfile {
    platform: String,
}

/// A parsed profile of any supported platform.
#[derive(Debug, Clone)]
pub enum Profile {
    Sample(SampleProfile),
    Android(AndroidProfile),
}

impl Profile {
    pub fn platform(&self) -> &str {
        match self {
            Profile::Sample(profile) => &profile.platform,
            Profile::Android(_) => "android",
        }
    }

    /// Builds the per-thread call tree forests for this profile.
    pub fn call_trees(&mut self) -> Result<HashMap<u64, Vec<Node>>, ProfileError> {
        match self {
            Profile::Sample(profile) => profile.call_trees(),
            Profile::Android(profile) => Ok(profile.call_trees()),
        }
    }
}

/// Parses a raw profile payload, dispatching on its platform tag.
pub fn parse_profile(payload: &[u8]) -> Result<Profile, ProfileError> {
    let minimal: MinimalProfile = utils::parse_json(payload)?;
    match minimal.platform.as_str() {
        "android" => Ok(Profile::Android(utils::parse_json(payload)?)),
        "cocoa" => Ok(Profile::Sample(parse_sample_profile(payload)?)),
        _ => Err(ProfileError::PlatformNotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_dispatches_on_platform() {
        let payload = br#"{
            "platform": "android",
            "clock": "Wall",
            "events": [],
            "methods": []
        }"#;
        let profile = parse_profile(payload).unwrap();
        assert!(matches!(profile, Profile::Android(_)));
        assert_eq!(profile.platform(), "android");
    }

    #[test]
    fn test_parse_profile_rejects_unknown_platform() {
        let payload = br#"{"platform": "fortran"}"#;
        assert!(matches!(
            parse_profile(payload),
            Err(ProfileError::PlatformNotSupported)
        ));
    }
}
