use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::ProfileError;

/// Deserializes a number that upstream SDKs may serialize either as a JSON
/// number or as a string.
pub fn deserialize_number_from_string<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    <T as FromStr>::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber<T> {
        String(String),
        Number(T),
    }

    match StringOrNumber::<T>::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.parse::<T>().map_err(serde::de::Error::custom),
        StringOrNumber::Number(n) => Ok(n),
    }
}

pub fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Deserializes a JSON payload, wrapping errors so the failing field path is
/// preserved.
pub(crate) fn parse_json<'de, T>(payload: &'de [u8]) -> Result<T, ProfileError>
where
    T: Deserialize<'de>,
{
    let deserializer = &mut serde_json::Deserializer::from_slice(payload);
    serde_path_to_error::deserialize(deserializer).map_err(ProfileError::InvalidJson)
}
