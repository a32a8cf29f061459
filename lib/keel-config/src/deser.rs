//! Deserialization helpers.
//!
//! Configuration values frequently arrive as strings (environment variables) even when the field is logically a
//! boolean or a duration. These helpers, used through `serde_with::serde_as`, accept the loosely-typed forms as well as
//! the native ones.

use std::{fmt, time::Duration};

use serde::{
    de::{Error, Unexpected},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Permissively deserializes a boolean.
///
/// Accepts:
///
/// - `true` or `false` as a native boolean
/// - `"true"` or `"false"` as a string (case insensitive)
/// - `1` or `0` as an integer (signed, unsigned, or floating point)
pub struct PermissiveBool;

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = bool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean, string, integer, or floating-point number")
            }

            fn visit_bool<E: Error>(self, value: bool) -> Result<Self::Value, E> {
                Ok(value)
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
                match value.trim().to_lowercase().as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    _ => Err(Error::invalid_value(
                        Unexpected::Str(value),
                        &"\"true\" or \"false\" (case insensitive)",
                    )),
                }
            }

            fn visit_i64<E: Error>(self, value: i64) -> Result<Self::Value, E> {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Signed(value), &"0 or 1")),
                }
            }

            fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Unsigned(value), &"0 or 1")),
                }
            }

            fn visit_f64<E: Error>(self, value: f64) -> Result<Self::Value, E> {
                if value == 0.0 {
                    Ok(false)
                } else if value == 1.0 {
                    Ok(true)
                } else {
                    Err(Error::invalid_value(Unexpected::Float(value), &"0.0 or 1.0"))
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Deserializes a non-negative number of seconds into a [`Duration`].
///
/// Accepts integers, floating-point numbers (for sub-second precision), and strings containing either.
pub struct PermissiveSeconds;

fn seconds_to_duration<E: Error>(secs: f64, unexpected: Unexpected<'_>) -> Result<Duration, E> {
    Duration::try_from_secs_f64(secs).map_err(|_| Error::invalid_value(unexpected, &"a non-negative number of seconds"))
}

impl<'de> DeserializeAs<'de, Duration> for PermissiveSeconds {
    fn deserialize_as<D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a non-negative number of seconds, as a number or string")
            }

            fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(Duration::from_secs(value))
            }

            fn visit_i64<E: Error>(self, value: i64) -> Result<Self::Value, E> {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| Error::invalid_value(Unexpected::Signed(value), &"a non-negative number of seconds"))
            }

            fn visit_f64<E: Error>(self, value: f64) -> Result<Self::Value, E> {
                seconds_to_duration(value, Unexpected::Float(value))
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
                let secs = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| Error::invalid_value(Unexpected::Str(value), &"a numeric string"))?;
                seconds_to_duration(secs, Unexpected::Str(value))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
