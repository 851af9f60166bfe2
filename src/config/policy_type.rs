use serde::de::{self, Deserializer, Visitor};
use std::fmt;

use crate::ice::GatherPolicy;

/**
 * Deserialize the gather policy from the configuration.
 *
 * Matching is case insensitive, anything unrecognized falls back to `all`
 * so a typo never disables host candidates.
 */
pub fn deserialize<'de, D>(deserializer: D) -> Result<GatherPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserializer
        .deserialize_str(GatherPolicyVisitor)
        .unwrap_or_default())
}

struct GatherPolicyVisitor;

impl<'de> Visitor<'de> for GatherPolicyVisitor {
    type Value = GatherPolicy;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("one of all, nohost, relay")
    }

    fn visit_str<E>(self, value: &str) -> Result<GatherPolicy, E>
    where
        E: de::Error,
    {
        match value.to_lowercase().as_str() {
            "all" => Ok(GatherPolicy::All),
            "nohost" => Ok(GatherPolicy::Nohost),
            "relay" => Ok(GatherPolicy::Relay),
            _ => Err(de::Error::unknown_variant(value, &["all", "nohost", "relay"])),
        }
    }
}
