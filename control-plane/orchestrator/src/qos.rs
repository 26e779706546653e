//! Parsing and validation of the per-volume QoS parameter document.

use crate::{errors::Error, ProductFamily};
use array_client::QosSpec;
use std::collections::BTreeMap;

/// Read/write selector quality.
const IO_TYPE: &str = "IOTYPE";
/// Qualities supported by every family.
const UPPER_BOUNDS: [&str; 2] = ["MAXBANDWIDTH", "MAXIOPS"];
/// Qualities only the current family enforces.
const LOWER_BOUNDS: [&str; 3] = ["MINBANDWIDTH", "MINIOPS", "LATENCY"];

/// Parse the user-supplied QoS JSON document and validate it against the
/// product model. Rejects unknown keys, non-positive values, an `IOTYPE`
/// outside {0, 1, 2} and lower-bound qualities on the legacy family.
pub(crate) fn parse_and_validate(
    family: ProductFamily,
    document: &str,
) -> Result<QosSpec, Error> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(document)
        .map_err(|error| Error::InvalidParams {
            reason: format!("qos document is not a JSON object: {error}"),
        })?;

    let mut spec = BTreeMap::new();
    for (key, value) in raw {
        let value = value.as_u64().filter(|v| *v > 0 || key == IO_TYPE).ok_or_else(|| {
            Error::InvalidParams {
                reason: format!("qos quality '{key}' must be a positive integer"),
            }
        })?;
        if key == IO_TYPE {
            if value > 2 {
                return Err(Error::InvalidParams {
                    reason: format!("qos IOTYPE {value} is not one of 0, 1, 2"),
                });
            }
        } else if LOWER_BOUNDS.contains(&key.as_str()) {
            if family == ProductFamily::Legacy {
                return Err(Error::InvalidParams {
                    reason: format!("qos quality '{key}' is not supported by this array family"),
                });
            }
        } else if !UPPER_BOUNDS.contains(&key.as_str()) {
            return Err(Error::InvalidParams {
                reason: format!("unknown qos quality '{key}'"),
            });
        }
        spec.insert(key, value);
    }

    if !spec.keys().any(|k| k != IO_TYPE) {
        return Err(Error::InvalidParams {
            reason: "qos document carries no bandwidth, iops or latency quality".to_string(),
        });
    }

    Ok(QosSpec(spec))
}

#[cfg(test)]
mod tests {
    use super::parse_and_validate;
    use crate::ProductFamily;

    #[test]
    fn accepts_upper_bounds_on_both_families() {
        for family in [ProductFamily::Current, ProductFamily::Legacy] {
            let spec =
                parse_and_validate(family, r#"{"IOTYPE": 2, "MAXIOPS": 1000}"#).unwrap();
            assert_eq!(spec.0.get("MAXIOPS"), Some(&1000));
        }
    }

    #[test]
    fn rejects_lower_bounds_on_the_legacy_family() {
        parse_and_validate(ProductFamily::Legacy, r#"{"MINIOPS": 100}"#).unwrap_err();
        parse_and_validate(ProductFamily::Current, r#"{"MINIOPS": 100}"#).unwrap();
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        parse_and_validate(ProductFamily::Current, r#"{"MAXWHATEVER": 1}"#).unwrap_err();
        parse_and_validate(ProductFamily::Current, r#"{"MAXIOPS": 0}"#).unwrap_err();
        parse_and_validate(ProductFamily::Current, r#"{"MAXIOPS": -5}"#).unwrap_err();
        parse_and_validate(ProductFamily::Current, r#"{"IOTYPE": 3, "MAXIOPS": 10}"#)
            .unwrap_err();
        parse_and_validate(ProductFamily::Current, "[1, 2]").unwrap_err();
    }

    #[test]
    fn rejects_a_selector_only_document() {
        parse_and_validate(ProductFamily::Current, r#"{"IOTYPE": 2}"#).unwrap_err();
    }
}
