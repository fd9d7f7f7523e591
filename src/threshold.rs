// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::catalog::{RulesetId, Sid, ThresholdId};
use crate::error::{Error, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdKind {
    Threshold,
    Suppress,
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdKind::Threshold => f.write_str("threshold"),
            ThresholdKind::Suppress => f.write_str("suppress"),
        }
    }
}

impl FromStr for ThresholdKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "threshold" => Ok(ThresholdKind::Threshold),
            "suppress" => Ok(ThresholdKind::Suppress),
            _ => Err(Error::InvalidThreshold(format!("unknown kind {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackBy {
    #[serde(rename = "by_src")]
    BySrc,
    #[serde(rename = "by_dst")]
    ByDst,
}

impl fmt::Display for TrackBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackBy::BySrc => f.write_str("by_src"),
            TrackBy::ByDst => f.write_str("by_dst"),
        }
    }
}

impl FromStr for TrackBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "by_src" | "src" => Ok(TrackBy::BySrc),
            "by_dst" | "dst" | "dest" => Ok(TrackBy::ByDst),
            _ => Err(Error::InvalidThreshold(format!("unknown track {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    Limit,
    Threshold,
    Both,
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateType::Limit => f.write_str("limit"),
            RateType::Threshold => f.write_str("threshold"),
            RateType::Both => f.write_str("both"),
        }
    }
}

impl FromStr for RateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "limit" => Ok(RateType::Limit),
            "threshold" => Ok(RateType::Threshold),
            "both" => Ok(RateType::Both),
            _ => Err(Error::InvalidThreshold(format!("unknown type {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    #[serde(rename = "type")]
    pub rate_type: RateType,
    pub count: u32,
    pub seconds: u32,
}

impl Default for Rate {
    fn default() -> Self {
        Self {
            rate_type: RateType::Limit,
            count: 1,
            seconds: 60,
        }
    }
}

/// The editable part of a threshold, shared by every ruleset it is added to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub kind: ThresholdKind,
    pub gid: u32,
    pub track_by: TrackBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<IpNetwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<Rate>,
}

impl ThresholdSpec {
    pub fn suppress(track_by: TrackBy, net: Option<IpNetwork>) -> Self {
        Self {
            kind: ThresholdKind::Suppress,
            gid: 1,
            track_by,
            net,
            rate: None,
        }
    }

    pub fn threshold(track_by: TrackBy, rate: Rate) -> Self {
        Self {
            kind: ThresholdKind::Threshold,
            gid: 1,
            track_by,
            net: None,
            rate: Some(rate),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.kind {
            ThresholdKind::Threshold => match self.rate {
                Some(rate) if rate.count == 0 || rate.seconds == 0 => Err(
                    Error::InvalidThreshold("count and seconds must be positive".to_string()),
                ),
                Some(_) => Ok(()),
                None => Err(Error::InvalidThreshold(
                    "threshold requires a type, count and seconds".to_string(),
                )),
            },
            ThresholdKind::Suppress => Ok(()),
        }
    }
}

pub fn parse_net(net: &str) -> Result<IpNetwork> {
    net.trim()
        .parse::<IpNetwork>()
        .map_err(|e| Error::InvalidThreshold(format!("invalid network {net}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub id: ThresholdId,
    pub sid: Sid,
    pub ruleset: RulesetId,
    pub spec: ThresholdSpec,
}

impl Threshold {
    /// True when `self` covers everything `other` would match: same kind and
    /// track, and either no network on `self` or a network containing
    /// `other`'s. A rate threshold never covers a suppression and the other
    /// way around.
    pub fn contains(&self, other: &ThresholdSpec) -> bool {
        contains(&self.spec, other)
    }
}

pub fn contains(a: &ThresholdSpec, b: &ThresholdSpec) -> bool {
    if a.kind != b.kind || a.track_by != b.track_by {
        return false;
    }
    match (&a.net, &b.net) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(outer), Some(inner)) => network_contains(outer, inner),
    }
}

fn network_contains(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    match (outer, inner) {
        (IpNetwork::V4(o), IpNetwork::V4(i)) => o.prefix() <= i.prefix() && o.contains(i.network()),
        (IpNetwork::V6(o), IpNetwork::V6(i)) => o.prefix() <= i.prefix() && o.contains(i.network()),
        _ => false,
    }
}

/// Existing thresholds of the same rule that already cover `candidate`.
pub fn containers<'a>(
    thresholds: impl IntoIterator<Item = &'a Threshold>,
    sid: Sid,
    candidate: &ThresholdSpec,
) -> Vec<&'a Threshold> {
    thresholds
        .into_iter()
        .filter(|t| t.sid == sid && t.contains(candidate))
        .collect()
}

impl fmt::Display for Threshold {
    /// threshold.config syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = &self.spec;
        match spec.kind {
            ThresholdKind::Suppress => {
                write!(
                    f,
                    "suppress gen_id {}, sig_id {}, track {}",
                    spec.gid, self.sid, spec.track_by
                )?;
                if let Some(net) = &spec.net {
                    write!(f, ", ip {net}")?;
                }
                Ok(())
            }
            ThresholdKind::Threshold => {
                let rate = spec.rate.unwrap_or_default();
                write!(
                    f,
                    "threshold gen_id {}, sig_id {}, type {}, track {}, count {}, seconds {}",
                    spec.gid, self.sid, rate.rate_type, spec.track_by, rate.count, rate.seconds
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suppress(track_by: TrackBy, net: Option<&str>) -> ThresholdSpec {
        ThresholdSpec::suppress(track_by, net.map(|n| parse_net(n).unwrap()))
    }

    #[test]
    fn test_contains_is_reflexive() {
        for spec in [
            suppress(TrackBy::BySrc, None),
            suppress(TrackBy::ByDst, Some("10.0.0.0/8")),
            suppress(TrackBy::BySrc, Some("2001:db8::/32")),
            ThresholdSpec::threshold(TrackBy::BySrc, Rate::default()),
        ] {
            assert!(contains(&spec, &spec));
        }
    }

    #[test]
    fn test_track_must_match() {
        assert!(!contains(
            &suppress(TrackBy::BySrc, None),
            &suppress(TrackBy::ByDst, None)
        ));
    }

    #[test]
    fn test_unbounded_covers_everything() {
        let any = suppress(TrackBy::BySrc, None);
        assert!(contains(&any, &suppress(TrackBy::BySrc, Some("192.168.1.1"))));
        assert!(!contains(&suppress(TrackBy::BySrc, Some("192.168.0.0/16")), &any));
    }

    #[test]
    fn test_subset_semantics() {
        let wide = suppress(TrackBy::BySrc, Some("10.0.0.0/8"));
        let narrow = suppress(TrackBy::BySrc, Some("10.1.0.0/16"));
        let host = suppress(TrackBy::BySrc, Some("10.1.2.3"));
        let other = suppress(TrackBy::BySrc, Some("172.16.0.0/12"));
        let v6 = suppress(TrackBy::BySrc, Some("::ffff:10.0.0.1/128"));

        assert!(contains(&wide, &narrow));
        assert!(contains(&narrow, &host));
        // Transitive with the subset chain.
        assert!(contains(&wide, &host));
        assert!(!contains(&narrow, &wide));
        assert!(!contains(&wide, &other));
        assert!(!contains(&wide, &v6));
    }

    #[test]
    fn test_kind_must_match() {
        let rate = ThresholdSpec::threshold(TrackBy::BySrc, Rate::default());
        let host = suppress(TrackBy::BySrc, Some("10.0.0.1"));
        assert!(!contains(&rate, &host));
        assert!(!contains(&suppress(TrackBy::BySrc, None), &rate));
        assert!(contains(
            &rate,
            &ThresholdSpec::threshold(
                TrackBy::BySrc,
                Rate {
                    count: 5,
                    ..Rate::default()
                }
            )
        ));

        let existing = Threshold {
            id: 1,
            sid: 1001,
            ruleset: 1,
            spec: rate,
        };
        assert!(containers([&existing], 1001, &host).is_empty());
    }

    #[test]
    fn test_containers() {
        let existing = vec![
            Threshold {
                id: 1,
                sid: 1001,
                ruleset: 1,
                spec: suppress(TrackBy::BySrc, Some("10.0.0.0/8")),
            },
            Threshold {
                id: 2,
                sid: 1002,
                ruleset: 1,
                spec: suppress(TrackBy::BySrc, None),
            },
        ];
        let candidate = suppress(TrackBy::BySrc, Some("10.2.0.0/16"));
        let found = containers(&existing, 1001, &candidate);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
        assert!(containers(&existing, 1003, &candidate).is_empty());
    }

    #[test]
    fn test_render() {
        let suppress = Threshold {
            id: 1,
            sid: 2000001,
            ruleset: 1,
            spec: suppress(TrackBy::BySrc, Some("10.0.0.0/8")),
        };
        assert_eq!(
            suppress.to_string(),
            "suppress gen_id 1, sig_id 2000001, track by_src, ip 10.0.0.0/8"
        );

        let threshold = Threshold {
            id: 2,
            sid: 2000002,
            ruleset: 1,
            spec: ThresholdSpec::threshold(
                TrackBy::ByDst,
                Rate {
                    rate_type: RateType::Both,
                    count: 5,
                    seconds: 120,
                },
            ),
        };
        assert_eq!(
            threshold.to_string(),
            "threshold gen_id 1, sig_id 2000002, type both, track by_dst, count 5, seconds 120"
        );
    }

    #[test]
    fn test_validate() {
        assert!(suppress(TrackBy::BySrc, None).validate().is_ok());
        let mut spec = ThresholdSpec::threshold(TrackBy::BySrc, Rate::default());
        assert!(spec.validate().is_ok());
        spec.rate = None;
        assert!(spec.validate().is_err());
        assert!(parse_net("not-a-net").is_err());
        assert!("sideways".parse::<TrackBy>().is_err());
    }
}
