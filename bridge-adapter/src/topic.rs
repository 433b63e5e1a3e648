//! Control-plane topic parsing.
//!
//! Devices publish on topics shaped like `/p2p/device_public/<address>`, where
//! the address token is either a bare MAC with `_` separators or a composite
//! `<group>@@@<mac>@@@<uuid>` token. This module turns such a topic into the
//! canonical colon-separated [`DeviceId`].

use crate::types::DeviceId;

/// Literals describing where the address token lives in a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    /// Number of `/`-separated segments, counting the empty one before a leading `/`
    pub segment_count: usize,
    /// Index of the segment holding the address token
    pub address_index: usize,
    /// Separator between fields of a composite address token
    pub composite_separator: String,
    /// Index of the MAC field inside a composite token
    pub mac_field_index: usize,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            segment_count: 4,
            address_index: 3,
            composite_separator: "@@@".to_string(),
            mac_field_index: 1,
        }
    }
}

impl TopicScheme {
    /// Check the scheme is internally consistent.
    pub fn validate(&self) -> Result<(), crate::BridgeError> {
        if self.address_index >= self.segment_count {
            return Err(crate::BridgeError::Configuration(format!(
                "Topic address index {} out of range for {} segments",
                self.address_index, self.segment_count
            )));
        }
        if self.composite_separator.is_empty() {
            return Err(crate::BridgeError::Configuration(
                "Composite separator must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a topic under this scheme.
    ///
    /// Returns `None` when the segment count is wrong, a composite token has
    /// too few fields, or the resulting identifier would be empty.
    pub fn parse(&self, topic: &str) -> Option<TopicAddress> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() != self.segment_count {
            return None;
        }
        let token = *segments.get(self.address_index)?;

        let (mac, group, session_uuid) = if token.contains(self.composite_separator.as_str()) {
            let fields: Vec<&str> = token.split(self.composite_separator.as_str()).collect();
            if fields.len() < 2 {
                return None;
            }
            let mac = fields.get(self.mac_field_index).copied()?;
            let group = fields
                .iter()
                .enumerate()
                .find(|(i, _)| *i != self.mac_field_index)
                .map(|(_, f)| f.to_string());
            let session_uuid = fields
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != self.mac_field_index)
                .nth(1)
                .map(|(_, f)| f.to_string());
            (mac, group, session_uuid)
        } else {
            (token, None, None)
        };

        let device_id = mac.replace('_', ":");
        if device_id.is_empty() {
            return None;
        }

        Some(TopicAddress {
            raw_token: token.to_string(),
            device_id: DeviceId::new(device_id),
            group,
            session_uuid,
        })
    }
}

/// The device addressing recovered from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    /// Address token exactly as it appeared in the topic
    pub raw_token: String,
    /// Canonical device identifier
    pub device_id: DeviceId,
    /// Group qualifier of a composite token
    pub group: Option<String>,
    /// Session qualifier of a composite token
    pub session_uuid: Option<String>,
}

/// Parse a topic with the default scheme.
pub fn parse_topic(topic: &str) -> Option<TopicAddress> {
    TopicScheme::default().parse(topic)
}

/// Resolve the device identifier of a topic with the default scheme.
pub fn device_id_from_topic(topic: &str) -> Option<DeviceId> {
    parse_topic(topic).map(|address| address.device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("/a/b/c/ba_8f_17_de_94_94", Some("ba:8f:17:de:94:94"))]
    #[case(
        "/a/b/c/GID_test@@@ba_8f_17_de_94_94@@@e4b0c442-98fc-4e1b-8c3d-6a5b6a5b6a6d",
        Some("ba:8f:17:de:94:94")
    )]
    #[case("/onlyTwo/segments", None)]
    #[case("/a/b/c/d/ba_8f_17_de_94_94", None)]
    #[case("/a/b/c/", None)]
    #[case("/a/b/c/GID_test@@@", None)]
    #[case("/a/b/c/GID_test@@@ba_8f", Some("ba:8f"))]
    #[case("/a/b/c/aabbccddeeff", Some("aabbccddeeff"))]
    fn test_device_id_from_topic(#[case] topic: &str, #[case] expected: Option<&str>) {
        assert_eq!(device_id_from_topic(topic), expected.map(DeviceId::new));
    }

    #[test]
    fn test_device_public_topic() {
        // the leading `/` contributes an empty first segment
        let address = parse_topic("/p2p/device_public/ba_8f_17_de_94_94").unwrap();
        assert_eq!(address.device_id, DeviceId::new("ba:8f:17:de:94:94"));
        assert_eq!(address.raw_token, "ba_8f_17_de_94_94");
        assert_eq!(address.group, None);
        assert_eq!(address.session_uuid, None);
    }

    #[test]
    fn test_composite_token_qualifiers() {
        let address = parse_topic(
            "/a/b/c/GID_test@@@ba_8f_17_de_94_94@@@e4b0c442-98fc-4e1b-8c3d-6a5b6a5b6a6d",
        )
        .unwrap();
        assert_eq!(
            address.raw_token,
            "GID_test@@@ba_8f_17_de_94_94@@@e4b0c442-98fc-4e1b-8c3d-6a5b6a5b6a6d"
        );
        assert_eq!(address.group.as_deref(), Some("GID_test"));
        assert_eq!(
            address.session_uuid.as_deref(),
            Some("e4b0c442-98fc-4e1b-8c3d-6a5b6a5b6a6d")
        );
    }

    #[test]
    fn test_custom_scheme() {
        let scheme = TopicScheme {
            segment_count: 3,
            address_index: 2,
            ..Default::default()
        };
        assert!(scheme.validate().is_ok());
        assert_eq!(
            scheme.parse("devices/up/aa_bb").map(|a| a.device_id),
            Some(DeviceId::new("aa:bb"))
        );
        assert!(scheme.parse("/a/b/c/aa_bb").is_none());
    }

    #[test]
    fn test_unvalidated_scheme_index_out_of_range() {
        let scheme = TopicScheme {
            segment_count: 2,
            address_index: 3,
            ..Default::default()
        };
        assert!(scheme.validate().is_err());
        assert!(scheme.parse("/aa_bb").is_none());
    }

    #[test]
    fn test_scheme_validation() {
        let scheme = TopicScheme {
            address_index: 4,
            ..Default::default()
        };
        assert!(scheme.validate().is_err());

        let scheme = TopicScheme {
            composite_separator: String::new(),
            ..Default::default()
        };
        assert!(scheme.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_plain_token_maps_underscores(token in "[0-9a-f]{2}(_[0-9a-f]{2}){5}") {
            let topic = format!("/p2p/device_public/{}", token);
            let address = parse_topic(&topic).unwrap();
            prop_assert_eq!(address.device_id.as_str(), token.replace('_', ":"));
            prop_assert_eq!(address.raw_token, token);
        }

        #[test]
        fn prop_wrong_depth_never_resolves(depth in 0usize..8, token in "[a-z_]{1,12}") {
            prop_assume!(depth != 2);
            let topic = format!("{}/{}", "/x".repeat(depth), token);
            prop_assert!(parse_topic(&topic).is_none());
        }

        #[test]
        fn prop_parser_never_yields_empty_id(topic in "[/a-z_@]{0,40}") {
            if let Some(address) = parse_topic(&topic) {
                prop_assert!(!address.device_id.as_str().is_empty());
            }
        }
    }
}
