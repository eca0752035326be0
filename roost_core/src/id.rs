use smallstr::SmallString;

/// The identifier a broker assigns to a job.
///
/// Job IDs are structured as `<kind>-<node>-<rest>`, where `<node>` names the cluster node that
/// accepted the job, e.g. `D-dcb833cf-8YL1NT17e9+wsA/09NqxscQI-05a1`.
// Short IDs stay inline; broker-assigned IDs are often a few bytes longer and spill to the heap
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(SmallString<[u8; 36]>);

impl MessageId {
    /// The segment of this ID naming the node which accepted the job.
    ///
    /// Returns `None` if the ID does not follow the `<kind>-<node>-<rest>` layout.
    pub fn node_prefix(&self) -> Option<&str> {
        let mut segments = self.0.splitn(3, '-');
        let _kind = segments.next()?;
        let node = segments.next()?;
        // the node must be followed by a separator to be distinguishable from the tail
        segments.next()?;
        if node.is_empty() {
            None
        } else {
            Some(node)
        }
    }

    /// The ID as a string slice
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self.0.as_str(), f)
    }
}

impl<'a> From<&'a str> for MessageId {
    fn from(s: &'a str) -> MessageId {
        MessageId(s.into())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> MessageId {
        MessageId(s.into())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::MessageId;

    #[test]
    fn node_prefix_of_broker_id() {
        let id = MessageId::from("D-dcb833cf-8YL1NT17e9+wsA/09NqxscQI-05a1");
        assert_eq!(id.node_prefix(), Some("dcb833cf"));
    }

    #[test]
    fn node_prefix_requires_three_segments() {
        assert_eq!(MessageId::from("D-dcb833cf").node_prefix(), None);
        assert_eq!(MessageId::from("plain").node_prefix(), None);
        assert_eq!(MessageId::from("D--rest").node_prefix(), None);
        assert_eq!(MessageId::from("").node_prefix(), None);
    }

    #[test]
    fn ids_longer_than_inline_capacity() {
        let long = "D-dcb833cf-8YL1NT17e9+wsA/09NqxscQI-05a1-0000000000000000";
        let id = MessageId::from(long);
        assert_eq!(id.as_str(), long);
        assert_eq!(id.node_prefix(), Some("dcb833cf"));
        assert_eq!(id, MessageId::from(String::from(long)));
        assert_eq!(id.to_string(), long);
    }

    #[test]
    fn node_prefix_ignores_later_separators() {
        let id = MessageId::from("D-node1-a-b-c");
        assert_eq!(id.node_prefix(), Some("node1"));
    }
}
