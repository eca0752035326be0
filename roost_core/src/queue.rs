use smallstr::SmallString;

/// The name of a job queue from which messages can be consumed
// Queue names seen in practice are short; most fit inline without allocating
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "String", into = "String")
)]
pub struct Queue(SmallString<[u8; 24]>);

impl Default for Queue {
    fn default() -> Self {
        Queue(SmallString::new())
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self.0.as_str(), f)
    }
}

impl<'a> From<&'a str> for Queue {
    fn from(s: &'a str) -> Queue {
        Queue(s.into())
    }
}

impl From<String> for Queue {
    fn from(s: String) -> Queue {
        Queue(s.into())
    }
}

impl AsRef<str> for Queue {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<Queue> for String {
    fn from(q: Queue) -> String {
        q.0.into_string()
    }
}
