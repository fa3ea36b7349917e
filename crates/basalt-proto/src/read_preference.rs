use basalt_bson::Document;

/// Which server roles a read may be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreferenceMode {
    /// Only the writable server.
    Primary,
    /// The writable server when available, otherwise a read-only one.
    PrimaryPreferred,
    /// Only read-only servers.
    Secondary,
    /// A read-only server when available, otherwise the writable one.
    SecondaryPreferred,
    /// Any server; ties broken by lowest observed latency.
    Nearest,
}

/// A server-eligibility predicate attached to each outgoing message.
///
/// The optional tag document constrains the match further: a server is
/// eligible only if every tag element is present with an equal value in
/// the server's own tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPreference {
    mode: ReadPreferenceMode,
    tags: Option<Document>,
}

impl ReadPreference {
    pub fn primary() -> Self {
        Self {
            mode: ReadPreferenceMode::Primary,
            tags: None,
        }
    }

    pub fn primary_preferred() -> Self {
        Self {
            mode: ReadPreferenceMode::PrimaryPreferred,
            tags: None,
        }
    }

    pub fn secondary() -> Self {
        Self {
            mode: ReadPreferenceMode::Secondary,
            tags: None,
        }
    }

    pub fn secondary_preferred() -> Self {
        Self {
            mode: ReadPreferenceMode::SecondaryPreferred,
            tags: None,
        }
    }

    pub fn nearest() -> Self {
        Self {
            mode: ReadPreferenceMode::Nearest,
            tags: None,
        }
    }

    pub fn with_tags(mut self, tags: Document) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn mode(&self) -> ReadPreferenceMode {
        self.mode
    }

    pub fn tags(&self) -> Option<&Document> {
        self.tags.as_ref()
    }

    /// Whether the message may be answered by a non-writable server. Feeds
    /// the query `slaveOk` flag bit.
    pub fn is_secondary_ok(&self) -> bool {
        !matches!(self.mode, ReadPreferenceMode::Primary)
    }

    /// Role eligibility, before tag filtering.
    pub fn allows(&self, writable: bool) -> bool {
        match self.mode {
            ReadPreferenceMode::Primary => writable,
            ReadPreferenceMode::Secondary => !writable,
            ReadPreferenceMode::PrimaryPreferred
            | ReadPreferenceMode::SecondaryPreferred
            | ReadPreferenceMode::Nearest => true,
        }
    }

    /// Tag eligibility: every requested tag must be present and equal in
    /// the server's tags. A preference without tags matches everything.
    pub fn matches_tags(&self, server_tags: Option<&Document>) -> bool {
        let Some(wanted) = &self.tags else {
            return true;
        };
        if wanted.is_empty() {
            return true;
        }
        let Some(actual) = server_tags else {
            return false;
        };
        wanted
            .iter()
            .all(|tag| actual.get_value(tag.name()) == Some(tag.value()))
    }
}

impl Default for ReadPreference {
    fn default() -> Self {
        Self::primary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_bson::doc;

    #[test]
    fn primary_only_matches_writable() {
        let pref = ReadPreference::primary();
        assert!(pref.allows(true));
        assert!(!pref.allows(false));
        assert!(!pref.is_secondary_ok());
    }

    #[test]
    fn secondary_only_matches_read_only() {
        let pref = ReadPreference::secondary();
        assert!(!pref.allows(true));
        assert!(pref.allows(false));
        assert!(pref.is_secondary_ok());
    }

    #[test]
    fn preferred_modes_match_both_roles() {
        for pref in [
            ReadPreference::primary_preferred(),
            ReadPreference::secondary_preferred(),
            ReadPreference::nearest(),
        ] {
            assert!(pref.allows(true));
            assert!(pref.allows(false));
        }
    }

    #[test]
    fn tag_match_requires_all_requested_tags() {
        let pref = ReadPreference::nearest().with_tags(doc! { "dc": "east" });
        assert!(pref.matches_tags(Some(&doc! { "dc": "east", "rack": "2" })));
        assert!(!pref.matches_tags(Some(&doc! { "dc": "west" })));
        assert!(!pref.matches_tags(None));
    }

    #[test]
    fn empty_tags_match_anything() {
        let pref = ReadPreference::nearest().with_tags(doc! {});
        assert!(pref.matches_tags(None));
    }
}
