use std::cmp::Ordering;
use std::fmt;

/// A server version: dotted numeric components, possibly unknown.
///
/// Wire-version numbers map to a floor release; a floor never replaces a
/// precisely known version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    pub const UNKNOWN: Version = Version { parts: Vec::new() };

    pub fn parse(text: &str) -> Self {
        let parts = text
            .split('.')
            .map_while(|part| {
                // Trailing qualifiers like "-rc0" end the numeric prefix.
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect();
        Self { parts }
    }

    pub fn from_parts(parts: Vec<u32>) -> Self {
        Self { parts }
    }

    /// The release floor implied by a wire-protocol version. Coarse by
    /// construction; used only when no precise version is known.
    pub fn for_wire_version(wire: i32) -> Self {
        match wire {
            i32::MIN..=0 => Self::parse("2.4.0"),
            1 => Self::parse("2.5.2"),
            2 => Self::parse("2.5.4"),
            _ => Self::parse("2.6.0"),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.parts.is_empty()
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for at in 0..len {
            let a = self.parts.get(at).copied().unwrap_or(0);
            let b = other.parts.get(at).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return write!(f, "unknown");
        }
        for (at, part) in self.parts.iter().enumerate() {
            if at > 0 {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_dotted_and_qualified_forms() {
        assert_eq!(Version::parse("2.5.5"), Version::from_parts(vec![2, 5, 5]));
        assert_eq!(
            Version::parse("2.6.0-rc0"),
            Version::from_parts(vec![2, 6, 0])
        );
    }

    #[test]
    fn comparison_pads_with_zeros() {
        assert_eq!(Version::parse("2.6"), Version::parse("2.6.0"));
        assert!(Version::parse("2.6") < Version::parse("2.6.1"));
        assert!(Version::parse("10.0") > Version::parse("9.9.9"));
    }

    #[test]
    fn unknown_sorts_lowest() {
        assert!(Version::UNKNOWN < Version::parse("0.1"));
        assert!(Version::UNKNOWN.is_unknown());
    }

    #[test]
    fn wire_versions_are_floors() {
        assert!(Version::for_wire_version(0) < Version::for_wire_version(1));
        assert!(Version::for_wire_version(2) < Version::for_wire_version(3));
        assert_eq!(
            Version::for_wire_version(9),
            Version::for_wire_version(3)
        );
    }

    #[test]
    fn display_is_dotted() {
        assert_eq!(Version::parse("2.5.5").to_string(), "2.5.5");
        assert_eq!(Version::UNKNOWN.to_string(), "unknown");
    }
}
