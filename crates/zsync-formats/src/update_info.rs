//! Update information strings
//!
//! An update information string tells a client where the control file for
//! the newest version lives. Fields are separated by `|`:
//!
//! | transport | fields |
//! |---|---|
//! | `zsync` | `zsync\|<control file url>` |
//! | `gh-releases-zsync` | `gh-releases-zsync\|<owner>\|<repo>\|<tag>\|<filename pattern>` |
//! | `bintray-zsync` | `bintray-zsync\|<user>\|<repo>\|<package>\|<filename>` |
//!
//! Strings read from a fixed-size binary section are often NUL padded; the
//! padding is stripped before parsing.

use std::fmt;
use std::str::FromStr;

use crate::error::UpdateInfoError;

/// Tag value selecting the provider's newest release
pub const LATEST_TAG: &str = "latest";

/// Where to find the control file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateInfo {
    /// Control file at a fixed URL
    Zsync {
        /// Control file URL
        url: String,
    },
    /// Control file attached to a GitHub release
    GithubReleases {
        /// Repository owner
        owner: String,
        /// Repository name
        repo: String,
        /// Release tag, or `latest`
        tag: String,
        /// Asset name, may contain `*` and `?`
        filename: String,
    },
    /// Control file on the legacy Bintray service, located through the
    /// `_latestVersion` redirect
    Bintray {
        /// Account name
        user: String,
        /// Repository name
        repo: String,
        /// Package name
        package: String,
        /// File name, may contain `_latestVersion`
        filename: String,
    },
}

impl UpdateInfo {
    /// Transport prefix of this descriptor
    pub fn transport(&self) -> &'static str {
        match self {
            Self::Zsync { .. } => "zsync",
            Self::GithubReleases { .. } => "gh-releases-zsync",
            Self::Bintray { .. } => "bintray-zsync",
        }
    }

    /// True for a GitHub release descriptor asking for the newest release
    pub fn wants_latest(&self) -> bool {
        matches!(self, Self::GithubReleases { tag, .. } if tag == LATEST_TAG)
    }
}

impl FromStr for UpdateInfo {
    type Err = UpdateInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if s.is_empty() {
            return Err(UpdateInfoError::Empty);
        }

        let fields: Vec<&str> = s.split('|').collect();
        let transport = fields[0];
        let expected = match transport {
            "zsync" => 1,
            "gh-releases-zsync" | "bintray-zsync" => 4,
            other => return Err(UpdateInfoError::UnsupportedTransport(other.to_string())),
        };

        if fields.len() - 1 != expected {
            return Err(UpdateInfoError::InvalidFieldCount {
                transport: transport.to_string(),
                expected,
                found: fields.len() - 1,
            });
        }

        let field = |index: usize, name: &'static str| -> Result<String, UpdateInfoError> {
            let value = fields[index].trim();
            if value.is_empty() {
                Err(UpdateInfoError::EmptyField(name))
            } else {
                Ok(value.to_string())
            }
        };

        match transport {
            "zsync" => Ok(Self::Zsync {
                url: field(1, "url")?,
            }),
            "gh-releases-zsync" => Ok(Self::GithubReleases {
                owner: field(1, "owner")?,
                repo: field(2, "repo")?,
                tag: field(3, "tag")?,
                filename: field(4, "filename")?,
            }),
            _ => Ok(Self::Bintray {
                user: field(1, "user")?,
                repo: field(2, "repo")?,
                package: field(3, "package")?,
                filename: field(4, "filename")?,
            }),
        }
    }
}

impl fmt::Display for UpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zsync { url } => write!(f, "zsync|{url}"),
            Self::GithubReleases {
                owner,
                repo,
                tag,
                filename,
            } => write!(f, "gh-releases-zsync|{owner}|{repo}|{tag}|{filename}"),
            Self::Bintray {
                user,
                repo,
                package,
                filename,
            } => write!(f, "bintray-zsync|{user}|{repo}|{package}|{filename}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_direct_url() {
        let info: UpdateInfo = "zsync|https://example.com/app.AppImage.zsync"
            .parse()
            .expect("Operation should succeed");
        assert_eq!(
            info,
            UpdateInfo::Zsync {
                url: "https://example.com/app.AppImage.zsync".to_string()
            }
        );
    }

    #[test]
    fn test_github_releases() {
        let raw = "gh-releases-zsync|AppImage|AppImageKit|continuous|appimagetool-*-x86_64.AppImage.zsync";
        let info: UpdateInfo = raw.parse().expect("Operation should succeed");
        assert_eq!(info.transport(), "gh-releases-zsync");
        assert!(!info.wants_latest());
        assert_eq!(info.to_string(), raw);
    }

    #[test]
    fn test_latest_tag() {
        let info: UpdateInfo = "gh-releases-zsync|o|r|latest|*.zsync"
            .parse()
            .expect("Operation should succeed");
        assert!(info.wants_latest());
    }

    #[test]
    fn test_bintray() {
        let info: UpdateInfo = "bintray-zsync|user|repo|pkg|app-_latestVersion-x86_64.AppImage.zsync"
            .parse()
            .expect("Operation should succeed");
        assert!(matches!(info, UpdateInfo::Bintray { ref package, .. } if package == "pkg"));
    }

    #[test]
    fn test_nul_padding_stripped() {
        let info: UpdateInfo = "zsync|http://x/y.zsync\0\0\0\0"
            .parse()
            .expect("Operation should succeed");
        assert_eq!(info.to_string(), "zsync|http://x/y.zsync");
    }

    #[test]
    fn test_errors() {
        assert_eq!("".parse::<UpdateInfo>(), Err(UpdateInfoError::Empty));
        assert_eq!("\0\0".parse::<UpdateInfo>(), Err(UpdateInfoError::Empty));
        assert_eq!(
            "ipfs|abc".parse::<UpdateInfo>(),
            Err(UpdateInfoError::UnsupportedTransport("ipfs".to_string()))
        );
        assert_eq!(
            "gh-releases-zsync|a|b".parse::<UpdateInfo>(),
            Err(UpdateInfoError::InvalidFieldCount {
                transport: "gh-releases-zsync".to_string(),
                expected: 4,
                found: 2
            })
        );
        assert_eq!(
            "zsync|".parse::<UpdateInfo>(),
            Err(UpdateInfoError::EmptyField("url"))
        );
    }
}
