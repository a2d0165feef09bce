//! The closed set of record kinds that own a raw/rendered BBCode pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of text-bearing record.
///
/// Each kind maps to exactly one table and one BBCode field. The tag form
/// (`newsitem`, `forumpost`, `forumuser`) is what save triggers enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A front-page news item; field `message`.
    NewsItem,
    /// A post inside a forum thread; field `message`.
    ForumPost,
    /// A forum user profile; field `signature`.
    ForumUser,
}

impl RecordKind {
    /// Every record kind, in a stable order.
    pub const ALL: [RecordKind; 3] = [Self::NewsItem, Self::ForumUser, Self::ForumPost];

    /// The tag used to identify this kind on the dispatch boundary.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NewsItem => "newsitem",
            Self::ForumPost => "forumpost",
            Self::ForumUser => "forumuser",
        }
    }

    /// Name of the BBCode field owned by this kind.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::NewsItem | Self::ForumPost => "message",
            Self::ForumUser => "signature",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newsitem" => Ok(Self::NewsItem),
            "forumpost" => Ok(Self::ForumPost),
            "forumuser" => Ok(Self::ForumUser),
            _ => Err(format!("Invalid record kind: {}", s)),
        }
    }
}
