use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(CollectionId);
id_newtype!(EntryId);
id_newtype!(ComicId);
id_newtype!(ReviewId);

/// The two features built on ordered collections. Both share one table and
/// one reorder protocol; the kind only scopes which routes may address them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    List,
    Roadmap,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Roadmap => "roadmap",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = UnknownCollectionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Self::List),
            "roadmap" => Ok(Self::Roadmap),
            other => Err(UnknownCollectionKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection kind '{0}'")]
pub struct UnknownCollectionKind(pub String);

/// One requested placement inside a reorder: move `entry_id` to `new_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryOrder {
    pub entry_id: EntryId,
    pub new_order: i64,
}

/// Largest order an entry may hold. Live orders are `0..=MAX_ENTRY_ORDER`;
/// everything below zero is reserved for in-flight reorders.
pub const MAX_ENTRY_ORDER: i64 = i32::MAX as i64;

pub fn is_live_order(order: i64) -> bool {
    (0..=MAX_ENTRY_ORDER).contains(&order)
}
