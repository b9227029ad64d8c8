//! Identifier types: facility monikers and item (product/raw material) names.
use itertools::Itertools;

/// Separator between the tokens of a moniker
pub const MONIKER_SEPARATOR: char = '/';

/// Separator between the two base monikers of a combined facility
pub const COMPOSITE_SEPARATOR: &str = "--";

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            std::hash::Hash,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            serde::Deserialize,
            Debug,
            serde::Serialize,
        )]
        #[serde(transparent)]
        /// A cheaply clonable string identifier
        pub struct $name(pub std::rc::Rc<str>);

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl $name {
            /// Create a new ID from a string slice
            pub fn new(id: &str) -> Self {
                $name(std::rc::Rc::from(id))
            }

            /// The ID as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id_type!(Moniker);
define_id_type!(ItemID);

impl Moniker {
    /// The `/`-separated tokens making up this moniker
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(MONIKER_SEPARATOR)
    }

    /// Join two monikers into the moniker of a combined facility
    pub fn composite(upstream: &Moniker, downstream: &Moniker) -> Moniker {
        format!("{upstream}{COMPOSITE_SEPARATOR}{downstream}").into()
    }

    /// Split a combined moniker into its upstream and downstream parts
    pub fn split_composite(&self) -> Option<(Moniker, Moniker)> {
        let (up, down) = self.0.split_once(COMPOSITE_SEPARATOR)?;
        Some((up.into(), down.into()))
    }

    /// Replace the token at `index`, padding with empty tokens if the moniker is too short
    pub fn with_token(&self, index: usize, token: &str) -> Moniker {
        let mut tokens = self.tokens().collect_vec();
        while tokens.len() <= index {
            tokens.push("");
        }
        tokens[index] = token;

        tokens.join(&MONIKER_SEPARATOR.to_string()).into()
    }
}
