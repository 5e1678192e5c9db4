//! Closed vocabularies the LLM must classify papers into.
//!
//! Values outside a vocabulary are kept as `Unrecognized(raw)` instead of failing the
//! whole analysis record, and round-trip verbatim through storage.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! taxonomy {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Unrecognized(String),
        }

        impl $name {
            /// Every recognised vocabulary item, in prompt order.
            pub const OPTIONS: &'static [&'static str] = &[$($label),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $label,)+
                    $name::Unrecognized(raw) => raw.as_str(),
                }
            }

            pub fn is_recognized(&self) -> bool {
                !matches!(self, $name::Unrecognized(_))
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                let normalized = raw.trim().to_lowercase().replace(['_', ' '], "-");
                match normalized.as_str() {
                    $($label => $name::$variant,)+
                    _ => $name::Unrecognized(raw.trim().to_string()),
                }
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                $name::from(raw.as_str())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

taxonomy!(
    /// Level of biological organisation the study addresses.
    EvolutionaryScale {
        Molecular => "molecular",
        Individual => "individual",
        Population => "population",
        Species => "species",
    }
);

taxonomy!(
    ResearchMethod {
        Phylogenetic => "phylogenetic",
        PopulationGenetic => "population-genetic",
        Experimental => "experimental",
        Comparative => "comparative",
    }
);

taxonomy!(
    EvolutionaryMechanism {
        NaturalSelection => "natural-selection",
        Drift => "drift",
        GeneFlow => "gene-flow",
        Mutation => "mutation",
        SexualSelection => "sexual-selection",
        ArtificialSelection => "artificial-selection",
    }
);
