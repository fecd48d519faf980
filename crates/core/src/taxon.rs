#![forbid(unsafe_code)]

use crate::ids::OwnerId;

/// Taxonomic rank, ordered root-most first. `Root` only labels the synthetic
/// tree root and never appears inside a [`TaxonChain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Root,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Subfamily,
    Genus,
    Species,
    Subspecies,
}

impl Rank {
    pub const CHAIN_RANKS: [Rank; 9] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Subfamily,
        Rank::Genus,
        Rank::Species,
        Rank::Subspecies,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Root => "root",
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Subfamily => "subfamily",
            Rank::Genus => "genus",
            Rank::Species => "species",
            Rank::Subspecies => "subspecies",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::CHAIN_RANKS
            .into_iter()
            .chain(std::iter::once(Rank::Root))
            .find(|rank| rank.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Private,
    Friends,
    Public,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Friends => "friends",
            Visibility::Public => "public",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "private" => Some(Visibility::Private),
            "friends" => Some(Visibility::Friends),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

/// One observation's classification path plus ownership metadata.
///
/// Construction normalizes the raw ranks: names are trimmed, blank entries
/// are dropped, and an entry that is not strictly deeper than the one before
/// it is discarded. The resulting `ranks()` are therefore strictly ordered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaxonChain {
    pub record_id: String,
    pub owner_id: OwnerId,
    pub updated_at_ms: i64,
    pub visibility: Visibility,
    pub scientific_name: Option<String>,
    ranks: Vec<(Rank, String)>,
}

impl TaxonChain {
    pub fn new(
        record_id: impl Into<String>,
        owner_id: OwnerId,
        visibility: Visibility,
        updated_at_ms: i64,
        raw_ranks: impl IntoIterator<Item = (Rank, String)>,
    ) -> Self {
        let mut ranks: Vec<(Rank, String)> = Vec::new();
        for (rank, name) in raw_ranks {
            if rank == Rank::Root {
                continue;
            }
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if ranks.last().is_some_and(|(prev, _)| *prev >= rank) {
                continue;
            }
            ranks.push((rank, name.to_string()));
        }
        Self {
            record_id: record_id.into(),
            owner_id,
            updated_at_ms,
            visibility,
            scientific_name: None,
            ranks,
        }
    }

    pub fn with_scientific_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.scientific_name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn ranks(&self) -> &[(Rank, String)] {
        &self.ranks
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn deepest(&self) -> Option<(Rank, &str)> {
        self.ranks.last().map(|(rank, name)| (*rank, name.as_str()))
    }

    /// Explicit scientific name when the source supplied one, otherwise the
    /// conventional binomial built from genus and species, otherwise the
    /// deepest resolved name.
    pub fn display_scientific_name(&self) -> Option<String> {
        if let Some(name) = self.scientific_name.as_deref() {
            return Some(name.to_string());
        }
        let genus = self.name_at(Rank::Genus);
        let species = self.name_at(Rank::Species);
        match (genus, species) {
            (Some(genus), Some(species)) if !species.contains(' ') => {
                Some(format!("{genus} {species}"))
            }
            (_, Some(species)) => Some(species.to_string()),
            _ => self.deepest().map(|(_, name)| name.to_string()),
        }
    }

    pub fn name_at(&self, rank: Rank) -> Option<&str> {
        self.ranks
            .iter()
            .find(|(candidate, _)| *candidate == rank)
            .map(|(_, name)| name.as_str())
    }
}
