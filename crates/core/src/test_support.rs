use crate::ids::OwnerId;
use crate::taxon::{Rank, TaxonChain, Visibility};

pub(crate) fn owner(id: u64) -> OwnerId {
    OwnerId::new(id).expect("owner id")
}

pub(crate) const CARNIVORA: [(Rank, &str); 4] = [
    (Rank::Kingdom, "Animalia"),
    (Rank::Phylum, "Chordata"),
    (Rank::Class, "Mammalia"),
    (Rank::Order, "Carnivora"),
];

pub(crate) fn chain(record_id: &str, owner_id: u64, ranks: &[(Rank, &str)]) -> TaxonChain {
    TaxonChain::new(
        record_id,
        owner(owner_id),
        Visibility::Public,
        1_700_000_000_000,
        ranks.iter().map(|(rank, name)| (*rank, name.to_string())),
    )
}

/// Carnivora prefix followed by the given tail.
pub(crate) fn carnivore(record_id: &str, owner_id: u64, tail: &[(Rank, &str)]) -> TaxonChain {
    let ranks = CARNIVORA
        .iter()
        .chain(tail.iter())
        .copied()
        .collect::<Vec<_>>();
    chain(record_id, owner_id, &ranks)
}

/// Owner 1 saw two Canis species, owner 2 saw a cat.
pub(crate) fn canis_felis() -> Vec<TaxonChain> {
    vec![
        carnivore(
            "a-wolf",
            1,
            &[
                (Rank::Family, "Canidae"),
                (Rank::Genus, "Canis"),
                (Rank::Species, "lupus"),
            ],
        ),
        carnivore(
            "a-dog",
            1,
            &[
                (Rank::Family, "Canidae"),
                (Rank::Genus, "Canis"),
                (Rank::Species, "familiaris"),
            ],
        ),
        carnivore(
            "b-cat",
            2,
            &[
                (Rank::Family, "Felidae"),
                (Rank::Genus, "Felis"),
                (Rank::Species, "catus"),
            ],
        ),
    ]
}

/// `families` families with `genera` genera each and `species` species per genus,
/// all observed by one owner.
pub(crate) fn synthetic_forest(families: usize, genera: usize, species: usize) -> Vec<TaxonChain> {
    let mut out = Vec::new();
    for f in 0..families {
        for g in 0..genera {
            for s in 0..species {
                let family = format!("Family{f}");
                let genus = format!("Genus{f}x{g}");
                let sp = format!("species{s}");
                out.push(carnivore(
                    &format!("rec-{f}-{g}-{s}"),
                    1,
                    &[
                        (Rank::Family, family.as_str()),
                        (Rank::Genus, genus.as_str()),
                        (Rank::Species, sp.as_str()),
                    ],
                ));
            }
        }
    }
    out
}
