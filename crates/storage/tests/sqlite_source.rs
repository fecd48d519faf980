use rusqlite::Connection;
use std::collections::BTreeSet;
use tt_core::source::{ChangeFeed, FriendDirectory, RecordFilter, RecordSource};
use tt_core::{OwnerId, Rank, Visibility};
use tt_storage::{ObservationWrite, SqliteStore, StoreError};

fn owner(id: u64) -> OwnerId {
    OwnerId::new(id).expect("owner id")
}

fn observation(record_id: &str, owner_id: u64, visibility: Visibility) -> ObservationWrite {
    ObservationWrite {
        record_id: record_id.to_string(),
        owner_id: owner(owner_id),
        visibility,
        updated_at_ms: 1_000,
        scientific_name: None,
        ranks: vec![
            (Rank::Kingdom, "Animalia".to_string()),
            (Rank::Order, "Carnivora".to_string()),
            (Rank::Family, "Canidae".to_string()),
            (Rank::Genus, "Canis".to_string()),
            (Rank::Species, "lupus".to_string()),
        ],
    }
}

fn filter(owners: &[u64], viewer: Option<u64>, friends: bool) -> RecordFilter {
    RecordFilter {
        owners: owners.iter().map(|id| owner(*id)).collect(),
        viewer: viewer.map(owner),
        include_friends_visibility: friends,
    }
}

#[test]
fn chains_round_trip_with_gaps_and_visibility() {
    let store = SqliteStore::open_in_memory().expect("in-memory store should open");
    let mut wolf = observation("r-wolf", 1, Visibility::Private);
    wolf.scientific_name = Some("Canis lupus lupus".to_string());
    store.upsert_observation(&wolf).expect("insert");
    store
        .upsert_observation(&observation("r-friend", 2, Visibility::Friends))
        .expect("insert");
    store
        .upsert_observation(&observation("r-public", 3, Visibility::Public))
        .expect("insert");

    let own = store
        .fetch_chains(&filter(&[1], Some(1), false))
        .expect("fetch");
    assert_eq!(own.len(), 1);
    let chain = &own[0];
    assert_eq!(chain.record_id, "r-wolf");
    assert_eq!(chain.visibility, Visibility::Private);
    assert_eq!(chain.name_at(Rank::Phylum), None);
    assert_eq!(chain.deepest(), Some((Rank::Species, "lupus")));
    assert_eq!(
        chain.display_scientific_name().as_deref(),
        Some("Canis lupus lupus")
    );

    let with_friends = store
        .fetch_chains(&filter(&[1, 2, 3], Some(1), true))
        .expect("fetch");
    assert_eq!(with_friends.len(), 3);

    let public_only = store
        .fetch_chains(&filter(&[1, 2, 3], None, false))
        .expect("fetch");
    let ids = public_only
        .iter()
        .map(|chain| chain.record_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["r-public"]);

    assert_eq!(
        store.public_owner_ids().expect("owners"),
        BTreeSet::from([owner(3)])
    );
}

#[test]
fn friendships_are_symmetric() {
    let store = SqliteStore::open_in_memory().expect("store");
    store.add_friendship(owner(1), owner(2), 5).expect("befriend");
    store.add_friendship(owner(2), owner(1), 6).expect("idempotent");
    assert_eq!(store.friend_ids(owner(1)).expect("friends"), BTreeSet::from([owner(2)]));
    assert_eq!(store.friend_ids(owner(2)).expect("friends"), BTreeSet::from([owner(1)]));
    assert!(matches!(
        store.add_friendship(owner(4), owner(4), 7),
        Err(StoreError::InvalidInput(_))
    ));

    assert!(store.remove_friendship(owner(2), owner(1)).expect("unfriend"));
    assert!(store.friend_ids(owner(1)).expect("friends").is_empty());
}

#[test]
fn every_write_lands_in_the_change_log() {
    let store = SqliteStore::open_in_memory().expect("store");
    assert_eq!(store.latest_seq().expect("seq"), 0);

    store
        .upsert_observation(&observation("r1", 1, Visibility::Public))
        .expect("insert");
    let mut moved = observation("r1", 2, Visibility::Public);
    moved.updated_at_ms = 2_000;
    store.upsert_observation(&moved).expect("reassign owner");
    assert!(store.delete_observation("r1").expect("delete"));
    assert!(!store.delete_observation("r1").expect("delete twice"));

    let changes = store.changes_since(0, 100).expect("changes");
    let owners = changes
        .iter()
        .map(|change| change.owner_id.get())
        .collect::<Vec<_>>();
    // insert(1), update(new owner 2), update(old owner 1), delete(2)
    assert_eq!(owners, vec![1, 2, 1, 2]);
    assert!(changes.windows(2).all(|pair| pair[0].seq < pair[1].seq));

    let tail = store.changes_since(changes[1].seq, 1).expect("tail");
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].seq, changes[2].seq);
    assert_eq!(store.latest_seq().expect("seq"), changes[3].seq);
}

#[test]
fn reopening_a_file_keeps_data_and_foreign_schemas_are_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("nested").join("records.db");
    {
        let store = SqliteStore::open(&db_path).expect("fresh store");
        store
            .upsert_observation(&observation("r1", 1, Visibility::Public))
            .expect("insert");
    }
    let reopened = SqliteStore::open(&db_path).expect("reopen");
    assert_eq!(reopened.public_owner_ids().expect("owners").len(), 1);

    let foreign = dir.path().join("foreign.db");
    let conn = Connection::open(&foreign).expect("foreign db");
    conn.execute("CREATE TABLE legacy(id TEXT PRIMARY KEY)", [])
        .expect("legacy table");
    drop(conn);
    let err = SqliteStore::open(&foreign).expect_err("foreign schema must be rejected");
    assert_eq!(err.code(), "RESET_REQUIRED");
}

#[test]
fn empty_owner_set_fetches_nothing() {
    let store = SqliteStore::open_in_memory().expect("store");
    store
        .upsert_observation(&observation("r1", 1, Visibility::Public))
        .expect("insert");
    assert!(store.fetch_chains(&filter(&[], None, false)).expect("fetch").is_empty());
}
