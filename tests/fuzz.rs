//! Randomized equivalence testing
//!
//! Drives a document and a plain nested value side by side with a random
//! stream of operations, asserting deep equality after every step, and
//! checks the flat-keyspace invariants at the end: one type marker per
//! occupied position, length caches matching actual child counts, dense
//! sequence indices.
//!
//! Two drivers share the scenario machinery: proptest strategies (with
//! shrinking) and a seeded `rand` walk over fixed seeds. Both run with
//! the ordered store, the unordered store, and with a commit after every
//! step.

use jotdb::{
    shared, Db, Entry, FlatPath, FlatStore, HashStore, MapRef, MemoryStore, PathKind, Scalar,
    SeqRef, SharedStore, Value,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

const KEYS: [&str; 6] = ["alpha", "beta", "g", "", "quo\"te", "back\\slash"];

#[derive(Debug, Clone)]
enum Op {
    /// Set a key (mapping) or overwrite an element (sequence)
    Assign {
        picks: Vec<u8>,
        pick: u8,
        value: Value,
    },
    /// Delete a key (mapping) or an element (sequence)
    Remove { picks: Vec<u8>, pick: u8 },
    /// Insert an element (sequence) or set a key (mapping)
    Insert {
        picks: Vec<u8>,
        pick: u8,
        value: Value,
    },
    /// Pop the last element (sequence) or the last key (mapping)
    Pop { picks: Vec<u8> },
    Commit,
    Rollback,
}

fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Int),
        (-100.0f64..100.0).prop_map(Value::Float),
        "[a-z]{0,6}".prop_map(Value::Text),
    ]
}

fn gen_value() -> impl Strategy<Value = Value> {
    scalar_value().prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Seq),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..3).prop_map(Value::Map),
        ]
    })
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let picks = prop::collection::vec(any::<u8>(), 0..4);
    prop_oneof![
        4 => (picks.clone(), any::<u8>(), gen_value())
            .prop_map(|(picks, pick, value)| Op::Assign { picks, pick, value }),
        2 => (picks.clone(), any::<u8>()).prop_map(|(picks, pick)| Op::Remove { picks, pick }),
        3 => (picks.clone(), any::<u8>(), gen_value())
            .prop_map(|(picks, pick, value)| Op::Insert { picks, pick, value }),
        1 => picks.prop_map(|picks| Op::Pop { picks }),
        1 => Just(Op::Commit),
        1 => Just(Op::Rollback),
    ]
}

/// One step into a container, by key or by index
#[derive(Debug, Clone)]
enum Seg {
    Key(String),
    Index(usize),
}

/// Walk the reference tree, choosing an existing nested container at
/// each step; stops when the cursor has no container children.
fn pick_container(root: &Value, picks: &[u8]) -> Vec<Seg> {
    let mut segs = Vec::new();
    let mut cursor = root;
    for &b in picks {
        let children: Vec<Seg> = match cursor {
            Value::Map(entries) => entries
                .iter()
                .filter(|(_, v)| v.is_container())
                .map(|(k, _)| Seg::Key(k.clone()))
                .collect(),
            Value::Seq(items) => items
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_container())
                .map(|(i, _)| Seg::Index(i))
                .collect(),
            _ => Vec::new(),
        };
        if children.is_empty() {
            break;
        }
        let seg = children[(b as usize) % children.len()].clone();
        cursor = match (&seg, cursor) {
            (Seg::Key(k), Value::Map(entries)) => entries.get(k).unwrap(),
            (Seg::Index(i), Value::Seq(items)) => &items[*i],
            _ => unreachable!(),
        };
        segs.push(seg);
    }
    segs
}

fn ref_navigate<'a>(root: &'a mut Value, segs: &[Seg]) -> &'a mut Value {
    let mut cursor = root;
    for seg in segs {
        cursor = match (seg, cursor) {
            (Seg::Key(k), Value::Map(entries)) => entries.get_mut(k).unwrap(),
            (Seg::Index(i), Value::Seq(items)) => &mut items[*i],
            _ => unreachable!(),
        };
    }
    cursor
}

enum Target {
    Map(MapRef),
    Seq(SeqRef),
}

fn db_target(db: &Db, segs: &[Seg]) -> Target {
    let mut target = Target::Map(db.root().unwrap());
    for seg in segs {
        let entry = match (&target, seg) {
            (Target::Map(map), Seg::Key(k)) => map.get(k).unwrap(),
            (Target::Seq(seq), Seg::Index(i)) => seq.get(*i as i64).unwrap(),
            _ => unreachable!(),
        };
        target = match entry {
            Entry::Map(map) => Target::Map(map),
            Entry::Seq(seq) => Target::Seq(seq),
            other => panic!("navigated into a scalar: {:?}", other),
        };
    }
    target
}

fn apply(db: &Db, staged: &mut Value, op: &Op) {
    let (picks, rest) = match op {
        Op::Assign { picks, .. } | Op::Remove { picks, .. } | Op::Insert { picks, .. } => {
            (picks.clone(), op)
        }
        Op::Pop { picks } => (picks.clone(), op),
        Op::Commit | Op::Rollback => unreachable!("handled by the driver"),
    };
    let segs = pick_container(staged, &picks);
    let target = db_target(db, &segs);
    let node = ref_navigate(staged, &segs);

    match (rest, target, node) {
        (Op::Assign { pick, value, .. }, Target::Map(map), Value::Map(entries))
        | (Op::Insert { pick, value, .. }, Target::Map(map), Value::Map(entries)) => {
            let key = KEYS[*pick as usize % KEYS.len()];
            map.set(key, value.clone()).unwrap();
            entries.insert(key.to_string(), value.clone());
        }
        (Op::Assign { pick, value, .. }, Target::Seq(seq), Value::Seq(items)) => {
            if items.is_empty() {
                seq.push(value.clone()).unwrap();
                items.push(value.clone());
            } else {
                let i = *pick as usize % items.len();
                seq.set(i as i64, value.clone()).unwrap();
                items[i] = value.clone();
            }
        }
        (Op::Insert { pick, value, .. }, Target::Seq(seq), Value::Seq(items)) => {
            let i = *pick as usize % (items.len() + 1);
            seq.insert(i as i64, value.clone()).unwrap();
            items.insert(i, value.clone());
        }
        (Op::Remove { pick, .. }, Target::Map(map), Value::Map(entries)) => {
            if entries.is_empty() {
                assert!(matches!(
                    map.delete("missing-key"),
                    Err(jotdb::Error::KeyMissing(_))
                ));
            } else {
                let key = entries
                    .keys()
                    .nth(*pick as usize % entries.len())
                    .unwrap()
                    .clone();
                map.delete(&key).unwrap();
                entries.remove(&key);
            }
        }
        (Op::Remove { pick, .. }, Target::Seq(seq), Value::Seq(items)) => {
            if items.is_empty() {
                assert!(matches!(
                    seq.delete(0),
                    Err(jotdb::Error::IndexOutOfRange { .. })
                ));
            } else {
                let i = *pick as usize % items.len();
                seq.delete(i as i64).unwrap();
                items.remove(i);
            }
        }
        (Op::Pop { .. }, Target::Seq(seq), Value::Seq(items)) => {
            if items.is_empty() {
                assert!(matches!(
                    seq.pop(),
                    Err(jotdb::Error::IndexOutOfRange { .. })
                ));
            } else {
                let popped = seq.pop().unwrap().to_value().unwrap();
                let expected = items.pop().unwrap();
                assert_eq!(popped, expected);
            }
        }
        (Op::Pop { .. }, Target::Map(map), Value::Map(entries)) => {
            if let Some(key) = entries.keys().next_back().cloned() {
                map.delete(&key).unwrap();
                entries.remove(&key);
            }
        }
        _ => unreachable!("target shape diverged from the reference"),
    }
}

fn run_scenario(store: SharedStore, ops: &[Op], commit_each_step: bool) {
    let db = Db::with_shared(store.clone());
    let mut committed = Value::map();
    let mut staged = Value::map();

    for op in ops {
        match op {
            Op::Commit => {
                db.commit().unwrap();
                committed = staged.clone();
            }
            Op::Rollback => {
                db.rollback().unwrap();
                staged = committed.clone();
            }
            other => apply(&db, &mut staged, other),
        }
        if commit_each_step {
            db.commit().unwrap();
            committed = staged.clone();
        }
        assert_eq!(db.export().unwrap(), staged, "after {:?}", op);
    }

    db.commit().unwrap();
    assert_eq!(db.export().unwrap(), staged);
    check_invariants(&store);
}

/// Validate the store-level invariants over the raw keyspace
fn check_invariants(store: &SharedStore) {
    #[derive(Default)]
    struct Position {
        value: bool,
        dict: bool,
        list: bool,
        length: Option<i64>,
    }

    let keys = store.lock().keys().unwrap();
    let mut positions: BTreeMap<String, Position> = BTreeMap::new();
    positions.entry(String::new()).or_default();

    for key in &keys {
        let path = FlatPath::from_encoded(key.as_str());
        let kind = path.kind().unwrap();
        assert!(kind.is_marker(), "stored key without terminator: {:?}", key);
        let prefix = path.prefix().unwrap();
        let position = positions.entry(prefix.as_str().to_string()).or_default();
        match kind {
            PathKind::ValueMarker => position.value = true,
            PathKind::DictMarker => position.dict = true,
            PathKind::ListMarker => position.list = true,
            PathKind::LengthMarker => match store.lock().get(key).unwrap() {
                Some(Scalar::Int(n)) => position.length = Some(n),
                other => panic!("length key {:?} holds {:?}", key, other),
            },
            PathKind::DictPrefix | PathKind::ListPrefix => unreachable!(),
        }
    }

    let occupied: BTreeSet<&String> = positions
        .iter()
        .filter(|(p, info)| !p.is_empty() && (info.value || info.dict || info.list))
        .map(|(p, _)| p)
        .collect();

    for (pos, info) in &positions {
        let markers = [info.value, info.dict, info.list]
            .iter()
            .filter(|m| **m)
            .count();
        if pos.is_empty() {
            // the root is implicitly a mapping
            assert_eq!(markers, 0, "root must not carry type markers");
        } else {
            assert_eq!(markers, 1, "position {:?} has {} type markers", pos, markers);
        }

        if info.dict || info.list || pos.is_empty() {
            let parent_path = FlatPath::from_encoded(pos.as_str());
            let mut indices = BTreeSet::new();
            let mut count = 0i64;
            for child in &occupied {
                let child_path = FlatPath::from_encoded(child.as_str());
                if let Ok(parent) = child_path.parent() {
                    if parent == parent_path {
                        count += 1;
                        if info.list {
                            indices.insert(child_path.index_number().unwrap());
                        }
                    }
                }
            }
            assert_eq!(
                count,
                info.length.unwrap_or(0),
                "length cache at {:?}",
                pos
            );
            if info.list {
                let expected: BTreeSet<usize> = (0..count as usize).collect();
                assert_eq!(indices, expected, "sequence at {:?} is not dense", pos);
            }
        } else {
            assert!(
                info.length.is_none(),
                "length key at scalar position {:?}",
                pos
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn fuzz_matches_reference_ordered(ops in prop::collection::vec(op_strategy(), 1..40)) {
        run_scenario(shared(MemoryStore::new()), &ops, false);
    }

    #[test]
    fn fuzz_matches_reference_unordered(ops in prop::collection::vec(op_strategy(), 1..25)) {
        run_scenario(shared(HashStore::new()), &ops, false);
    }

    #[test]
    fn fuzz_matches_reference_commit_each_step(ops in prop::collection::vec(op_strategy(), 1..25)) {
        run_scenario(shared(MemoryStore::new()), &ops, true);
    }
}

// === seeded random walk ===

fn random_key(rng: &mut StdRng) -> String {
    let length = rng.gen_range(0..=3);
    (0..length)
        .map(|_| char::from(b'a' + rng.gen_range(0..13u8)))
        .collect()
}

fn random_value(rng: &mut StdRng, depth: u8) -> Value {
    let variants = if depth == 0 { 5 } else { 7 };
    match rng.gen_range(0..variants) {
        0 => Value::Null,
        1 => Value::Bool(rng.gen()),
        2 => Value::Int(rng.gen_range(-1000..1000)),
        3 => Value::Float((rng.gen::<f64>() - 0.5) * 1000.0),
        4 => Value::Text(random_key(rng)),
        5 => Value::Seq(
            (0..rng.gen_range(0..3))
                .map(|_| random_value(rng, depth - 1))
                .collect(),
        ),
        _ => Value::Map(
            (0..rng.gen_range(0..3))
                .map(|_| (random_key(rng), random_value(rng, depth - 1)))
                .collect(),
        ),
    }
}

fn random_picks(rng: &mut StdRng) -> Vec<u8> {
    let length = rng.gen_range(0..4);
    (0..length).map(|_| rng.gen()).collect()
}

/// One weighted random operation, mirroring the strategy weights above
fn random_op(rng: &mut StdRng) -> Op {
    match rng.gen_range(0..12) {
        0..=3 => Op::Assign {
            picks: random_picks(rng),
            pick: rng.gen(),
            value: random_value(rng, 2),
        },
        4..=5 => Op::Remove {
            picks: random_picks(rng),
            pick: rng.gen(),
        },
        6..=8 => Op::Insert {
            picks: random_picks(rng),
            pick: rng.gen(),
            value: random_value(rng, 2),
        },
        9 => Op::Pop {
            picks: random_picks(rng),
        },
        10 => Op::Commit,
        _ => Op::Rollback,
    }
}

fn random_walk(seed: u64) -> Vec<Op> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..60).map(|_| random_op(&mut rng)).collect()
}

#[test]
fn fuzz_seeded_walk_ordered() {
    for seed in 0..10 {
        run_scenario(shared(MemoryStore::new()), &random_walk(seed), false);
    }
}

#[test]
fn fuzz_seeded_walk_unordered() {
    for seed in 10..16 {
        run_scenario(shared(HashStore::new()), &random_walk(seed), false);
    }
}

#[test]
fn fuzz_seeded_walk_commit_each_step() {
    for seed in 16..22 {
        run_scenario(shared(MemoryStore::new()), &random_walk(seed), true);
    }
}

#[test]
fn fuzz_regression_nested_insert() {
    let db = Db::in_memory();
    db.set("a", Value::seq()).unwrap();
    db.commit().unwrap();
    db.get("a")
        .unwrap()
        .as_seq()
        .unwrap()
        .insert(0, Value::seq())
        .unwrap();
    db.commit().unwrap();
    db.get("a")
        .unwrap()
        .as_seq()
        .unwrap()
        .get(0)
        .unwrap()
        .as_seq()
        .unwrap()
        .insert(0, 17)
        .unwrap();
    db.commit().unwrap();

    assert_eq!(db.export().unwrap(), Value::from(serde_json::json!({"a": [[17]]})));
}
