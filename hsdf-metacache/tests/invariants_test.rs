//! Shadow-model property checks over arbitrary operation sequences
//!
//! A deliberately tiny table (5 slots) over a 12-address space makes
//! collisions, displacements, and renames frequent. The model predicts slot
//! placement, protect accounting, and every counter; operations that the
//! cache would refuse fatally (displacing a pinned entry, unmatched
//! unprotect) are skipped by the model rather than generated around.

use std::sync::Arc;

use hsdf_metacache::{Addr, EntryKind, Object};
use proptest::prelude::*;
use test_utils::{TestObject, cache_fixture, seed_blocks};

const NSLOTS: usize = 5;
const ADDR_SPACE: u64 = 12;

#[derive(Debug, Clone)]
enum Op {
    Find(u64),
    Set(u64),
    Protect(u64),
    Unprotect(usize),
    Rename(u64, u64),
    FlushAll,
    FlushEntry(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..ADDR_SPACE).prop_map(Op::Find),
        (0..ADDR_SPACE).prop_map(Op::Set),
        (0..ADDR_SPACE).prop_map(Op::Protect),
        (0usize..8).prop_map(Op::Unprotect),
        ((0..ADDR_SPACE), (0..ADDR_SPACE)).prop_map(|(a, b)| Op::Rename(a, b)),
        Just(Op::FlushAll),
        (0..ADDR_SPACE).prop_map(Op::FlushEntry),
    ]
}

struct ModelEntry {
    addr: u64,
    object: Object,
}

#[derive(Default)]
struct Model {
    slots: Vec<Option<ModelEntry>>,
    protects: Vec<(u64, Object)>,
    hits: u64,
    misses: u64,
    inits: u64,
    flushes: u64,
}

impl Model {
    fn new() -> Self {
        Self {
            slots: (0..NSLOTS).map(|_| None).collect(),
            ..Default::default()
        }
    }

    fn slot_of(addr: u64) -> usize {
        (addr % NSLOTS as u64) as usize
    }

    fn resident(&self, addr: u64) -> bool {
        self.slots[Self::slot_of(addr)]
            .as_ref()
            .is_some_and(|entry| entry.addr == addr)
    }

    fn slot_protected(&self, index: usize) -> bool {
        self.protects
            .iter()
            .any(|(addr, _)| Self::slot_of(*addr) == index)
    }

    fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cache_matches_a_shadow_model(ops in prop::collection::vec(op_strategy(), 1..50)) {
        let (container, types) = cache_fixture(NSLOTS);
        seed_blocks(&container, (0..ADDR_SPACE).map(Addr::new));
        let btree = types.descriptor(EntryKind::BtreeNode);
        let mut model = Model::new();

        for op in ops {
            match op {
                Op::Find(a) => {
                    let index = Model::slot_of(a);
                    if model.resident(a) {
                        model.hits += 1;
                        let object = container.find(&btree, Addr::new(a), None, None).unwrap();
                        let expected = &model.slots[index].as_ref().unwrap().object;
                        prop_assert!(Arc::ptr_eq(expected, &object), "hit must be exact");
                    } else {
                        if model.slots[index].is_some() && model.slot_protected(index) {
                            continue;
                        }
                        if model.slots[index].is_some() {
                            model.flushes += 1;
                        }
                        model.misses += 1;
                        model.inits += 1;
                        let object = container.find(&btree, Addr::new(a), None, None).unwrap();
                        model.slots[index] = Some(ModelEntry { addr: a, object });
                    }
                }
                Op::Set(a) => {
                    let index = Model::slot_of(a);
                    if model.slots[index].is_some() && model.slot_protected(index) {
                        continue;
                    }
                    if model.slots[index].is_some() {
                        model.flushes += 1;
                    }
                    model.inits += 1;
                    let object: Object = TestObject::new(format!("set@{a}").into_bytes());
                    container.set(&btree, Addr::new(a), Arc::clone(&object)).unwrap();
                    model.slots[index] = Some(ModelEntry { addr: a, object });
                }
                Op::Protect(a) => {
                    let index = Model::slot_of(a);
                    if model.resident(a) {
                        model.hits += 1;
                        let object = container.protect(&btree, Addr::new(a), None, None).unwrap();
                        let expected = &model.slots[index].as_ref().unwrap().object;
                        prop_assert!(Arc::ptr_eq(expected, &object), "pin must be exact");
                        model.protects.push((a, object));
                    } else {
                        if model.slots[index].is_some() && model.slot_protected(index) {
                            continue;
                        }
                        if model.slots[index].is_some() {
                            model.flushes += 1;
                        }
                        model.misses += 1;
                        model.inits += 1;
                        let object = container.protect(&btree, Addr::new(a), None, None).unwrap();
                        model.protects.push((a, Arc::clone(&object)));
                        model.slots[index] = Some(ModelEntry { addr: a, object });
                    }
                }
                Op::Unprotect(pick) => {
                    if model.protects.is_empty() {
                        continue;
                    }
                    let (a, object) = model.protects.remove(pick % model.protects.len());
                    container.unprotect(&btree, Addr::new(a), &object).unwrap();
                }
                Op::Rename(a, b) => {
                    if !model.resident(a) {
                        container.rename(&btree, Addr::new(a), Addr::new(b)).unwrap();
                        continue;
                    }
                    let old_index = Model::slot_of(a);
                    let new_index = Model::slot_of(b);
                    if old_index == new_index {
                        container.rename(&btree, Addr::new(a), Addr::new(b)).unwrap();
                        if let Some(entry) = model.slots[old_index].as_mut() {
                            entry.addr = b;
                        }
                        for (addr, _) in &mut model.protects {
                            if *addr == a {
                                *addr = b;
                            }
                        }
                    } else {
                        if model.slots[new_index].is_some() && model.slot_protected(new_index) {
                            continue;
                        }
                        if model.slots[new_index].is_some() {
                            model.flushes += 1;
                        }
                        container.rename(&btree, Addr::new(a), Addr::new(b)).unwrap();
                        let mut entry = model.slots[old_index].take().unwrap();
                        entry.addr = b;
                        model.slots[new_index] = Some(entry);
                        for (addr, _) in &mut model.protects {
                            if *addr == a {
                                *addr = b;
                            }
                        }
                    }
                }
                Op::FlushAll => {
                    model.flushes += model.occupied() as u64;
                    container.flush_all(false).unwrap();
                }
                Op::FlushEntry(a) => {
                    if model.resident(a) {
                        model.flushes += 1;
                    }
                    container.flush_entry(&btree, Addr::new(a), false).unwrap();
                }
            }

            // Accounting holds at every quiescent boundary.
            let report = container.cache_report().unwrap();
            prop_assert_eq!(report.nprots, model.protects.len());
            prop_assert_eq!(report.occupied, model.occupied());
        }

        // The full ledger matches: counters, loader calls, flush calls.
        let counters = container.cache_counters(EntryKind::BtreeNode).unwrap();
        prop_assert_eq!(counters.nhits, model.hits);
        prop_assert_eq!(counters.nmisses, model.misses);
        prop_assert_eq!(counters.ninits, model.inits);
        prop_assert_eq!(counters.nflushes, model.flushes);
        prop_assert_eq!(types.btree.log().load_count() as u64, model.misses);
        prop_assert_eq!(types.btree.log().flush_count() as u64, model.flushes);

        // Every entry the model says is resident hits, with identity, and
        // without another loader call.
        let loads_before = types.btree.log().load_count();
        for entry in model.slots.iter().flatten() {
            let object = container.find(&btree, Addr::new(entry.addr), None, None).unwrap();
            prop_assert!(Arc::ptr_eq(&entry.object, &object));
        }
        prop_assert_eq!(types.btree.log().load_count(), loads_before);
    }
}
