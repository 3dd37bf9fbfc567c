use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use som::model::compute_reorder_diff;
use som::node_type::InMemoryNodeTypeRegistry;
use som::{ItemClass, SessionConfig, SessionObjectManager};

mod support;
use support::{seed_payload, FakeTransport};

#[derive(Debug, Clone)]
enum Op {
    Add { parent: usize, name: String },
    Move { src: usize, dst_parent: usize },
    Remove { target: usize },
}

fn arb_op(pool: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..pool, "[a-z]{1,6}").prop_map(|(parent, name)| Op::Add { parent, name }),
        (0..pool, 0..pool).prop_map(|(src, dst_parent)| Op::Move { src, dst_parent }),
        (0..pool).prop_map(|target| Op::Remove { target }),
    ]
}

proptest! {
    #[test]
    fn prop_any_sequence_leaves_session_in_a_readable_state(
        ops in prop::collection::vec(arb_op(6), 1..60)
    ) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut transport = FakeTransport::new(log);
        transport.seed("/", seed_payload("rep:root"));
        let mut session = SessionObjectManager::new(
            Box::new(transport),
            SessionConfig::default(),
            Box::new(InMemoryNodeTypeRegistry::new()),
        );

        // A small fixed pool of candidate paths; every op addresses one of
        // them by index, so most operations target already-known paths.
        let mut known = vec!["/".to_string()];

        for op in ops {
            match op {
                Op::Add { parent, name } => {
                    let parent_path = known[parent % known.len()].clone();
                    if let Ok(node) = session.add_node(&parent_path, &name, "nt:unstructured") {
                        known.push(node.path);
                    }
                }
                Op::Move { src, dst_parent } => {
                    let src_path = known[src % known.len()].clone();
                    let dst_parent_path = known[dst_parent % known.len()].clone();
                    if src_path != "/" {
                        let dst_path = format!(
                            "{}/{}",
                            dst_parent_path.trim_end_matches('/'),
                            src_path.rsplit('/').next().unwrap()
                        );
                        let _ = session.move_node(&src_path, &dst_path);
                    }
                }
                Op::Remove { target } => {
                    let target_path = known[target % known.len()].clone();
                    if target_path != "/" {
                        let _ = session.remove_item(&target_path, None);
                    }
                }
            }
        }

        // No matter what sequence of adds/moves/removes ran, every still
        // known path is either readable or cleanly rejected as not found -
        // never a panic, and never any other error kind.
        for path in &known {
            match session.get_node_by_path(path, ItemClass::Regular) {
                Ok(_) => {}
                Err(som::SomError::ItemNotFound(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error reading {path}: {other}"),
            }
        }
    }

    #[test]
    fn prop_reorder_diff_reconstructs_target_order(
        original in prop::collection::vec("[a-z]{1,4}", 1..12)
            .prop_filter("names must be unique", |v| {
                let set: std::collections::HashSet<_> = v.iter().collect();
                set.len() == v.len()
            }),
        seed in any::<u64>(),
    ) {
        let mut current = original.clone();
        // Deterministically shuffle using the seed, without touching the
        // banned Math.random()-style sources: a simple LCG is enough here.
        let mut state = seed.wrapping_add(1);
        for i in (1..current.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            current.swap(i, j);
        }

        let diff = compute_reorder_diff(&original, &current);
        let mut applied = original.clone();
        for step in &diff {
            let idx = applied.iter().position(|n| n == &step.name).unwrap();
            applied.remove(idx);
            match &step.before {
                Some(before) => {
                    let at = applied.iter().position(|n| n == before).unwrap();
                    applied.insert(at, step.name.clone());
                }
                None => applied.push(step.name.clone()),
            }
        }
        prop_assert_eq!(applied, current);
    }
}
