//==============================================
// File: tests/value_model.rs
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Exercise cell ownership through the public API
// Objective: Verify live-cell accounting, deep release and arena exhaustion
//==============================================

use serde_json::json;
use solvra_substrate::{Arena, CellKind, ErrorFlag, SubstrateError, SubstrateRuntime};

fn arena(cells: usize) -> Arena {
    Arena::new(cells, 4096)
}

#[test]
fn releasing_an_array_frees_everything_it_owns() {
    let arena = arena(64);
    let before = arena.live_cells();
    let outer = {
        let number = arena.number(1.0).expect("number");
        let text = arena.string("x").expect("string");
        let inner = arena
            .array(vec![arena.number(2.0).expect("number")])
            .expect("inner");
        arena.array(vec![number, text, inner]).expect("outer")
    };
    assert_eq!(arena.live_cells(), before + 5);
    assert_eq!(outer.cell_count(), 5);
    drop(outer);
    assert_eq!(arena.live_cells(), before);
}

#[test]
fn shared_children_survive_their_parent() {
    let arena = arena(64);
    let shared = arena.string("kept").expect("string");
    let parent = arena
        .array(vec![shared.clone(), arena.number(3.0).expect("number")])
        .expect("parent");
    assert_eq!(shared.ref_count(), 2);
    let live = arena.live_cells();
    drop(parent);
    assert_eq!(arena.live_cells(), live - 2);
    assert_eq!(shared.ref_count(), 1);
    assert_eq!(shared.as_string().as_deref(), Some("kept"));
}

#[test]
fn deep_nesting_releases_without_recursion() {
    let depth = 20_000;
    let arena = arena(depth + 16);
    let mut current = arena.number(0.0).expect("leaf");
    for _ in 0..depth {
        current = arena.array(vec![current]).expect("nest");
    }
    assert_eq!(arena.live_cells(), depth + 1);
    drop(current);
    assert_eq!(arena.live_cells(), 0);
}

#[test]
fn exhaustion_reports_out_of_memory_and_sets_flags() {
    let arena = arena(16);
    let mut held = Vec::new();
    let err = loop {
        match arena.number(held.len() as f64) {
            Ok(value) => held.push(value),
            Err(err) => break err,
        }
    };
    assert_eq!(held.len(), 16);
    assert!(matches!(err, SubstrateError::OutOfMemory { .. }));
    assert_eq!(arena.error_flags(), vec![ErrorFlag::LowMemory, ErrorFlag::Memory]);

    held.clear();
    assert_eq!(arena.live_cells(), 0);
    assert_eq!(
        arena.take_error_flags(),
        vec![ErrorFlag::LowMemory, ErrorFlag::Memory]
    );
    assert!(arena.error_flags().is_empty());
}

#[test]
fn pinned_cells_never_run_out() {
    let arena = arena(16);
    let held: Vec<_> = (0..16).map(|_| arena.number(1.0).expect("fill")).collect();
    assert_eq!(arena.undefined().kind(), CellKind::Undefined);
    assert_eq!(arena.null().kind(), CellKind::Null);
    assert_eq!(arena.live_cells(), held.len());
}

#[test]
fn json_bridge_preserves_structure() {
    let arena = arena(64);
    let document = json!({ "name": "probe", "samples": [1, 2.5, null], "enabled": true });
    let value = arena.from_json(&document).expect("from json");
    assert_eq!(value.kind(), CellKind::Object);
    assert_eq!(
        value.to_json(),
        json!({ "name": "probe", "samples": [1, 2.5, null], "enabled": 1 })
    );
}

#[test]
fn size_reports_children() {
    let runtime = SubstrateRuntime::new();
    let arena = runtime.arena();
    let nested = arena
        .from_json(&json!({ "a": [1, 2], "b": "x" }))
        .expect("value");
    let depth = arena.integer(2).expect("depth");
    let report = runtime
        .invoke("getSizeOf", &[nested, depth])
        .expect("getSizeOf");
    assert_eq!(
        report.to_json(),
        json!([
            { "name": "a", "size": 3, "more": [
                { "name": "0", "size": 1 },
                { "name": "1", "size": 1 }
            ] },
            { "name": "b", "size": 1 }
        ])
    );
}

//==============================================
// End of file
//==============================================
