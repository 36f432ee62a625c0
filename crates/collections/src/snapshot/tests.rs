use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::GuardStrategy;

type Log = Arc<Mutex<Vec<ChangeDescriptor<(String, i32)>>>>;

fn recording<M: MapBackend<String, i32>>(map: &ObservableAssociativeSnapshot<String, i32, M>) -> Log {
	let log: Log = Arc::default();
	let sink = Arc::clone(&log);
	map.subscribe(move |d| sink.lock().push(d.clone()));
	log
}

fn seeded(entries: &[(&str, i32)]) -> ObservableHashMap<String, i32> {
	entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn add_rejects_existing_key() {
	let map = seeded(&[("a", 1)]);
	let log = recording(&map);

	let err = map.add("a".into(), 2).unwrap_err();
	assert_eq!(err, CollectionError::DuplicateKey { key: "\"a\"".into() });
	assert_eq!(map.get(&"a".into()), Some(1));
	assert!(log.lock().is_empty());
}

#[test]
fn insert_reports_add_then_replace() {
	let map = ObservableHashMap::new();
	let log = recording(&map);

	assert_eq!(map.insert("k".into(), 1).unwrap(), None);
	assert_eq!(map.insert("k".into(), 2).unwrap(), Some(1));

	assert_eq!(
		*log.lock(),
		vec![
			ChangeDescriptor::added(vec![("k".into(), 1)], None),
			ChangeDescriptor::replaced(vec![("k".into(), 2)], vec![("k".into(), 1)], None),
		]
	);
}

#[test]
fn remove_missing_key_publishes_nothing() {
	let map = seeded(&[("a", 1)]);
	let log = recording(&map);

	assert_eq!(map.remove(&"z".into()).unwrap(), None);
	assert_eq!(map.remove(&"a".into()).unwrap(), Some(1));

	assert_eq!(*log.lock(), vec![ChangeDescriptor::removed(vec![("a".into(), 1)], None)]);
}

#[test]
fn snapshots_do_not_observe_later_commits() {
	let map = seeded(&[("a", 1)]);
	let before = map.snapshot();

	map.insert("b".into(), 2).unwrap();
	map.remove(&"a".into()).unwrap();

	assert_eq!(before.len(), 1);
	assert_eq!(before.get(&"a".into()), Some(&1));
	assert!(!before.contains_key(&"b".into()));
	assert!(!before.ptr_eq(&map.snapshot()));
	assert_eq!(map.keys(), vec!["b".to_string()]);
}

#[test]
fn cancelled_operation_changes_nothing() {
	let map = seeded(&[("a", 1)]);
	let log = recording(&map);
	let before = map.snapshot();

	assert!(!map.do_operation(|snap| snap.without(&"missing".into())).unwrap());

	assert!(before.ptr_eq(&map.snapshot()));
	assert!(log.lock().is_empty());
}

#[test]
fn committed_operation_publishes_reset() {
	let map = seeded(&[("a", 1), ("b", 2)]);
	let log = recording(&map);

	let committed = map
		.do_operation(|snap| {
			let mut next = snap.to_map();
			next.remove(&"a".to_string());
			next.insert("c".into(), 3);
			Some(next)
		})
		.unwrap();

	assert!(committed);
	assert_eq!(map.len(), 2);
	assert_eq!(map.get(&"c".into()), Some(3));
	assert_eq!(*log.lock(), vec![ChangeDescriptor::reset()]);
}

#[test]
fn try_operation_skips_transform_while_writer_busy() {
	let map = ObservableHashMap::<String, i32>::with_config(GuardConfig::spin());
	let permit = map.writer.try_lock().unwrap();

	let mut called = false;
	assert!(!map.try_operation(|snap| {
		called = true;
		Some(snap.with_value("x".into(), 1))
	}));
	assert!(!called);

	drop(permit);
	assert!(map.try_operation(|snap| Some(snap.with_value("x".into(), 1))));
	assert_eq!(map.get(&"x".into()), Some(1));
}

#[test]
fn add_range_is_all_or_nothing() {
	let map = seeded(&[("a", 1)]);
	let log = recording(&map);

	let err = map.add_range([("b".to_string(), 2), ("a".to_string(), 3)]).unwrap_err();
	assert!(matches!(err, CollectionError::DuplicateKey { .. }));
	assert_eq!(map.len(), 1);
	assert!(log.lock().is_empty());

	assert_eq!(map.add_range([("b".to_string(), 2), ("c".to_string(), 3)]).unwrap(), 2);
	assert_eq!(map.len(), 3);
	assert_eq!(*log.lock(), vec![ChangeDescriptor::reset()]);
}

#[test]
fn batch_writes_publish_one_reset() {
	let map = ObservableHashMap::new();
	let log = recording(&map);

	assert_eq!(map.extend([("a".to_string(), 1), ("b".to_string(), 2)]).unwrap(), 2);
	assert_eq!(map.extend(Vec::new()).unwrap(), 0);
	let keys = ["a".to_string(), "zz".to_string()];
	assert_eq!(map.remove_range(&keys).unwrap(), 1);
	assert_eq!(map.remove_range(&keys).unwrap(), 0);
	map.clear().unwrap();

	assert!(map.is_empty());
	assert_eq!(log.lock().len(), 3);
	assert!(log.lock().iter().all(|d| d.action() == ChangeAction::Reset));
}

#[test]
fn ordered_variant_iterates_by_key() {
	let map = ObservableOrderedMap::<String, i32>::new();
	for key in ["pear", "apple", "fig"] {
		map.add(key.into(), key.len() as i32).unwrap();
	}

	assert_eq!(map.keys(), vec!["apple", "fig", "pear"]);
	assert_eq!(map.values(), vec![5, 3, 4]);
	let snap = map.snapshot();
	assert_eq!(snap.iter().next(), Some((&"apple".to_string(), &5)));
}

#[test]
fn bulk_session_merges_map_adds() {
	let map = ObservableOrderedMap::<String, i32>::new();
	let log = recording(&map);

	map.begin_bulk(ChangeAction::Add);
	map.add("a".into(), 1).unwrap();
	map.add("b".into(), 2).unwrap();
	assert!(map.end_bulk());

	assert_eq!(*log.lock(), vec![ChangeDescriptor::added(vec![("a".into(), 1), ("b".into(), 2)], None)]);
}

#[test]
fn debug_reports_len_and_strategy() {
	let map = ObservableHashMap::<String, i32>::with_config(GuardConfig::spin());
	map.insert("a".into(), 1).unwrap();
	let rendered = format!("{map:?}");
	assert!(rendered.contains("len: 1"));
	assert!(rendered.contains(&format!("{:?}", GuardStrategy::Spin)));
}
