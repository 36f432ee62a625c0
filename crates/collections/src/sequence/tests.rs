use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::GuardError;

type Log = Arc<Mutex<Vec<ChangeDescriptor<i32>>>>;

fn recording(seq: &ObservableSequence<i32>) -> Log {
	let log: Log = Arc::default();
	let sink = Arc::clone(&log);
	seq.subscribe(move |d| sink.lock().push(d.clone()));
	log
}

#[test]
fn add_and_insert_report_positions() {
	let seq = ObservableSequence::from(vec![1, 3]);
	let log = recording(&seq);

	assert_eq!(seq.add(4).unwrap(), 2);
	seq.insert(1, 2).unwrap();
	seq.insert(4, 5).unwrap();

	assert_eq!(seq.to_vec().unwrap(), vec![1, 2, 3, 4, 5]);
	assert_eq!(
		*log.lock(),
		vec![
			ChangeDescriptor::added(vec![4], Some(2)),
			ChangeDescriptor::added(vec![2], Some(1)),
			ChangeDescriptor::added(vec![5], Some(4)),
		]
	);
}

#[test]
fn out_of_range_index_fails_without_publishing() {
	let seq = ObservableSequence::from(vec![1, 2]);
	let log = recording(&seq);

	assert_eq!(seq.get(2).unwrap_err(), CollectionError::IndexOutOfRange { index: 2, len: 2 });
	assert_eq!(seq.insert(3, 9).unwrap_err(), CollectionError::IndexOutOfRange { index: 3, len: 2 });
	assert_eq!(seq.remove_at(2).unwrap_err(), CollectionError::IndexOutOfRange { index: 2, len: 2 });
	assert_eq!(seq.set(5, 0).unwrap_err(), CollectionError::IndexOutOfRange { index: 5, len: 2 });

	assert_eq!(seq.to_vec().unwrap(), vec![1, 2]);
	assert!(log.lock().is_empty());
}

#[test]
fn set_reports_replace_with_old_item() {
	let seq = ObservableSequence::from(vec![1, 2, 3]);
	let log = recording(&seq);

	assert_eq!(seq.set(1, 20).unwrap(), 2);
	assert_eq!(*log.lock(), vec![ChangeDescriptor::replaced(vec![20], vec![2], Some(1))]);
}

#[test]
fn range_operations_publish_one_descriptor() {
	let seq = ObservableSequence::from(vec![1, 5]);
	let log = recording(&seq);

	assert_eq!(seq.insert_range(1, [2, 3, 4]).unwrap(), 3);
	assert_eq!(seq.add_range([6, 7]).unwrap(), 2);
	assert_eq!(seq.remove_range(0, 2).unwrap(), vec![1, 2]);

	assert_eq!(seq.to_vec().unwrap(), vec![3, 4, 5, 6, 7]);
	assert_eq!(
		*log.lock(),
		vec![
			ChangeDescriptor::added(vec![2, 3, 4], Some(1)),
			ChangeDescriptor::added(vec![6, 7], Some(5)),
			ChangeDescriptor::removed(vec![1, 2], Some(0)),
		]
	);
}

#[test]
fn empty_ranges_publish_nothing() {
	let seq = ObservableSequence::from(vec![1]);
	let log = recording(&seq);

	assert_eq!(seq.add_range(Vec::new()).unwrap(), 0);
	assert_eq!(seq.insert_range(0, Vec::new()).unwrap(), 0);
	assert_eq!(seq.remove_range(1, 0).unwrap(), Vec::<i32>::new());

	assert!(log.lock().is_empty());
}

#[test]
fn remove_range_past_end_is_invalid_argument() {
	let seq = ObservableSequence::from(vec![1, 2, 3]);
	let log = recording(&seq);

	assert!(matches!(seq.remove_range(2, 2), Err(CollectionError::InvalidArgument(_))));
	assert!(matches!(seq.remove_range(usize::MAX, 1), Err(CollectionError::IndexOutOfRange { .. })));
	assert!(matches!(seq.remove_range(1, usize::MAX), Err(CollectionError::InvalidArgument(_))));

	assert_eq!(seq.count().unwrap(), 3);
	assert!(log.lock().is_empty());
}

#[test]
fn remove_by_value_uses_first_match() {
	let seq = ObservableSequence::from(vec![7, 8, 7]);
	let log = recording(&seq);

	assert!(seq.remove(&7).unwrap());
	assert!(!seq.remove(&9).unwrap());

	assert_eq!(seq.to_vec().unwrap(), vec![8, 7]);
	assert_eq!(seq.index_of(&7).unwrap(), Some(1));
	assert!(!seq.contains(&9).unwrap());
	assert_eq!(*log.lock(), vec![ChangeDescriptor::removed(vec![7], Some(0))]);
}

#[test]
fn reordering_operations_publish_reset() {
	let seq = ObservableSequence::from(vec![3, 1, 2]);
	let log = recording(&seq);

	seq.sort().unwrap();
	assert_eq!(seq.to_vec().unwrap(), vec![1, 2, 3]);
	seq.reverse().unwrap();
	assert_eq!(seq.to_vec().unwrap(), vec![3, 2, 1]);
	seq.sort_by(|a, b| (a % 2).cmp(&(b % 2)).then(a.cmp(b))).unwrap();
	assert_eq!(seq.to_vec().unwrap(), vec![2, 1, 3]);

	assert_eq!(*log.lock(), vec![ChangeDescriptor::reset(); 3]);
}

#[test]
fn remove_all_resets_only_when_something_matched() {
	let seq = ObservableSequence::from(vec![1, 2, 3, 4]);
	let log = recording(&seq);

	assert_eq!(seq.remove_all(|n| *n > 10).unwrap(), 0);
	assert!(log.lock().is_empty());

	assert_eq!(seq.remove_all(|n| n % 2 == 0).unwrap(), 2);
	assert_eq!(seq.to_vec().unwrap(), vec![1, 3]);
	assert_eq!(*log.lock(), vec![ChangeDescriptor::reset()]);
}

#[test]
fn clear_resets_even_when_empty() {
	let seq = ObservableSequence::<i32>::new();
	let log = recording(&seq);

	seq.clear().unwrap();

	assert!(seq.is_empty().unwrap());
	assert_eq!(*log.lock(), vec![ChangeDescriptor::reset()]);
}

#[test]
fn bulk_session_coalesces_appends() {
	let seq = ObservableSequence::from(vec![1, 2, 3]);
	let log = recording(&seq);

	seq.begin_bulk(ChangeAction::Add);
	seq.add(4).unwrap();
	seq.add(5).unwrap();
	assert!(log.lock().is_empty());
	assert!(seq.end_bulk());

	assert_eq!(*log.lock(), vec![ChangeDescriptor::added(vec![4, 5], Some(3))]);
}

#[test]
fn subscriber_may_read_the_sequence() {
	let seq = Arc::new(ObservableSequence::<i32>::new());
	let seen = Arc::new(Mutex::new(Vec::new()));
	{
		let weak = Arc::downgrade(&seq);
		let seen = Arc::clone(&seen);
		seq.subscribe(move |_| {
			if let Some(seq) = weak.upgrade() {
				seen.lock().push(seq.count().unwrap());
			}
		});
	}

	seq.add(1).unwrap();
	seq.add(2).unwrap();

	assert_eq!(*seen.lock(), vec![1, 2]);
}

#[test]
fn held_guard_times_out() {
	let seq = ObservableSequence::<i32>::with_config(GuardConfig::spin().with_timeout(Duration::from_millis(20)));
	let _held = seq.items.try_lock().unwrap();

	let err = seq.add(1).unwrap_err();
	assert!(matches!(err, CollectionError::Guard(GuardError::Timeout { .. })));
}

#[test]
fn panicking_comparator_still_publishes_reset() {
	let seq = ObservableSequence::from(vec![3, 1, 2]);
	let log = recording(&seq);

	let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
		seq.sort_by(|_, _| panic!("comparator failure"))
	}));
	assert!(result.is_err());
	assert_eq!(*log.lock(), vec![ChangeDescriptor::reset()]);

	let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
		seq.remove_all(|n| if *n == 2 { panic!("predicate failure") } else { *n == 3 })
	}));
	assert!(outcome.is_err());
	assert_eq!(log.lock().len(), 2);

	assert!(!seq.items.is_locked());
	assert_eq!(seq.count().unwrap(), seq.to_vec().unwrap().len());
}
