use super::*;
use crate::bitmap::changes::BitmapChanges;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
enum Op {
    Add(u32),
    Remove(u32),
}

fn arb_ids() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..64, 0..24)
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![(0u32..64).prop_map(Op::Add), (0u32..64).prop_map(Op::Remove)],
        0..48,
    )
}

fn expected_merge(original: &BTreeSet<u32>, ops: &[Op]) -> BTreeSet<u32> {
    let mut model = original.clone();
    for op in ops {
        match op {
            Op::Add(id) => {
                model.insert(*id);
            }
            Op::Remove(id) => {
                model.remove(id);
            }
        }
    }
    model
}

#[test]
fn set_algebra_matches_concrete_examples() {
    let a = BaseBitmap::from([1, 3, 5]);
    let b = ArrayBitmap::from_ids([3, 5, 7]);

    assert_eq!(and_all(&[&a, &b]).to_vec(), vec![3, 5]);
    assert_eq!(or_all(&[&a, &b]).to_vec(), vec![1, 3, 5, 7]);
    assert_eq!(and_not(&a, &b).to_vec(), vec![1]);
    assert!(and_all(&[]).is_empty());
}

#[test]
fn array_bitmap_rejects_removal() {
    let mut bitmap = ArrayBitmap::from_ids([4, 2]);

    assert_eq!(bitmap.add(3), Ok(true));
    assert_eq!(bitmap.add(3), Ok(false));
    assert_eq!(bitmap.to_vec(), vec![2, 3, 4]);
    assert_eq!(
        bitmap.remove(2),
        Err(BitmapError::Unsupported {
            operation: "remove",
            bitmap: "ArrayBitmap",
        })
    );
}

#[test]
fn positional_access_is_consistent_with_iteration() {
    let shapes: Vec<Box<dyn Bitmap>> = vec![
        Box::new(BaseBitmap::from([8, 2, 5])),
        Box::new(ArrayBitmap::from_ids([8, 2, 5])),
    ];

    for bitmap in shapes {
        assert_eq!(bitmap.get(0), Ok(2));
        assert_eq!(bitmap.get(2), Ok(8));
        assert_eq!(
            bitmap.get(3),
            Err(BitmapError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(bitmap.index_of(5), Some(1));
        assert_eq!(bitmap.index_of(6), None);
        assert_eq!(bitmap.range(1, 3), Ok(vec![5, 8]));
        assert_eq!(bitmap.range(1, 1), Ok(vec![]));
        assert!(matches!(
            bitmap.range(2, 4),
            Err(BitmapError::InvalidRange { .. })
        ));
        assert_eq!(bitmap.first(), Some(2));
        assert_eq!(bitmap.last(), Some(8));
    }
}

#[test]
fn positional_access_spans_roaring_containers() {
    let bitmap: BaseBitmap = (0..300_000).step_by(3).collect();

    assert_eq!(bitmap.get(0), Ok(0));
    assert_eq!(bitmap.get(50_000), Ok(150_000));
    assert_eq!(bitmap.get(99_999), Ok(299_997));
    assert!(bitmap.get(100_000).is_err());
    assert!(bitmap.get(usize::MAX).is_err());

    assert_eq!(bitmap.index_of(150_000), Some(50_000));
    assert_eq!(bitmap.index_of(299_997), Some(99_999));
    assert_eq!(bitmap.index_of(150_001), None);
}

#[test]
fn empty_bitmap_is_immutable_zero_value() {
    let shared = EmptyBitmap::shared();
    assert!(shared.is_empty());
    assert_eq!(shared.first(), None);
    assert!(matches!(
        shared.get(0),
        Err(BitmapError::IndexOutOfRange { index: 0, len: 0 })
    ));

    let mut empty = EmptyBitmap;
    assert!(matches!(
        empty.add(1),
        Err(BitmapError::Unsupported { .. })
    ));
}

#[test]
fn base_bitmap_cardinality_tracks_mutations() {
    let mut bitmap = BaseBitmap::from([1, 2]);
    assert_eq!(bitmap.len(), 2);

    assert_eq!(bitmap.add(3), Ok(true));
    assert_eq!(bitmap.len(), 3);
    assert_eq!(bitmap.remove(1), Ok(true));
    assert_eq!(bitmap.remove(1), Ok(false));
    assert_eq!(bitmap.len(), 2);

    bitmap.add_all(&[2, 3, 9]).expect("bulk add is infallible");
    assert_eq!(bitmap.len(), 3);
    bitmap.remove_all(&[42, 9]).expect("bulk remove is infallible");
    assert_eq!(bitmap.to_vec(), vec![2, 3]);
}

#[test]
fn changes_cancel_each_other() {
    let mut changes = BitmapChanges::new(std::sync::Arc::new(BaseBitmap::from([1, 2])));

    assert!(changes.add(3));
    assert!(changes.remove(3));
    assert!(!changes.is_dirty());

    assert!(changes.remove(1));
    assert!(!changes.remove(1));
    assert!(changes.add(1));
    assert!(!changes.is_dirty());

    // Adding an id already in the original is not a change.
    assert!(!changes.add(2));
    assert!(!changes.remove(7));
}

#[test]
fn changes_merge_concrete_example() {
    let mut changes = BitmapChanges::new(std::sync::Arc::new(BaseBitmap::from([1, 2])));
    changes.add(3);
    changes.remove(1);

    let merged = changes.merged();
    assert_eq!(merged.to_vec(), vec![2, 3]);
    assert_eq!(changes.merged_len(), 2);

    // Memoized until the next mutation.
    assert!(std::sync::Arc::ptr_eq(&merged, &changes.merged()));
    changes.add(4);
    assert!(!std::sync::Arc::ptr_eq(&merged, &changes.merged()));
}

proptest! {
    #[test]
    fn add_all_then_remove_all_leaves_no_new_ids(initial in arb_ids(), extra in arb_ids()) {
        let mut bitmap: BaseBitmap = initial.iter().copied().collect();
        let before: BTreeSet<u32> = initial.iter().copied().collect();

        bitmap.add_all(&extra).expect("bulk add is infallible");
        bitmap.remove_all(&extra).expect("bulk remove is infallible");

        for id in &extra {
            if !before.contains(id) {
                prop_assert!(!bitmap.contains(*id));
            }
        }
    }

    #[test]
    fn merged_equals_union_minus_removals(original in arb_ids(), ops in arb_ops()) {
        let original_set: BTreeSet<u32> = original.iter().copied().collect();
        let mut changes = BitmapChanges::new(std::sync::Arc::new(
            original.iter().copied().collect::<BaseBitmap>(),
        ));

        for op in &ops {
            match op {
                Op::Add(id) => { changes.add(*id); }
                Op::Remove(id) => { changes.remove(*id); }
            }
            prop_assert!(changes.insertions().iter().all(|id| !changes.removals().contains(id)));
        }

        let expected: Vec<u32> = expected_merge(&original_set, &ops).into_iter().collect();
        let merged = changes.merged();
        prop_assert_eq!(merged.to_vec(), expected.clone());
        prop_assert_eq!(changes.merged().to_vec(), expected.clone());
        prop_assert_eq!(changes.merged_len(), expected.len());

        for id in 0u32..64 {
            prop_assert_eq!(changes.contains(id), expected.binary_search(&id).is_ok());
        }

        let explicit = {
            let mut acc = original_set.clone();
            acc.extend(changes.insertions().iter());
            for id in changes.removals() {
                acc.remove(&id);
            }
            acc.into_iter().collect::<Vec<_>>()
        };
        prop_assert_eq!(explicit, expected);
    }

    #[test]
    fn array_and_base_agree_on_reads(ids in arb_ids(), id in 0u32..64) {
        let array = ArrayBitmap::from_ids(ids.iter().copied());
        let base: BaseBitmap = ids.iter().copied().collect();

        prop_assert!(same_contents(&array, &base));
        prop_assert_eq!(array.contains(id), base.contains(id));
        prop_assert_eq!(array.index_of(id), base.index_of(id));
        prop_assert_eq!(array.range(0, array.len()), base.range(0, base.len()));
    }
}
