use std::cmp::Ordering;

use crate::value::{FieldValue, ValueKind};

/// Total order over field values, matching the order the backend uses for
/// `orderBy` clauses.
///
/// Values of different types order by type:
/// null < boolean < number < timestamp < string < bytes < reference <
/// geo point < array < map. Integers and doubles share the number slot, and
/// NaN sorts below every other number.
pub fn compare_values(left: &FieldValue, right: &FieldValue) -> Ordering {
    let by_type = type_order(left).cmp(&type_order(right));
    if by_type != Ordering::Equal {
        return by_type;
    }

    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Ordering::Equal,
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => compare_doubles(*a as f64, *b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => compare_doubles(*a, *b as f64),
        (ValueKind::Double(a), ValueKind::Double(b)) => compare_doubles(*a, *b),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a.cmp(b),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => compare_references(a, b),
        (
            ValueKind::GeoPoint {
                latitude: lat_a,
                longitude: lng_a,
            },
            ValueKind::GeoPoint {
                latitude: lat_b,
                longitude: lng_b,
            },
        ) => compare_doubles(*lat_a, *lat_b).then_with(|| compare_doubles(*lng_a, *lng_b)),
        (ValueKind::Array(a), ValueKind::Array(b)) => {
            for (left, right) in a.iter().zip(b.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (ValueKind::Map(a), ValueKind::Map(b)) => {
            for ((left_key, left), (right_key, right)) in a.iter().zip(b.iter()) {
                let ordering = left_key
                    .cmp(right_key)
                    .then_with(|| compare_values(left, right));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => Ordering::Equal,
    }
}

fn type_order(value: &FieldValue) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::GeoPoint { .. } => 7,
        ValueKind::Array(_) => 8,
        ValueKind::Map(_) => 9,
    }
}

fn compare_doubles(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

fn compare_references(left: &str, right: &str) -> Ordering {
    let mut left_segments = left.split('/');
    let mut right_segments = right.split('/');
    loop {
        match (left_segments.next(), right_segments.next()) {
            (Some(l), Some(r)) => match l.cmp(r) {
                Ordering::Equal => continue,
                ordering => return ordering,
            },
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;
    use std::collections::BTreeMap;

    #[test]
    fn orders_across_types() {
        let ascending = vec![
            FieldValue::null(),
            FieldValue::from_bool(false),
            FieldValue::from_bool(true),
            FieldValue::from_double(f64::NAN),
            FieldValue::from_integer(-1),
            FieldValue::from_double(0.5),
            FieldValue::from_integer(1),
            FieldValue::from_timestamp(Timestamp::new(10, 0)),
            FieldValue::from_string("a"),
            FieldValue::from_string("b"),
            FieldValue::from_bytes(vec![0u8]),
            FieldValue::from_reference("projects/p/databases/d/documents/a/b"),
            FieldValue::from_geo_point(1.0, 2.0),
            FieldValue::from_array(vec![FieldValue::from_integer(1)]),
            FieldValue::from_map(BTreeMap::new()),
        ];
        for window in ascending.windows(2) {
            assert_eq!(
                compare_values(&window[0], &window[1]),
                Ordering::Less,
                "{:?} should sort before {:?}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn integers_and_doubles_compare_numerically() {
        assert_eq!(
            compare_values(&FieldValue::from_integer(2), &FieldValue::from_double(2.0)),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&FieldValue::from_double(2.5), &FieldValue::from_integer(3)),
            Ordering::Less
        );
    }

    #[test]
    fn arrays_compare_element_wise_then_by_length() {
        let short = FieldValue::from_array(vec![FieldValue::from_integer(1)]);
        let long = FieldValue::from_array(vec![
            FieldValue::from_integer(1),
            FieldValue::from_integer(0),
        ]);
        let bigger = FieldValue::from_array(vec![FieldValue::from_integer(2)]);
        assert_eq!(compare_values(&short, &long), Ordering::Less);
        assert_eq!(compare_values(&long, &bigger), Ordering::Less);
    }

    #[test]
    fn references_compare_by_segment() {
        let a = FieldValue::from_reference("c/a/sub/x");
        let b = FieldValue::from_reference("c/a-b");
        assert_eq!(compare_values(&a, &b), Ordering::Less);
    }
}
