use std::sync::Arc;

use time::OffsetDateTime;

use super::Value;
use crate::broker::AttributeFinderInvocation;
use crate::error::SourceLocation;

/// Provenance entry for one value emitted by an attribute finder.
#[derive(Debug, Clone)]
pub struct AttributeRecord {
    pub invocation: Arc<AttributeFinderInvocation>,
    pub value: Value,
    pub timestamp: OffsetDateTime,
    pub location: Option<SourceLocation>,
}

impl AttributeRecord {
    pub fn new(
        invocation: Arc<AttributeFinderInvocation>,
        value: Value,
        timestamp: OffsetDateTime,
        location: Option<SourceLocation>,
    ) -> Self {
        // The stored value is the bare emission; its own trace would nest forever.
        let value = value.with_metadata(ValueMetadata::EMPTY);
        Self {
            invocation,
            value,
            timestamp,
            location,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(attribute_name: &str, value: Value) -> Self {
        let invocation = AttributeFinderInvocation::builder("test", attribute_name).build();
        Self::new(
            Arc::new(invocation),
            value,
            OffsetDateTime::UNIX_EPOCH,
            None,
        )
    }
}

impl PartialEq for AttributeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.invocation == other.invocation
            && self.value == other.value
            && self.timestamp == other.timestamp
            && self.location == other.location
    }
}

/// Evaluation provenance carried by every value.
///
/// Empty metadata allocates nothing; merging shares the existing trace when
/// one side is empty.
#[derive(Debug, Clone, Default)]
pub struct ValueMetadata {
    attribute_trace: Option<Arc<Vec<AttributeRecord>>>,
}

impl ValueMetadata {
    pub const EMPTY: ValueMetadata = ValueMetadata {
        attribute_trace: None,
    };

    pub fn from_records(records: Vec<AttributeRecord>) -> Self {
        if records.is_empty() {
            return Self::EMPTY;
        }
        Self {
            attribute_trace: Some(Arc::new(records)),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attribute_trace.is_none()
    }

    #[must_use]
    pub fn attribute_trace(&self) -> &[AttributeRecord] {
        self.attribute_trace.as_deref().map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn merge(&self, other: &ValueMetadata) -> Self {
        match (&self.attribute_trace, &other.attribute_trace) {
            (_, None) => self.clone(),
            (None, Some(_)) => other.clone(),
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => self.clone(),
            (Some(a), Some(b)) => {
                let mut merged = Vec::with_capacity(a.len() + b.len());
                merged.extend(a.iter().cloned());
                merged.extend(b.iter().cloned());
                Self::from_records(merged)
            }
        }
    }

    /// Merges the metadata of all given values.
    pub fn merge_all<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        values
            .into_iter()
            .fold(Self::EMPTY, |acc, value| acc.merge(value.metadata()))
    }

    #[must_use]
    pub fn with_record(&self, record: AttributeRecord) -> Self {
        let mut records = self.attribute_trace().to_vec();
        records.push(record);
        Self::from_records(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_with_empty_shares_trace() {
        let traced = ValueMetadata::EMPTY.with_record(AttributeRecord::for_test("a.b", Value::TRUE));
        let merged = traced.merge(&ValueMetadata::EMPTY);
        assert_eq!(merged.attribute_trace().len(), 1);
        let merged = ValueMetadata::EMPTY.merge(&traced);
        assert_eq!(merged.attribute_trace().len(), 1);
    }

    #[test]
    fn test_merge_all_concatenates_in_order() {
        let first = Value::TRUE.with_record(AttributeRecord::for_test("a.first", Value::number(1)));
        let second = Value::TRUE.with_record(AttributeRecord::for_test("a.second", Value::number(2)));
        let merged = ValueMetadata::merge_all([&first, &Value::NULL, &second]);
        let names: Vec<_> = merged
            .attribute_trace()
            .iter()
            .map(|r| r.invocation.attribute_name.as_str())
            .collect();
        assert_eq!(names, vec!["a.first", "a.second"]);
    }

    #[test]
    fn test_record_strips_nested_trace() {
        let inner = Value::TRUE.with_record(AttributeRecord::for_test("x.y", Value::NULL));
        let record = AttributeRecord::for_test("x.z", inner);
        assert!(record.value.metadata().is_empty());
    }
}
