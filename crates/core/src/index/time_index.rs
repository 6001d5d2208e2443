/// Static index of values keyed by integer timestamp.
///
/// Keys are kept sorted and distinct; values sharing a timestamp are grouped in
/// insertion order, so co-incident entries are never dropped.
#[derive(Debug, Clone)]
pub struct TimeIndex<T> {
    timestamps: Vec<i64>,
    groups: Vec<Vec<T>>,
}

impl<T> TimeIndex<T> {
    pub fn build(entries: impl IntoIterator<Item = (i64, T)>) -> Self {
        let mut entries: Vec<(i64, T)> = entries.into_iter().collect();
        // Stable: equal timestamps keep their input order.
        entries.sort_by_key(|(ts, _)| *ts);

        let mut timestamps: Vec<i64> = Vec::new();
        let mut groups: Vec<Vec<T>> = Vec::new();
        for (ts, value) in entries {
            match groups.last_mut() {
                Some(group) if timestamps.last() == Some(&ts) => group.push(value),
                _ => {
                    timestamps.push(ts);
                    groups.push(vec![value]);
                }
            }
        }
        Self { timestamps, groups }
    }

    /// Values whose timestamp `t` satisfies `start <= t <= end`, ordered by
    /// timestamp then insertion order.
    pub fn range(&self, start: i64, end: i64) -> impl Iterator<Item = &T> {
        let (lo, hi) = if start > end {
            (0, 0)
        } else {
            (
                self.timestamps.partition_point(|&t| t < start),
                self.timestamps.partition_point(|&t| t <= end),
            )
        };
        self.groups[lo..hi].iter().flatten()
    }

    /// Values recorded at exactly `ts`.
    pub fn at(&self, ts: i64) -> &[T] {
        match self.timestamps.binary_search(&ts) {
            Ok(pos) => self.groups[pos].as_slice(),
            Err(_) => &[],
        }
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &T)> {
        self.timestamps
            .iter()
            .zip(&self.groups)
            .flat_map(|(&ts, group)| group.iter().map(move |v| (ts, v)))
    }

    /// Total number of values, not distinct timestamps.
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl<T> Default for TimeIndex<T> {
    fn default() -> Self {
        Self {
            timestamps: Vec::new(),
            groups: Vec::new(),
        }
    }
}
