use serde::{Deserialize, Serialize};

/// Run-length packed array: consecutive equal values stored once with a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLength<T> {
    pub runs: Vec<(u32, T)>,
}

impl<T: Copy + PartialEq> RunLength<T> {
    pub fn encode(values: &[T]) -> Self {
        let mut runs: Vec<(u32, T)> = Vec::new();
        for &value in values {
            match runs.last_mut() {
                Some((count, last)) if *last == value && *count < u32::MAX => *count += 1,
                _ => runs.push((1, value)),
            }
        }
        Self { runs }
    }

    pub fn decode(&self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len());
        for &(count, value) in &self.runs {
            values.extend(std::iter::repeat(value).take(count as usize));
        }
        values
    }

    /// Number of decoded values, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.runs
            .iter()
            .fold(0usize, |total, (count, _)| total.saturating_add(*count as usize))
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_collapse() {
        let values = [0u16, 0, 0, 5, 5, 1, 0, 0];
        let packed = RunLength::encode(&values);
        assert_eq!(packed.runs, vec![(3, 0), (2, 5), (1, 1), (2, 0)]);
        assert_eq!(packed.len(), values.len());
        assert_eq!(packed.decode(), values);
    }

    #[test]
    fn test_uniform_section_is_one_run() {
        let values = vec![7u8; 4096];
        let packed = RunLength::encode(&values);
        assert_eq!(packed.runs.len(), 1);
        assert!(RunLength::<u8>::encode(&[]).is_empty());
    }
}
