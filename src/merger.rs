//! Linear scan merger.

use std::error::Error;

/// Linear scan k-way merger.
/// Merges multiple sorted inputs into a single sorted output.
/// Keeps one pre-read candidate per input and picks the smallest by scanning all of them, so time
/// complexity is *m* \* *n* where *m* is the number of items and *n* is the number of inputs. For the
/// small fan-ins used by the merge rounds the scan is cheaper than maintaining a heap.
///
/// Equal items from different inputs are emitted in an unspecified order.
pub struct LinearMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    inputs: Vec<C::IntoIter>,
    // `None` marks an exhausted input
    candidates: Vec<Option<T>>,
    initiated: bool,
    failed: bool,
}

impl<T, E, C> LinearMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a linear merger using runs as inputs.
    /// Input items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `inputs` - Inputs to be merged in a single sorted one
    pub fn new<I>(inputs: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let inputs = Vec::from_iter(inputs.into_iter().map(|c| c.into_iter()));
        let candidates = Vec::with_capacity(inputs.len());

        return LinearMerger {
            inputs,
            candidates,
            initiated: false,
            failed: false,
        };
    }

    fn min_candidate(&self) -> Option<usize> {
        let mut min_idx: Option<usize> = None;
        for (idx, candidate) in self.candidates.iter().enumerate() {
            if let Some(value) = candidate {
                match min_idx.and_then(|m| self.candidates[m].as_ref()) {
                    Some(min) if min <= value => {}
                    _ => min_idx = Some(idx),
                }
            }
        }

        return min_idx;
    }
}

impl<T, E, C> Iterator for LinearMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            for input in self.inputs.iter_mut() {
                match input.next() {
                    Some(Ok(item)) => self.candidates.push(Some(item)),
                    Some(Err(err)) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                    None => self.candidates.push(None),
                }
            }
            self.initiated = true;
        }

        let idx = self.min_candidate()?;
        let result = self.candidates[idx].take()?;

        match self.inputs[idx].next() {
            Some(Ok(item)) => self.candidates[idx] = Some(item),
            Some(Err(err)) => {
                self.failed = true;
                return Some(Err(err));
            }
            None => {}
        }

        return Some(Ok(result));
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::io::{self, ErrorKind};

    use rand::Rng;

    use super::LinearMerger;

    fn failure() -> io::Error {
        io::Error::new(ErrorKind::Other, "read failed")
    }

    fn ok(values: &[u64]) -> Vec<Result<u64, io::Error>> {
        values.iter().copied().map(Ok).collect()
    }

    /// Merges the inputs turning every error into its message so results can be compared.
    fn merge(inputs: Vec<Vec<Result<u64, io::Error>>>) -> Vec<Result<u64, String>> {
        LinearMerger::new(inputs)
            .map(|item| item.map_err(|err| err.to_string()))
            .collect()
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![], vec![]], vec![])]
    #[case(vec![vec![4, 9, 12]], vec![4, 9, 12])]
    // smallest candidate sits in the last input
    #[case(vec![vec![5, 6], vec![7], vec![1, 2, 3]], vec![1, 2, 3, 5, 6, 7])]
    // first input runs dry while the others keep going
    #[case(vec![vec![0], vec![3, 4, 10], vec![2, 8]], vec![0, 2, 3, 4, 8, 10])]
    // empty inputs between live ones are skipped by the scan
    #[case(vec![vec![], vec![6], vec![], vec![1, 7], vec![]], vec![1, 6, 7])]
    // ties across inputs
    #[case(vec![vec![3, 3], vec![1, 3], vec![3]], vec![1, 3, 3, 3, 3])]
    #[case(vec![vec![u64::MAX], vec![0, u64::MAX]], vec![0, u64::MAX, u64::MAX])]
    fn test_merger(#[case] inputs: Vec<Vec<u64>>, #[case] expected: Vec<u64>) {
        let inputs = inputs.iter().map(|input| ok(input)).collect();
        let expected: Vec<Result<u64, String>> = expected.into_iter().map(Ok).collect();
        assert_eq!(merge(inputs), expected);
    }

    #[test]
    fn test_merger_error_while_priming() {
        // the second input fails before any item is emitted
        let inputs = vec![ok(&[1, 2]), vec![Err(failure())], ok(&[0])];
        assert_eq!(merge(inputs), vec![Err("read failed".to_string())]);
    }

    #[test]
    fn test_merger_error_while_refilling() {
        // the third input fails while refilling after its first candidate is taken
        let inputs = vec![ok(&[1, 5]), ok(&[3]), vec![Ok(4), Err(failure()), Ok(9)]];
        assert_eq!(merge(inputs), vec![Ok(1), Ok(3), Err("read failed".to_string())]);
    }

    #[test]
    fn test_merger_stops_after_error() {
        let inputs = vec![ok(&[0]), vec![Ok(1), Err(failure()), Ok(9)], ok(&[5])];
        let mut merger = LinearMerger::new(inputs);

        assert_eq!(merger.next().unwrap().unwrap(), 0);
        assert!(merger.next().unwrap().is_err());
        assert!(merger.next().is_none());
        assert!(merger.next().is_none());
    }

    #[test]
    fn test_merger_random_inputs() {
        let mut rng = rand::thread_rng();
        let mut inputs: Vec<Vec<u64>> = (0..rng.gen_range(1..8))
            .map(|_| (0..rng.gen_range(0..200)).map(|_| rng.gen_range(0..50)).collect())
            .collect();
        inputs.iter_mut().for_each(|input| input.sort());

        let mut expected: Vec<u64> = inputs.iter().flatten().copied().collect();
        expected.sort();

        let merger = LinearMerger::new(
            inputs
                .into_iter()
                .map(|input| input.into_iter().map(Ok::<u64, io::Error>)),
        );
        let actual: Result<Vec<u64>, io::Error> = merger.collect();
        assert_eq!(actual.unwrap(), expected);
    }
}
