//! The trivial one-process group

use super::{Collective, Request, Tag};
use crate::error::OptResult;
use crate::parameters::Partition;

/// A group of one: every collective completes immediately
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn start_allreduce_sum(&self, _tag: Tag, data: Vec<f64>) -> OptResult<Request> {
        Ok(Request::ready(data))
    }

    fn start_allgather(
        &self,
        _tag: Tag,
        data: Vec<f64>,
        _partition: &Partition,
    ) -> OptResult<Request> {
        Ok(Request::ready(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_process_is_identity() {
        let comm = SingleProcess;
        let partition = Partition::new(3, 1);

        let sum = comm
            .start_allreduce_sum(Tag::Losses, vec![1.0, 2.0, 3.0])
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(sum, vec![1.0, 2.0, 3.0]);

        let gathered = comm
            .start_allgather(Tag::Samples(0), vec![4.0, 5.0, 6.0], &partition)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(gathered, vec![4.0, 5.0, 6.0]);
    }
}
