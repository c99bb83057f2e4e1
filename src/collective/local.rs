//! In-process group of ranks connected by channels
//!
//! Each [`LocalEndpoint`] plays one rank and is normally moved into its own
//! thread. Sends never block; waiting drains the endpoint's inbox until
//! every peer's contribution for the requested `(tag, sequence)` arrived,
//! stashing anything else for later requests.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Collective, Request, Tag};
use crate::error::{CommunicationError, OptResult};
use crate::parameters::Partition;

type Key = (Tag, u64);

#[derive(Debug)]
struct Message {
    from: usize,
    tag: Tag,
    sequence: u64,
    data: Vec<f64>,
}

#[derive(Debug)]
struct Inbox {
    receiver: Receiver<Message>,
    stash: HashMap<Key, Vec<(usize, Vec<f64>)>>,
}

impl Inbox {
    /// Contributions from every rank but `rank` for `key`, in arrival order
    fn collect(
        &mut self,
        key: Key,
        rank: usize,
        size: usize,
    ) -> OptResult<Vec<(usize, Vec<f64>)>> {
        loop {
            if self.stash.get(&key).map_or(0, Vec::len) >= size - 1 {
                return Ok(self.stash.remove(&key).unwrap_or_default());
            }
            let message = self.receiver.recv().map_err(|_| {
                let arrived: Vec<usize> = self
                    .stash
                    .get(&key)
                    .map(|c| c.iter().map(|(from, _)| *from).collect())
                    .unwrap_or_default();
                let missing = (0..size)
                    .find(|r| *r != rank && !arrived.contains(r))
                    .unwrap_or(0);
                CommunicationError::Disconnected { peer: missing }
            })?;
            self.stash
                .entry((message.tag, message.sequence))
                .or_default()
                .push((message.from, message.data));
        }
    }
}

#[derive(Debug)]
struct Shared {
    rank: usize,
    size: usize,
    peers: Vec<Option<Sender<Message>>>,
    inbox: Mutex<Inbox>,
    sequences: Mutex<HashMap<Tag, u64>>,
}

impl Shared {
    fn next_sequence(&self, tag: Tag) -> u64 {
        let mut sequences = self
            .sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = sequences.entry(tag).or_insert(0);
        let sequence = *counter;
        *counter += 1;
        sequence
    }

    fn broadcast(&self, tag: Tag, sequence: u64, data: &[f64]) -> OptResult<()> {
        for (peer, sender) in self.peers.iter().enumerate() {
            if let Some(sender) = sender {
                sender
                    .send(Message {
                        from: self.rank,
                        tag,
                        sequence,
                        data: data.to_vec(),
                    })
                    .map_err(|_| CommunicationError::Disconnected { peer })?;
            }
        }
        Ok(())
    }

    fn gather_contributions(&self, key: Key) -> OptResult<Vec<(usize, Vec<f64>)>> {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let mut contributions = inbox.collect(key, self.rank, self.size)?;
        contributions.sort_by_key(|(from, _)| *from);
        Ok(contributions)
    }
}

/// Factory for a connected set of endpoints
pub struct LocalGroup;

impl LocalGroup {
    /// Create `size` endpoints, one per rank, all connected to each other
    pub fn create(size: usize) -> Vec<LocalEndpoint> {
        let size = size.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| {
                let peers = senders
                    .iter()
                    .enumerate()
                    .map(|(peer, s)| (peer != rank).then(|| s.clone()))
                    .collect();
                LocalEndpoint {
                    shared: Arc::new(Shared {
                        rank,
                        size,
                        peers,
                        inbox: Mutex::new(Inbox {
                            receiver,
                            stash: HashMap::new(),
                        }),
                        sequences: Mutex::new(HashMap::new()),
                    }),
                }
            })
            .collect()
    }
}

/// One rank of a [`LocalGroup`]
#[derive(Clone, Debug)]
pub struct LocalEndpoint {
    shared: Arc<Shared>,
}

impl Collective for LocalEndpoint {
    fn rank(&self) -> usize {
        self.shared.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn start_allreduce_sum(&self, tag: Tag, data: Vec<f64>) -> OptResult<Request> {
        if self.shared.size == 1 {
            return Ok(Request::ready(data));
        }
        let sequence = self.shared.next_sequence(tag);
        self.shared.broadcast(tag, sequence, &data)?;

        let shared = Arc::clone(&self.shared);
        Ok(Request::deferred(move || {
            let mut contributions = shared.gather_contributions((tag, sequence))?;
            contributions.push((shared.rank, data));
            contributions.sort_by_key(|(from, _)| *from);

            let len = contributions[0].1.len();
            let mut sum = vec![0.0; len];
            for (_, values) in &contributions {
                if values.len() != len {
                    return Err(CommunicationError::SizeMismatch {
                        expected: len,
                        actual: values.len(),
                    }
                    .into());
                }
                for (acc, v) in sum.iter_mut().zip(values) {
                    *acc += v;
                }
            }
            Ok(sum)
        }))
    }

    fn start_allgather(
        &self,
        tag: Tag,
        data: Vec<f64>,
        partition: &Partition,
    ) -> OptResult<Request> {
        if self.shared.size == 1 {
            return Ok(Request::ready(data));
        }
        if partition.processes() != self.shared.size || partition.dimension() != data.len() {
            return Err(CommunicationError::SizeMismatch {
                expected: partition.dimension(),
                actual: data.len(),
            }
            .into());
        }
        let sequence = self.shared.next_sequence(tag);
        let own = partition.slice(self.shared.rank);
        self.shared.broadcast(tag, sequence, &data[own.range()])?;

        let shared = Arc::clone(&self.shared);
        let partition = partition.clone();
        Ok(Request::deferred(move || {
            let mut data = data;
            for (from, values) in shared.gather_contributions((tag, sequence))? {
                let slice = partition.slice(from);
                if values.len() != slice.count {
                    return Err(CommunicationError::SizeMismatch {
                        expected: slice.count,
                        actual: values.len(),
                    }
                    .into());
                }
                data[slice.range()].copy_from_slice(&values);
            }
            Ok(data)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allreduce_across_threads() {
        let endpoints = LocalGroup::create(3);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|ep| {
                thread::spawn(move || {
                    let r = ep.rank() as f64;
                    ep.start_allreduce_sum(Tag::Losses, vec![r, 10.0 * r])
                        .unwrap()
                        .wait()
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), vec![3.0, 30.0]);
        }
    }

    #[test]
    fn test_allgather_fills_foreign_slices() {
        let endpoints = LocalGroup::create(2);
        let partition = Partition::new(5, 2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|ep| {
                let partition = partition.clone();
                thread::spawn(move || {
                    let mut data = vec![0.0; 5];
                    let own = partition.slice(ep.rank());
                    for w in own.range() {
                        data[w] = w as f64 + 1.0;
                    }
                    ep.start_allgather(Tag::Samples(1), data, &partition)
                        .unwrap()
                        .wait()
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        }
    }

    #[test]
    fn test_out_of_order_waits() {
        let mut endpoints = LocalGroup::create(2);
        let b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();

        let a1 = a.start_allreduce_sum(Tag::Gradient(1), vec![1.0]).unwrap();
        let a2 = a.start_allreduce_sum(Tag::Gradient(2), vec![2.0]).unwrap();
        let b1 = b.start_allreduce_sum(Tag::Gradient(1), vec![10.0]).unwrap();
        let b2 = b.start_allreduce_sum(Tag::Gradient(2), vec![20.0]).unwrap();

        assert_eq!(a2.wait().unwrap(), vec![22.0]);
        assert_eq!(a1.wait().unwrap(), vec![11.0]);
        assert_eq!(b1.wait().unwrap(), vec![11.0]);
        assert_eq!(b2.wait().unwrap(), vec![22.0]);
    }

    #[test]
    fn test_repeated_tags_match_by_sequence() {
        let mut endpoints = LocalGroup::create(2);
        let b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();

        let first = a.start_allreduce_sum(Tag::Losses, vec![1.0]).unwrap();
        let second = a.start_allreduce_sum(Tag::Losses, vec![2.0]).unwrap();
        b.start_allreduce_sum(Tag::Losses, vec![100.0]).unwrap();
        b.start_allreduce_sum(Tag::Losses, vec![200.0]).unwrap();

        assert_eq!(first.wait().unwrap(), vec![101.0]);
        assert_eq!(second.wait().unwrap(), vec![202.0]);
    }

    #[test]
    fn test_disconnected_peer() {
        let mut endpoints = LocalGroup::create(2);
        let b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();
        drop(b);

        let result = a
            .start_allreduce_sum(Tag::Losses, vec![1.0])
            .and_then(Request::wait);
        assert!(result.is_err());
    }
}
