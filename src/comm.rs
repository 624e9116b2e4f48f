//! Process communication used by the distributed dof map builder.
//!
//! All collectives are built from a single synchronous pairwise exchange. Payloads are
//! flat `u64` buffers since everything exchanged during dof map construction is an index
//! or a vote.
use crate::error::AssemblyError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread;

/// A group of processes that exchange messages in synchronous rounds.
pub trait Communicator {
    /// The rank of this process in `0 .. size`.
    fn rank(&self) -> usize;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Sends `data` to `dest` and receives the message that `source` sends to this process
    /// in the same round.
    fn send_recv(&self, data: &[u64], dest: usize, source: usize) -> Result<Vec<u64>, AssemblyError>;

    /// Exchanges `data` with every other process in `size - 1` rounds.
    ///
    /// In round `k`, this process sends to `(rank + k) % size` and receives from
    /// `(rank - k + size) % size`. `on_receive` is called with the source rank and the
    /// received buffer once per round.
    fn exchange_round_robin<F>(&self, data: &[u64], mut on_receive: F) -> Result<(), AssemblyError>
    where
        Self: Sized,
        F: FnMut(usize, &[u64]) -> Result<(), AssemblyError>,
    {
        let rank = self.rank();
        let size = self.size();
        for k in 1..size {
            let source = (rank + size - k) % size;
            let dest = (rank + k) % size;
            let received = self.send_recv(data, dest, source)?;
            on_receive(source, &received)?;
        }
        Ok(())
    }

    /// Gathers `data` from every process, indexed by rank.
    fn all_gather(&self, data: &[u64]) -> Result<Vec<Vec<u64>>, AssemblyError>
    where
        Self: Sized,
    {
        let mut gathered = vec![Vec::new(); self.size()];
        gathered[self.rank()] = data.to_vec();
        self.exchange_round_robin(data, |source, received| {
            gathered[source] = received.to_vec();
            Ok(())
        })?;
        Ok(gathered)
    }

    /// The sum of `value` over all processes of lower rank.
    fn exclusive_prefix_sum(&self, value: u64) -> Result<u64, AssemblyError>
    where
        Self: Sized,
    {
        let gathered = self.all_gather(&[value])?;
        Ok(gathered[..self.rank()].iter().flatten().sum())
    }

    /// The sum of `value` over all processes.
    fn all_reduce_sum(&self, value: u64) -> Result<u64, AssemblyError>
    where
        Self: Sized,
    {
        let gathered = self.all_gather(&[value])?;
        Ok(gathered.iter().flatten().sum())
    }
}

/// The trivial single-process group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send_recv(&self, data: &[u64], dest: usize, source: usize) -> Result<Vec<u64>, AssemblyError> {
        if dest == 0 && source == 0 {
            Ok(data.to_vec())
        } else {
            Err(AssemblyError::Communication(format!(
                "serial communicator cannot exchange with ranks {dest} and {source}"
            )))
        }
    }
}

/// A group of in-process "processes", each driven by its own thread.
///
/// Every ordered pair of ranks has its own unbounded channel, so a round never blocks on
/// sending and messages between two ranks are received in the order they were sent.
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    to: Vec<Sender<Vec<u64>>>,
    from: Vec<Receiver<Vec<u64>>>,
}

impl ThreadCommunicator {
    /// Creates the communicators of a group with `size` processes, ordered by rank.
    pub fn create_group(size: usize) -> Vec<ThreadCommunicator> {
        // channels[src][dst]
        let channels: Vec<Vec<(Sender<Vec<u64>>, Receiver<Vec<u64>>)>> = (0..size)
            .map(|_| (0..size).map(|_| unbounded()).collect())
            .collect();

        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                to: (0..size).map(|dst| channels[rank][dst].0.clone()).collect(),
                from: (0..size).map(|src| channels[src][rank].1.clone()).collect(),
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.to.len()
    }

    fn send_recv(&self, data: &[u64], dest: usize, source: usize) -> Result<Vec<u64>, AssemblyError> {
        let sender = self
            .to
            .get(dest)
            .ok_or_else(|| AssemblyError::Communication(format!("no process with rank {dest}")))?;
        let receiver = self
            .from
            .get(source)
            .ok_or_else(|| AssemblyError::Communication(format!("no process with rank {source}")))?;
        sender
            .send(data.to_vec())
            .map_err(|_| AssemblyError::Communication(format!("process {dest} has hung up")))?;
        receiver
            .recv()
            .map_err(|_| AssemblyError::Communication(format!("process {source} has hung up")))
    }
}

/// Runs `f` once per rank of a fresh `ThreadCommunicator` group, each on its own thread,
/// and returns the results ordered by rank.
///
/// # Panics
///
/// Panics if any of the threads panics.
pub fn run_in_threads<R, F>(num_processes: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadCommunicator) -> R + Sync,
{
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadCommunicator::create_group(num_processes)
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("Process thread panicked"))
            .collect()
    })
}
