use fenris_forms::comm::{run_in_threads, Communicator, SerialCommunicator, ThreadCommunicator};
use fenris_forms::error::AssemblyError;

#[test]
fn serial_communicator_collectives() {
    let comm = SerialCommunicator;
    assert_eq!(comm.rank(), 0);
    assert_eq!(comm.size(), 1);
    assert_eq!(comm.all_gather(&[3, 4]).unwrap(), vec![vec![3, 4]]);
    assert_eq!(comm.exclusive_prefix_sum(7).unwrap(), 0);
    assert_eq!(comm.all_reduce_sum(7).unwrap(), 7);
    assert!(matches!(comm.send_recv(&[1], 1, 0), Err(AssemblyError::Communication(_))));
}

#[test]
fn thread_group_ranks() {
    let group = ThreadCommunicator::create_group(3);
    let ranks: Vec<_> = group.iter().map(|comm| (comm.rank(), comm.size())).collect();
    assert_eq!(ranks, vec![(0, 3), (1, 3), (2, 3)]);
}

#[test]
fn all_gather_collects_by_rank() {
    let gathered = run_in_threads(4, |comm| {
        let rank = comm.rank() as u64;
        // Buffers of different lengths
        let data: Vec<u64> = (0..=rank).map(|i| 10 * rank + i).collect();
        comm.all_gather(&data).unwrap()
    });
    let expected = vec![vec![0], vec![10, 11], vec![20, 21, 22], vec![30, 31, 32, 33]];
    for result in gathered {
        assert_eq!(result, expected);
    }
}

#[test]
fn prefix_and_total_sums() {
    let sums = run_in_threads(4, |comm| {
        let value = comm.rank() as u64 + 1;
        (comm.exclusive_prefix_sum(value).unwrap(), comm.all_reduce_sum(value).unwrap())
    });
    assert_eq!(sums, vec![(0, 10), (1, 10), (3, 10), (6, 10)]);
}

#[test]
fn round_robin_exchange_visits_every_other_rank_once() {
    let sources = run_in_threads(5, |comm| {
        let mut sources = Vec::new();
        comm.exchange_round_robin(&[comm.rank() as u64], |source, received| {
            assert_eq!(received, &[source as u64]);
            sources.push(source);
            Ok(())
        })
        .unwrap();
        sources
    });
    for (rank, sources) in sources.into_iter().enumerate() {
        let expected: Vec<usize> = (1..5).map(|k| (rank + 5 - k) % 5).collect();
        assert_eq!(sources, expected);
    }
}

#[test]
fn single_thread_group_behaves_serially() {
    let results = run_in_threads(1, |comm| comm.all_reduce_sum(42).unwrap());
    assert_eq!(results, vec![42]);
}
