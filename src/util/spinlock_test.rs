use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{sync::Arc, thread};

use super::*;

#[test]
fn test_spinlock() {
    let seed: u64 = random();
    println!("test_spinlock {}", seed);

    let n_readers = 4;
    let n_writers = 2;
    let n_ops = 1000;

    let lock: Arc<Spinlock<Vec<u64>>> = Arc::new(Spinlock::new(vec![0, 0]));

    let mut handles = vec![];
    for id in 0..n_readers {
        let lock = Arc::clone(&lock);
        handles.push(thread::spawn(move || reader(id, lock, n_ops, seed + id)));
    }
    for id in 0..n_writers {
        let lock = Arc::clone(&lock);
        handles.push(thread::spawn(move || writer(id, lock, n_ops, seed + id)));
    }

    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    // both counters moved in lock step under the write latch.
    let val = lock.read();
    assert_eq!(val[0], val[1]);
    assert_eq!(val[0], (n_writers * n_ops) as u64);
}

fn reader(_id: u64, lock: Arc<Spinlock<Vec<u64>>>, ops: u64, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    for _i in 0..ops {
        let val = lock.read();
        assert_eq!(val[0], val[1]);
        if rng.gen::<u8>() % 16 == 0 {
            thread::yield_now();
        }
    }
}

fn writer(_id: u64, lock: Arc<Spinlock<Vec<u64>>>, ops: u64, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    for _i in 0..ops {
        {
            let mut val = lock.write();
            val[0] += 1;
            val[1] += 1;
        }
        if rng.gen::<u8>() % 16 == 0 {
            thread::yield_now();
        }
    }
}
