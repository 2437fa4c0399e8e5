use std::time::{Duration, Instant};

fn setup() {
    kern::kprint::init();
}

/// Waits until `cond` holds, failing the test after a generous timeout.
fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "Timed out while waiting for {what}."
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Gives the other threads a chance to make progress they must not make.
fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}

pub mod semaphore {
    use super::{settle, setup, wait_until};
    use kern::{sync::Semaphore, thread::ThreadBuilder};
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[test]
    fn sema_0() {
        setup();
        let sema = Arc::new(Semaphore::new("sema_0", 0));
        let is_thread_active = Arc::new(AtomicBool::new(false));
        let is_woken_up = Arc::new(AtomicBool::new(false));

        let thread = {
            let (sema, is_thread_active, is_woken_up) =
                (sema.clone(), is_thread_active.clone(), is_woken_up.clone());

            ThreadBuilder::new("worker").spawn(move || {
                is_thread_active.store(true, Ordering::SeqCst);
                sema.acquire();
                is_woken_up.store(true, Ordering::SeqCst);
            })
        };

        wait_until("the worker", || is_thread_active.load(Ordering::SeqCst));
        settle();
        assert!(!is_woken_up.load(Ordering::SeqCst));

        sema.release();
        thread.join();

        assert!(is_woken_up.load(Ordering::SeqCst));
        assert_eq!(sema.count(), 0);
    }

    fn admit_in_steps(permits: usize) {
        const COUNT: usize = 16;
        let sema = Arc::new(Semaphore::new(format!("sema_{permits}"), permits));
        let ready_counter = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(AtomicUsize::new(0));

        let threads = (0..COUNT)
            .map(|i| {
                let (sema, ready_counter, counter) =
                    (sema.clone(), ready_counter.clone(), counter.clone());
                ThreadBuilder::new(format!("t{i}")).spawn(move || {
                    ready_counter.fetch_add(1, Ordering::SeqCst);
                    sema.acquire();
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();

        wait_until("all threads", || ready_counter.load(Ordering::SeqCst) == COUNT);

        let mut expected_cnt = permits;
        loop {
            wait_until("admission", || counter.load(Ordering::SeqCst) == expected_cnt);
            settle();
            assert_eq!(counter.load(Ordering::SeqCst), expected_cnt);
            assert_eq!(sema.count(), 0);
            if expected_cnt == COUNT {
                break;
            }
            for _ in 0..permits {
                sema.release();
            }
            expected_cnt += permits;
        }

        for thread in threads {
            thread.join();
        }
    }

    #[test]
    fn sema_1() {
        setup();
        admit_in_steps(1);
    }

    #[test]
    fn sema_2() {
        setup();
        admit_in_steps(2);
    }

    #[test]
    fn exec_order() {
        setup();
        const COUNT: usize = 3;

        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::new(AtomicUsize::new(0));
        let sema = Arc::new(Semaphore::new("exec_order", 0));

        let threads = (0..COUNT)
            .map(|i| {
                let counter = counter.clone();
                let counter2 = counter2.clone();
                let sema = sema.clone();
                ThreadBuilder::new(format!("support_{i}")).spawn(move || {
                    counter2.fetch_add(1, Ordering::SeqCst);
                    sema.acquire();
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();

        wait_until("all threads", || counter2.load(Ordering::SeqCst) == COUNT);
        settle();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        for _ in 0..COUNT {
            sema.release();
        }
        for thread in threads {
            thread.join();
        }
        assert_eq!(counter.load(Ordering::SeqCst), COUNT);
    }

    #[test]
    fn n_permits() {
        setup();
        const COUNT: usize = 5;
        const PERMITS: usize = 3;

        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::new(AtomicUsize::new(0));
        let sema = Arc::new(Semaphore::new("n_permits", PERMITS));
        let lock = Arc::new(kern::sync::Mutex::new(0));

        let guard = lock.lock();

        let threads = (0..COUNT)
            .map(|i| {
                let counter = counter.clone();
                let counter2 = counter2.clone();
                let sema = sema.clone();
                let lock = lock.clone();
                ThreadBuilder::new(format!("support_{i}")).spawn(move || {
                    counter2.fetch_add(1, Ordering::SeqCst);
                    let _permit = sema.permit();
                    counter.fetch_add(1, Ordering::SeqCst);
                    let mut v = lock.lock();
                    *v += 1;
                    v.unlock();
                })
            })
            .collect::<Vec<_>>();

        wait_until("all threads", || counter2.load(Ordering::SeqCst) == COUNT);
        wait_until("permits", || counter.load(Ordering::SeqCst) == PERMITS);
        settle();
        assert_eq!(counter.load(Ordering::SeqCst), PERMITS);
        guard.unlock();

        for thread in threads {
            thread.join();
        }
        assert_eq!(*lock.lock(), COUNT);
        assert_eq!(sema.count(), PERMITS);
    }

    #[test]
    fn count_stays_within_permits() {
        setup();
        const PERMITS: usize = 2;
        const THREADS: usize = 8;
        let sema = Arc::new(Semaphore::new("bounded", PERMITS));
        let inside = Arc::new(AtomicUsize::new(0));

        let threads = (0..THREADS)
            .map(|_| {
                let (sema, inside) = (sema.clone(), inside.clone());
                ThreadBuilder::new("bounded").spawn(move || {
                    for _ in 0..200 {
                        let permit = sema.permit();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        assert!(now <= PERMITS, "{now} threads hold {PERMITS} permits.");
                        if rand::random::<bool>() {
                            kern::thread::Current::yield_now();
                        }
                        inside.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join();
        }
        assert_eq!(sema.count(), PERMITS);
    }
}

pub mod mutex {
    use super::{setup, wait_until};
    use kern::{
        sync::{
            Mutex,
            lockdep::{Hangman, LockEvent},
        },
        thread::ThreadBuilder,
    };
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn smoke() {
        setup();
        const LENGTH: usize = 64;
        let output = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let threads = (0..LENGTH)
            .map(|i| {
                let counter = counter.clone();
                let output = output.clone();
                ThreadBuilder::new("smoker").spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let mut d = output.lock();
                    while counter.load(Ordering::SeqCst) != LENGTH {
                        core::hint::spin_loop();
                    }
                    d.push(i);
                    d.unlock();
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join();
        }

        let mut output = output.lock();
        output.sort();
        assert_eq!(&*output, &(0..LENGTH).collect::<Vec<_>>());
        output.unlock();
    }

    #[test]
    fn parking() {
        setup();
        let hangman = Arc::new(Hangman::new());
        let mutex = Arc::new(Mutex::observed("parking", (), Some(hangman.clone())));
        let guard = mutex.lock();

        let be_parked = {
            let mutex = mutex.clone();
            ThreadBuilder::new("blockee").spawn(move || {
                let guard = mutex.lock();
                guard.unlock();
            })
        };

        let lock = mutex.raw().id();
        let tid = be_parked.tid;
        wait_until("the blockee to sleep", || {
            hangman
                .events()
                .contains(&LockEvent::Wait { thread: tid, lock })
        });

        guard.unlock();
        be_parked.join();
        let events = hangman.events();
        assert!(events.ends_with(&[
            LockEvent::Acquire { thread: tid, lock },
            LockEvent::Release { thread: tid, lock },
        ]));
    }

    #[test]
    fn try_lock() {
        setup();
        let mutex = Mutex::new(7);
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_err());
        assert_eq!(*guard, 7);
        guard.unlock();
        assert!(mutex.try_lock().is_ok());
        assert_eq!(mutex.into_inner(), 7);
    }
}

pub mod lock {
    use super::setup;
    use kern::{
        sync::{
            Lock,
            lockdep::{Hangman, LockEvent},
        },
        thread::{Current, ThreadBuilder},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[test]
    fn held_by_caller() {
        setup();
        let lock = Arc::new(Lock::new("held"));
        assert!(!lock.held_by_caller());
        lock.acquire();
        assert!(lock.held_by_caller());

        let other = {
            let lock = lock.clone();
            ThreadBuilder::new("other").spawn(move || {
                assert!(!lock.held_by_caller());
                assert!(lock.try_acquire().is_err());
            })
        };
        other.join();

        lock.release();
        assert!(!lock.held_by_caller());
    }

    #[test]
    fn mutual_exclusion() {
        setup();
        const THREADS: usize = 8;
        const ROUNDS: usize = 300;
        let lock = Arc::new(Lock::new("exclusion"));
        let inside = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicUsize::new(0));

        let threads = (0..THREADS)
            .map(|_| {
                let (lock, inside, counter) = (lock.clone(), inside.clone(), counter.clone());
                ThreadBuilder::new("contender").spawn(move || {
                    for _ in 0..ROUNDS {
                        lock.acquire();
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        let v = counter.load(Ordering::SeqCst);
                        if rand::random::<u8>() < 32 {
                            Current::yield_now();
                        }
                        counter.store(v + 1, Ordering::SeqCst);
                        inside.store(false, Ordering::SeqCst);
                        lock.release();
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join();
        }
        assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
    }

    #[test]
    fn uncontended_acquire_does_not_wait() {
        setup();
        let hangman = Arc::new(Hangman::new());
        let lock = Lock::with_observer("quiet", hangman.clone());
        let (thread, id) = (Current::get_tid(), lock.id());
        lock.acquire();
        lock.release();
        assert_eq!(
            hangman.events(),
            vec![
                LockEvent::Acquire { thread, lock: id },
                LockEvent::Release { thread, lock: id }
            ]
        );
    }

    #[test]
    #[should_panic(expected = "is acquired twice by thread")]
    fn double_acquire() {
        setup();
        let lock = Lock::new("twice");
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "is released by thread")]
    fn release_without_holding() {
        setup();
        let lock = Lock::new("foreign");
        lock.release();
    }

    #[test]
    #[should_panic(expected = "is released by thread")]
    fn release_by_another_thread() {
        setup();
        let lock = Arc::new(Lock::new("foreign"));
        lock.acquire();
        let result = {
            let lock = lock.clone();
            ThreadBuilder::new("thief").spawn(move || lock.release())
        };
        result.join();
    }

    #[test]
    #[should_panic(expected = "must not be called while interrupts are disabled")]
    fn acquire_with_interrupts_disabled() {
        setup();
        let lock = Lock::new("irq");
        let _guard = abyss::interrupt::InterruptGuard::new();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "is destroyed while held by thread")]
    fn destroy_while_held() {
        setup();
        let lock = Lock::new("busy");
        lock.acquire();
        drop(lock);
    }
}

pub mod condition_variable {
    use super::setup;
    use kern::{
        sync::{ConditionVariable, Lock, Mutex, MutexGuard},
        thread::ThreadBuilder,
    };
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    const CAPACITY: usize = 2;
    const ITEMS: usize = 10;

    struct Buffer {
        inner: Mutex<VecDeque<usize>>,
        full: ConditionVariable,
        empty: ConditionVariable,
    }

    impl Buffer {
        fn new() -> Self {
            Self {
                inner: Mutex::named("buffer", VecDeque::new()),
                full: ConditionVariable::new("full"),
                empty: ConditionVariable::new("empty"),
            }
        }

        fn put(&self, val: usize) {
            let mut guard = self.full.wait_while(&self.inner, |b| b.len() == CAPACITY);
            guard.push_back(val);
            self.empty.signal(MutexGuard::lock(&guard));
            guard.unlock();
        }

        fn put_many(&self, vals: &[usize]) {
            let mut idx = 0;
            while idx < vals.len() {
                let mut guard = self.full.wait_while(&self.inner, |b| b.len() == CAPACITY);
                while guard.len() < CAPACITY && idx < vals.len() {
                    guard.push_back(vals[idx]);
                    idx += 1;
                }
                self.empty.broadcast(MutexGuard::lock(&guard));
                guard.unlock();
            }
        }

        fn get(&self) -> usize {
            let mut guard = self.empty.wait_while(&self.inner, |b| b.is_empty());
            let item = guard.pop_front();
            self.full.signal(MutexGuard::lock(&guard));
            guard.unlock();
            item.unwrap()
        }
    }

    fn bounded_buffer(producer: impl FnOnce(&Buffer) + Send + 'static) {
        let (buffer, waiters, output) = (
            Arc::new(Buffer::new()),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Mutex::new(Vec::new())),
        );

        let consumers = (0..ITEMS)
            .map(|_| {
                let (buffer, waiters, output) = (buffer.clone(), waiters.clone(), output.clone());
                ThreadBuilder::new("consumer").spawn(move || {
                    waiters.fetch_add(1, Ordering::SeqCst);
                    let d = buffer.get();
                    let mut guard = output.lock();
                    guard.push(d);
                    guard.unlock();
                })
            })
            .collect::<Vec<_>>();
        super::wait_until("consumers", || waiters.load(Ordering::SeqCst) == ITEMS);

        let producer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer").spawn(move || producer(&*buffer))
        };

        for consumer in consumers {
            consumer.join();
        }
        producer.join();

        let mut output = output.lock();
        output.sort();
        assert_eq!(&*output, &(0..ITEMS).collect::<Vec<_>>());
        output.unlock();
    }

    #[test]
    fn bounded_buffer_1() {
        setup();
        bounded_buffer(|buffer| {
            for i in 0..ITEMS {
                buffer.put(i);
            }
        });
    }

    #[test]
    fn bounded_buffer_2() {
        setup();
        bounded_buffer(|buffer| {
            for chunk in (0..ITEMS).collect::<Vec<_>>().chunks(3) {
                buffer.put_many(chunk);
            }
        });
    }

    #[test]
    fn wait_releases_the_lock() {
        setup();
        let lock = Arc::new(Lock::new("monitor"));
        let cv = Arc::new(ConditionVariable::new("ready"));
        let ready = Arc::new(AtomicBool::new(false));

        lock.acquire();
        let notifier = {
            let (lock, cv, ready) = (lock.clone(), cv.clone(), ready.clone());
            ThreadBuilder::new("notifier").spawn(move || {
                lock.acquire();
                ready.store(true, Ordering::SeqCst);
                cv.signal(&lock);
                lock.release();
            })
        };
        while !ready.load(Ordering::SeqCst) {
            cv.wait(&lock);
        }
        assert!(lock.held_by_caller());
        lock.release();
        notifier.join();
    }

    #[test]
    #[should_panic(expected = "is used without holding lock")]
    fn wait_without_lock() {
        setup();
        let lock = Lock::new("unheld");
        ConditionVariable::new("cv").wait(&lock);
    }

    #[test]
    #[should_panic(expected = "is used without holding lock")]
    fn signal_without_lock() {
        setup();
        let lock = Lock::new("unheld");
        ConditionVariable::new("cv").signal(&lock);
    }
}

pub mod rwlock {
    use super::{settle, setup, wait_until};
    use kern::{
        sync::{RwLock, RwLockStats, Semaphore},
        thread::{Current, ThreadBuilder},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[test]
    fn readers_share() {
        setup();
        let rw = RwLock::new("share");
        let r1 = rw.read();
        let r2 = rw.try_read().unwrap();
        assert!(rw.try_write().is_err());
        assert_eq!(
            rw.stats(),
            RwLockStats {
                readers_active: 2,
                ..Default::default()
            }
        );
        drop(r1);
        drop(r2);
        let w = rw.write();
        assert!(rw.try_read().is_err());
        assert_eq!(
            rw.stats(),
            RwLockStats {
                writer_active: true,
                ..Default::default()
            }
        );
        drop(w);
        assert_eq!(rw.stats(), RwLockStats::default());
    }

    #[test]
    fn writer_preference() {
        setup();
        let rw = Arc::new(RwLock::new("preference"));
        let gate = Arc::new(Semaphore::new("gate", 0));
        let wrote = Arc::new(AtomicBool::new(false));
        let read = Arc::new(AtomicBool::new(false));

        let reading = rw.read();

        let writer = {
            let (rw, gate, wrote) = (rw.clone(), gate.clone(), wrote.clone());
            ThreadBuilder::new("writer").spawn(move || {
                let guard = rw.write();
                wrote.store(true, Ordering::SeqCst);
                gate.acquire();
                drop(guard);
            })
        };
        wait_until("the writer to wait", || rw.stats().writers_waiting == 1);

        // A waiting writer holds back new readers.
        assert!(rw.try_read().is_err());
        let reader = {
            let (rw, read) = (rw.clone(), read.clone());
            ThreadBuilder::new("reader").spawn(move || {
                let guard = rw.read();
                read.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };
        wait_until("the reader to wait", || rw.stats().readers_waiting == 1);
        assert_eq!(
            rw.stats(),
            RwLockStats {
                readers_active: 1,
                writer_active: false,
                readers_waiting: 1,
                writers_waiting: 1,
            }
        );

        // The last reader admits the writer.
        drop(reading);
        wait_until("the writer", || wrote.load(Ordering::SeqCst));
        settle();
        assert!(!read.load(Ordering::SeqCst));
        assert_eq!(
            rw.stats(),
            RwLockStats {
                readers_active: 0,
                writer_active: true,
                readers_waiting: 1,
                writers_waiting: 0,
            }
        );

        // The writer admits the waiting readers.
        gate.release();
        writer.join();
        reader.join();
        assert!(read.load(Ordering::SeqCst));
        assert_eq!(rw.stats(), RwLockStats::default());
    }

    #[test]
    fn writer_admits_reader_batch() {
        setup();
        const READERS: usize = 4;
        let rw = Arc::new(RwLock::new("batch"));
        let inside = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new("gate", 0));

        let writing = rw.write();
        let readers = (0..READERS)
            .map(|_| {
                let (rw, inside, gate) = (rw.clone(), inside.clone(), gate.clone());
                ThreadBuilder::new("reader").spawn(move || {
                    let guard = rw.read();
                    inside.fetch_add(1, Ordering::SeqCst);
                    gate.acquire();
                    drop(guard);
                })
            })
            .collect::<Vec<_>>();
        wait_until("readers to wait", || rw.stats().readers_waiting == READERS);

        drop(writing);
        // Every waiting reader is admitted at once.
        wait_until("the batch", || inside.load(Ordering::SeqCst) == READERS);
        assert_eq!(rw.stats().readers_active, READERS);

        for _ in 0..READERS {
            gate.release();
        }
        for reader in readers {
            reader.join();
        }
        assert_eq!(rw.stats(), RwLockStats::default());
    }

    #[test]
    fn stress() {
        setup();
        const READERS: usize = 8;
        const WRITERS: usize = 3;
        const ROUNDS: usize = 200;
        let rw = Arc::new(RwLock::new("stress"));
        let readers_in = Arc::new(AtomicUsize::new(0));
        let writers_in = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();

        for i in 0..READERS + WRITERS {
            let (rw, readers_in, writers_in) = (rw.clone(), readers_in.clone(), writers_in.clone());
            let is_writer = i < WRITERS;
            threads.push(ThreadBuilder::new(format!("rw{i}")).spawn(move || {
                for _ in 0..ROUNDS {
                    if is_writer {
                        rw.acquire_write();
                        assert_eq!(writers_in.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers_in.load(Ordering::SeqCst), 0);
                    } else {
                        rw.acquire_read();
                        readers_in.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(writers_in.load(Ordering::SeqCst), 0);
                    }
                    if rand::random::<u8>() < 64 {
                        Current::yield_now();
                    }
                    if is_writer {
                        writers_in.fetch_sub(1, Ordering::SeqCst);
                        rw.release_write();
                    } else {
                        readers_in.fetch_sub(1, Ordering::SeqCst);
                        rw.release_read();
                    }
                }
            }));
        }
        for thread in threads {
            thread.join();
        }
        assert_eq!(rw.stats(), RwLockStats::default());
    }

    #[test]
    #[should_panic(expected = "reads while writing")]
    fn read_while_writing() {
        setup();
        let rw = RwLock::new("reentrant");
        rw.acquire_write();
        rw.acquire_read();
    }

    #[test]
    #[should_panic(expected = "but the writer is")]
    fn release_write_without_writing() {
        setup();
        let rw = RwLock::new("unowned");
        rw.release_write();
    }

    #[test]
    #[should_panic(expected = "is released by a reader that does not hold it")]
    fn release_read_without_reading() {
        setup();
        let rw = RwLock::new("unowned");
        rw.release_read();
    }

    #[test]
    #[should_panic(expected = "is destroyed while in use")]
    fn destroy_while_reading() {
        setup();
        let rw = RwLock::new("busy");
        rw.acquire_read();
        drop(rw);
    }
}

pub mod lockdep {
    use super::{setup, wait_until};
    use kern::{
        sync::{
            Lock,
            lockdep::{Hangman, LockEvent, LockObserver},
        },
        thread::{Current, ThreadBuilder},
    };
    use std::sync::Arc;

    #[test]
    fn abba() {
        setup();
        let hangman = Arc::new(Hangman::new());
        let a = Arc::new(Lock::with_observer("a", hangman.clone()));
        let b = Arc::new(Lock::with_observer("b", hangman.clone()));
        let me = Current::get_tid();

        a.acquire();
        let other = {
            let (a, b) = (a.clone(), b.clone());
            ThreadBuilder::new("other").spawn(move || {
                b.acquire();
                a.acquire();
                a.release();
                b.release();
            })
        };
        let tid = other.tid;
        let lock_a = a.id();
        wait_until("the other thread to wait for a", || {
            hangman
                .events()
                .contains(&LockEvent::Wait { thread: tid, lock: lock_a })
        });
        assert!(hangman.diagnose().is_none());

        // Report the wait for `b` that would close the cycle without
        // actually sleeping on it.
        hangman.on_wait(me, b.id());
        let deadlock = hangman.diagnose().unwrap();
        let mut threads = deadlock.threads();
        threads.sort();
        let mut expected = vec![me, tid];
        expected.sort();
        assert_eq!(threads, expected);
        assert!(deadlock.to_string().contains("waits"));

        a.release();
        other.join();
        b.acquire();
        b.release();
        assert!(hangman.diagnose().is_none());
    }
}
