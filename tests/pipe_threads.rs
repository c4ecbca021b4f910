//! Cross-thread tests for shared streams and the worker handshake.
//!
//! Exercises the real threading pattern:
//! - writers blocking on a full stream and waking on drain
//! - many threads opening descriptors at once
//! - host + worker talking over the role-swapped pipe pair
//!
//! Run with: cargo test --test pipe_threads -- --nocapture

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use shared_fd::{
    BootstrapError, BootstrapMessage, Config, Engine, EngineError, FailureReason, FileTable,
    Host, InstanceContext, KeyEvent, ModuleImage, STDIN, STDOUT, SharedFile, SharedMemory,
    ThreadRole, Worker, WorkerState,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `file` until it yields bytes or `TIMEOUT` passes.
fn take_within(file: &SharedFile) -> Vec<u8> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let bytes = file.take();
        if !bytes.is_empty() || Instant::now() >= deadline {
            return bytes;
        }
        file.position().wait_until_changed(0, Some(Duration::from_millis(10)));
    }
}

fn wait_finished<T>(handle: &thread::JoinHandle<T>) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

fn table(capacity: usize) -> Arc<FileTable> {
    Arc::new(FileTable::new(
        SharedFile::new(STDIN, "stdin", capacity).unwrap(),
        SharedFile::new(STDOUT, "stdout", capacity).unwrap(),
        3,
    )
    .unwrap())
}

// =============================================================================
// BACKPRESSURE
// =============================================================================

#[test]
fn test_writer_blocks_on_full_and_wakes_on_drain() {
    let file = Arc::new(SharedFile::new(STDIN, "stdin", 16).unwrap());
    file.write(&[b'a'; 16]);
    assert!(file.is_full());

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let file = file.clone();
        let done = done.clone();
        thread::spawn(move || {
            file.write(b"b");
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst), "write returned while stream was full");

    assert_eq!(file.take(), vec![b'a'; 16]);
    assert!(wait_finished(&writer), "blocked writer never woke");
    writer.join().unwrap();

    assert!(done.load(Ordering::SeqCst));
    assert_eq!(file.take(), b"b");
}

#[test]
fn test_large_write_through_small_stream() {
    let file = Arc::new(SharedFile::new(STDOUT, "stdout", 7).unwrap());
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let writer = {
        let file = file.clone();
        let data = data.clone();
        thread::spawn(move || file.write(&data))
    };

    let mut out = Vec::with_capacity(data.len());
    let deadline = Instant::now() + TIMEOUT;
    while out.len() < data.len() && Instant::now() < deadline {
        let chunk = file.take();
        assert!(chunk.len() <= file.capacity());
        out.extend(chunk);
    }
    assert_eq!(out.len(), data.len(), "reader timed out before draining every byte");
    writer.join().unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_hello_world_scenario() {
    let file = Arc::new(SharedFile::new(STDIN, "stdin", 1024).unwrap());
    assert!(file.take().is_empty());

    let writer = {
        let file = file.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            file.write(b"hello world\r\n");
        })
    };

    let bytes = take_within(&file);
    assert_eq!(bytes, b"hello world\r\n");
    assert_eq!(bytes.len(), 13);
    writer.join().unwrap();

    assert!(file.take().is_empty());
}

// =============================================================================
// DESCRIPTORS
// =============================================================================

#[test]
fn test_concurrent_open_yields_unique_descriptors() {
    const THREADS: usize = 1000;
    let table = table(8);

    let fds: Vec<u32> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let table = &table;
                s.spawn(move || table.open(&format!("dyn-{i}"), 8).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let unique: HashSet<u32> = fds.iter().copied().collect();
    assert_eq!(unique.len(), THREADS);
    assert!(fds.iter().all(|&fd| fd >= 3));
    assert_eq!(table.len(), THREADS + 2);
    for fd in fds {
        assert_eq!(table.lookup(fd).unwrap().fd(), fd);
    }
}

// =============================================================================
// BOOTSTRAP
// =============================================================================

/// Host instance does nothing; worker instance answers "ping" with "pong".
struct PingPong {
    ctx: InstanceContext,
    seen: Arc<Mutex<Vec<u8>>>,
}

impl Engine for PingPong {
    fn allocate(&mut self, _size: u32) -> Result<u32, EngineError> {
        Ok(0)
    }

    fn run(&mut self, _ptr: u32, _len: u32) -> Result<(), EngineError> {
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn handle_key_event(&mut self, _event: KeyEvent) -> Result<(), EngineError> {
        Ok(())
    }

    fn worker_main(&mut self) -> Result<(), EngineError> {
        let inbound = self.ctx.files.stdin()?;
        let request = take_within(&inbound);
        if request.is_empty() {
            return Err(EngineError::Trap("no request from host".into()));
        }
        self.seen.lock().unwrap().extend_from_slice(&request);
        self.ctx.files.write(STDOUT, b"pong")?;
        Ok(())
    }
}

fn ping_pong_host(seen: Arc<Mutex<Vec<u8>>>, contexts: Arc<Mutex<Vec<InstanceContext>>>) -> Host {
    let loader = move |ctx: InstanceContext| -> Result<Box<dyn Engine>, EngineError> {
        contexts.lock().unwrap().push(ctx.clone());
        Ok(Box::new(PingPong {
            ctx,
            seen: seen.clone(),
        }))
    };
    let config = Config::default().with_stream_capacity(64).with_memory_pages(1);
    Host::start(config, ModuleImage::new("pingpong", vec![0, 0x61, 0x73, 0x6d]), Arc::new(loader))
        .unwrap()
}

#[test]
fn test_role_swap_symmetry() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let contexts = Arc::new(Mutex::new(Vec::new()));
    let mut host = ping_pong_host(seen.clone(), contexts.clone());

    let pid = host.spawn_worker().unwrap();
    assert_eq!(pid, 1);

    host.files().stdout().unwrap().write(b"ping");
    let reply = take_within(&host.files().stdin().unwrap());
    assert_eq!(reply, b"pong");

    host.join_workers().unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), b"ping");

    // Same memory, same image, same table; roles swapped
    let contexts = contexts.lock().unwrap();
    assert_eq!(contexts.len(), 2);
    let (main, worker) = (&contexts[0], &contexts[1]);
    assert_eq!(main.role, ThreadRole::Initiator);
    assert_eq!(worker.role, ThreadRole::Worker);
    assert_eq!(worker.pid, 1);
    assert!(main.memory.same_region(&worker.memory));
    assert!(main.module.same_image(&worker.module));
    assert!(Arc::ptr_eq(main.files.table(), worker.files.table()));
    assert_eq!(worker.files.roles(), main.files.roles().swapped());
}

/// Worker instance that returns from its entry point straight away.
struct Quiet;

impl Engine for Quiet {
    fn allocate(&mut self, _size: u32) -> Result<u32, EngineError> {
        Ok(0)
    }

    fn run(&mut self, _ptr: u32, _len: u32) -> Result<(), EngineError> {
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn handle_key_event(&mut self, _event: KeyEvent) -> Result<(), EngineError> {
        Ok(())
    }

    fn worker_main(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[test]
fn test_workers_get_distinct_pids() {
    let pids = Arc::new(Mutex::new(Vec::new()));
    let loader = {
        let pids = pids.clone();
        move |ctx: InstanceContext| -> Result<Box<dyn Engine>, EngineError> {
            pids.lock().unwrap().push(ctx.pid);
            Ok(Box::new(Quiet))
        }
    };
    let config = Config::default().with_stream_capacity(16).with_memory_pages(1);
    let mut host = Host::start(config, ModuleImage::new("quiet", vec![]), Arc::new(loader)).unwrap();

    let a = host.spawn_worker().unwrap();
    let b = host.spawn_worker().unwrap();
    assert_ne!(a, b);
    assert_eq!(host.worker_pids(), vec![a, b]);

    for pid in [a, b] {
        let state = host.worker(pid).unwrap().wait_until_running(TIMEOUT);
        assert!(state.is_settled(), "worker {pid} stuck in {state:?}");
    }
    host.join_workers().unwrap();

    let mut seen = pids.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, a, b]);
}

#[test]
fn test_worker_instantiation_failure() {
    let loader = |ctx: InstanceContext| -> Result<Box<dyn Engine>, EngineError> {
        match ctx.role {
            ThreadRole::Initiator => Ok(Box::new(PingPong {
                ctx,
                seen: Arc::new(Mutex::new(Vec::new())),
            })),
            ThreadRole::Worker => Err(EngineError::MemoryAttach("refused".into())),
        }
    };
    let config = Config::default().with_stream_capacity(16).with_memory_pages(1);
    let mut host = Host::start(config, ModuleImage::new("x", vec![]), Arc::new(loader)).unwrap();

    let pid = host.spawn_worker().unwrap();
    let state = host.worker(pid).unwrap().wait_until_running(TIMEOUT);
    assert!(matches!(
        state,
        WorkerState::Failed(FailureReason::Instantiation(_))
    ));

    let err = host.join_workers().unwrap_err();
    assert!(matches!(
        err,
        shared_fd::Error::Bootstrap(BootstrapError::Instantiation(_))
    ));
}

/// Worker instance whose entry point holds until `release` is set.
struct Gated {
    release: Arc<AtomicBool>,
}

impl Engine for Gated {
    fn allocate(&mut self, _size: u32) -> Result<u32, EngineError> {
        Ok(0)
    }

    fn run(&mut self, _ptr: u32, _len: u32) -> Result<(), EngineError> {
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn handle_key_event(&mut self, _event: KeyEvent) -> Result<(), EngineError> {
        Ok(())
    }

    fn worker_main(&mut self) -> Result<(), EngineError> {
        let deadline = Instant::now() + TIMEOUT;
        while !self.release.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return Err(EngineError::Trap("never released".into()));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

#[test]
fn test_duplicate_bootstrap_while_running_fails_join() {
    let release = Arc::new(AtomicBool::new(false));
    let loader = {
        let release = release.clone();
        move |_ctx: InstanceContext| -> Result<Box<dyn Engine>, EngineError> {
            Ok(Box::new(Gated {
                release: release.clone(),
            }))
        }
    };
    let handle = Worker::spawn("gated-worker", Arc::new(loader)).unwrap();

    let message = BootstrapMessage {
        memory: SharedMemory::new(1).unwrap(),
        module: ModuleImage::new("gated", vec![]),
        files: table(8),
        pid: 3,
    };
    handle.bootstrap(message.clone()).unwrap();
    assert_eq!(handle.wait_until_running(TIMEOUT), WorkerState::Running);

    let err = handle.bootstrap(message).unwrap_err();
    assert!(matches!(err, BootstrapError::DuplicateBootstrap));
    assert_eq!(
        handle.state(),
        WorkerState::Failed(FailureReason::DuplicateBootstrap)
    );

    release.store(true, Ordering::Release);
    let result = handle.join();
    assert!(
        matches!(result, Err(BootstrapError::DuplicateBootstrap)),
        "worker joined with {result:?}"
    );
}

#[test]
fn test_duplicate_bootstrap_fails_worker() {
    let loader = |_ctx: InstanceContext| -> Result<Box<dyn Engine>, EngineError> {
        Err(EngineError::InvalidImage("never reached".into()))
    };
    let handle = Worker::spawn("dup-worker", Arc::new(loader)).unwrap();
    assert_eq!(handle.name(), "dup-worker");

    let message = BootstrapMessage {
        memory: SharedMemory::new(1).unwrap(),
        module: ModuleImage::new("x", vec![]),
        files: table(8),
        pid: 7,
    };
    handle.bootstrap(message.clone()).unwrap();
    let err = handle.bootstrap(message).unwrap_err();
    assert!(matches!(err, BootstrapError::DuplicateBootstrap));

    assert!(matches!(
        handle.wait_until_running(TIMEOUT),
        WorkerState::Failed(_)
    ));
    assert!(handle.join().is_err());
}
