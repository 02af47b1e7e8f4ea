use std::cell::{Cell, RefCell};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};
use vigilia::{Error, EventLoop, EventMask, RunFlags};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// sa_flags stays zero: without SA_RESTART an interrupted wait reports
// EINTR instead of restarting transparently.
fn install_interrupting_usr1_handler() {
    extern "C" fn ignore_signal(_signal: libc::c_int) {}

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_sigaction = ignore_signal as libc::sighandler_t;
        let rc = libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut());
        assert_eq!(rc, 0, "Failed to install the SIGUSR1 handler");
    }
}

#[test]
fn test_stop_from_a_callback_ends_run() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let count = Rc::new(Cell::new(0u32));
    let count_in_cb = Rc::clone(&count);
    el.schedule_repeating(Duration::from_millis(10), move |el, _id| {
        count_in_cb.set(count_in_cb.get() + 1);
        el.stop();
    });

    el.run();

    assert_eq!(count.get(), 1, "Run should return after the stopping cycle");
}

#[test]
fn test_run_discards_a_stale_stop_request() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let count = Rc::new(Cell::new(0u32));
    let count_in_cb = Rc::clone(&count);
    el.schedule_timer(Duration::from_millis(10), move |el, _id| {
        count_in_cb.set(count_in_cb.get() + 1);
        el.stop();
    });

    el.stop();
    el.run();

    assert_eq!(
        count.get(),
        1,
        "A stop requested before run should not prevent the first cycle"
    );
}

#[test]
fn test_hooks_run_before_poll_and_before_timers() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let order = Rc::new(RefCell::new(Vec::new()));

    let order_in_before = Rc::clone(&order);
    el.set_before_poll(move |_el| {
        order_in_before.borrow_mut().push("before");
    });

    let order_in_after = Rc::clone(&order);
    el.set_after_poll(move |_el| {
        order_in_after.borrow_mut().push("after");
    });

    let order_in_timer = Rc::clone(&order);
    el.schedule_timer(Duration::from_millis(10), move |el, _id| {
        order_in_timer.borrow_mut().push("timer");
        el.stop();
    });

    el.run();

    assert_eq!(
        *order.borrow(),
        vec!["before", "after", "timer"],
        "Hooks should bracket the poll, with timers dispatched last"
    );
}

#[test]
fn test_after_poll_hook_requires_its_flag() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let ran = Rc::new(Cell::new(false));
    let ran_in_hook = Rc::clone(&ran);
    el.set_after_poll(move |_el| {
        ran_in_hook.set(true);
    });

    let (a, mut b) = UnixStream::pair().expect("Failed to create socket pair");
    el.register_file(a.as_raw_fd(), EventMask::READABLE, |_el, _fd, _ready| {})
        .expect("Failed to register");
    b.write_all(b"x").expect("Failed to write");

    el.run_once(RunFlags::FILE_EVENTS);
    assert!(!ran.get(), "The hook should stay quiet without its flag");

    el.run_once(RunFlags::FILE_EVENTS | RunFlags::CALL_AFTER_HOOK);
    assert!(ran.get(), "The hook should run once the flag is passed");
}

#[test]
fn test_cleared_hooks_stop_running() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let count = Rc::new(Cell::new(0u32));
    let count_in_hook = Rc::clone(&count);
    el.set_before_poll(move |_el| {
        count_in_hook.set(count_in_hook.get() + 1);
    });

    let stopper = el.schedule_timer(Duration::from_millis(5), |el, _id| el.stop());
    el.run();
    let after_first_run = count.get();
    assert!(after_first_run >= 1, "The installed hook should have run");

    el.cancel_timer(stopper);
    el.clear_before_poll();
    el.schedule_timer(Duration::from_millis(5), |el, _id| el.stop());
    el.run();

    assert_eq!(
        count.get(),
        after_first_run,
        "A cleared hook must not run again"
    );
}

#[test]
fn test_dont_block_returns_promptly_with_a_distant_timer() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let fired = Rc::new(Cell::new(false));
    let fired_in_cb = Rc::clone(&fired);
    el.schedule_timer(Duration::from_secs(5), move |_el, _id| {
        fired_in_cb.set(true);
    });

    let start = Instant::now();
    let processed = el.run_once(RunFlags::ALL_EVENTS | RunFlags::DONT_BLOCK);

    assert!(
        start.elapsed() < Duration::from_secs(1),
        "A non-blocking cycle must not wait for the timer"
    );
    assert_eq!(processed, 0);
    assert!(!fired.get());
}

#[test]
fn test_nonblocking_polls_mode_applies_to_every_cycle() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let count = Rc::new(Cell::new(0u32));
    let count_in_cb = Rc::clone(&count);
    el.schedule_timer(Duration::from_millis(60), move |_el, _id| {
        count_in_cb.set(count_in_cb.get() + 1);
    });

    el.set_nonblocking_polls(true);
    let start = Instant::now();
    el.run_once(RunFlags::ALL_EVENTS);
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "With non-blocking polls the cycle should return at once"
    );
    assert_eq!(count.get(), 0);

    el.set_nonblocking_polls(false);
    el.run_once(RunFlags::ALL_EVENTS);
    assert_eq!(count.get(), 1, "Blocking behavior should be restored");
}

#[test]
fn test_run_once_without_event_flags_is_a_no_op() {
    init_logging();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    el.schedule_timer(Duration::ZERO, |_el, _id| {
        panic!("no event class was requested");
    });

    std::thread::sleep(Duration::from_millis(5));
    let processed = el.run_once(RunFlags::empty());

    assert_eq!(processed, 0, "Without event flags nothing may run");
}

#[test]
fn test_resize_preserves_registrations_and_guards_the_watermark() {
    init_logging();
    let mut el = EventLoop::with_capacity(1024).expect("Failed to create event loop");

    let (a, mut b) = UnixStream::pair().expect("Failed to create socket pair");
    let fd = a.as_raw_fd();

    let count = Rc::new(Cell::new(0u32));
    let count_in_cb = Rc::clone(&count);
    el.register_file(fd, EventMask::READABLE, move |_el, _fd, _ready| {
        count_in_cb.set(count_in_cb.get() + 1);
    })
    .expect("Failed to register");

    let result = el.resize(fd as usize);
    assert!(
        matches!(
            result,
            Err(Error::ResizeBelowWatermark { requested, highest })
                if requested == fd as usize && highest == fd
        ),
        "Shrinking below a live registration must fail"
    );
    assert_eq!(el.capacity(), 1024, "A failed resize must change nothing");

    el.resize(fd as usize + 1)
        .expect("Shrinking to just above the watermark should work");
    el.resize(2048).expect("Growing should work");
    assert_eq!(el.capacity(), 2048);

    b.write_all(b"x").expect("Failed to write");
    el.run_once(RunFlags::FILE_EVENTS);
    assert_eq!(count.get(), 1, "The registration should survive both resizes");
}

#[test]
fn test_readiness_then_timer_end_to_end() {
    init_logging();
    let mut el = EventLoop::with_capacity(1024).expect("Failed to create event loop");

    let (a, mut b) = UnixStream::pair().expect("Failed to create socket pair");
    let fd = a.as_raw_fd();

    let reads = Rc::new(Cell::new(0u32));
    let timer_fires = Rc::new(Cell::new(0u32));

    let reads_in_cb = Rc::clone(&reads);
    let timer_at_read = Rc::clone(&timer_fires);
    el.register_file(fd, EventMask::READABLE, move |el, fd, _ready| {
        assert_eq!(
            timer_at_read.get(),
            0,
            "Input at 10ms must be dispatched before the 50ms timer"
        );
        reads_in_cb.set(reads_in_cb.get() + 1);
        el.unregister_file(fd, EventMask::READABLE);
    })
    .expect("Failed to register");

    let timer_in_cb = Rc::clone(&timer_fires);
    el.schedule_timer(Duration::from_millis(50), move |el, _id| {
        timer_in_cb.set(timer_in_cb.get() + 1);
        el.stop();
    });

    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        b.write_all(b"ready").expect("Failed to write");
    });

    let start = Instant::now();
    el.run();
    writer.join().expect("Writer thread panicked");

    assert!(
        start.elapsed() >= Duration::from_millis(50),
        "The timer fired only once its deadline passed"
    );
    assert_eq!(reads.get(), 1, "The readiness callback should run once");
    assert_eq!(timer_fires.get(), 1, "The timer should fire exactly once");

    el.run_once(RunFlags::ALL_EVENTS | RunFlags::DONT_BLOCK);
    assert_eq!(timer_fires.get(), 1, "A fired one-shot timer is gone");
}

#[test]
fn test_interrupted_wait_keeps_the_timer_deadline() {
    init_logging();
    install_interrupting_usr1_handler();
    let mut el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    let count = Rc::new(Cell::new(0u32));
    let count_in_cb = Rc::clone(&count);
    el.schedule_timer(Duration::from_millis(80), move |_el, _id| {
        count_in_cb.set(count_in_cb.get() + 1);
    });

    // Pepper the polling thread with signals while it sleeps toward the
    // deadline; each one cuts the wait short mid-flight.
    let target = unsafe { libc::pthread_self() } as usize;
    let storm = std::thread::spawn(move || {
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(20));
            unsafe {
                libc::pthread_kill(target as libc::pthread_t, libc::SIGUSR1);
            }
        }
    });

    let start = Instant::now();
    let processed = el.run_once(RunFlags::ALL_EVENTS);
    let elapsed = start.elapsed();
    storm.join().expect("Signal thread panicked");

    assert_eq!(processed, 1, "The cycle should deliver exactly the timer firing");
    assert_eq!(count.get(), 1, "The timer should fire exactly once");
    assert!(
        elapsed >= Duration::from_millis(80),
        "An interrupted wait must still cover the full deadline"
    );
    assert!(
        elapsed < Duration::from_millis(200),
        "Interruptions must shrink the remaining wait, not restart it"
    );
}

#[test]
fn test_backend_name_is_a_known_mechanism() {
    let el = EventLoop::with_capacity(64).expect("Failed to create event loop");

    assert!(
        ["epoll", "kqueue", "evport", "select"].contains(&el.backend_name()),
        "Unexpected backend: {}",
        el.backend_name()
    );
}

#[test]
fn test_interest_reports_registered_bits() {
    let mut el = EventLoop::with_capacity(1024).expect("Failed to create event loop");
    let (a, _b) = UnixStream::pair().expect("Failed to create socket pair");
    let fd = a.as_raw_fd();

    assert!(el.interest(fd).is_empty());

    el.register_file(fd, EventMask::READABLE, |_el, _fd, _ready| {})
        .expect("Failed to register");
    assert_eq!(el.interest(fd), EventMask::READABLE);

    el.register_file(fd, EventMask::WRITABLE, |_el, _fd, _ready| {})
        .expect("Failed to register");
    assert_eq!(el.interest(fd), EventMask::READABLE | EventMask::WRITABLE);
}
