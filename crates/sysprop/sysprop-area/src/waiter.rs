//! Address-keyed "wait while equal / wake all" primitive.
//!
//! On Linux/Android this is a real futex via `rustix::thread::futex`. On
//! other platforms there's no portable process-shared futex in std, so we
//! fall back to a short spin-sleep: `wake` is a no-op and `wait` polls the
//! word until it changes. The observable contract (block until the word
//! changes, tolerate spurious wakeups) holds either way.

use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn wake_all(word: &AtomicU32) {
    if let Err(e) = rustix::thread::futex::wake(word, rustix::thread::futex::Flags::empty(), i32::MAX as u32) {
        tracing::warn!(error = %e, "futex wake failed");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn wake_all(_word: &AtomicU32) {}

/// Blocks until `word != expected`, tolerating spurious wakeups, and
/// returns the word's current value.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn wait_while_equal(word: &AtomicU32, expected: u32) -> u32 {
    loop {
        let current = word.load(Ordering::Acquire);
        if current != expected {
            return current;
        }
        match rustix::thread::futex::wait(word, rustix::thread::futex::Flags::empty(), expected, None) {
            Ok(_) | Err(rustix::io::Errno::AGAIN) | Err(rustix::io::Errno::INTR) => {
                // reload and recheck; spurious wakeups and a changed value
                // between the load above and the syscall are both normal
            }
            Err(e) => {
                tracing::warn!(error = %e, "futex wait failed");
                return word.load(Ordering::Acquire);
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn wait_while_equal(word: &AtomicU32, expected: u32) -> u32 {
    loop {
        let current = word.load(Ordering::Acquire);
        if current != expected {
            return current;
        }
        std::thread::sleep(std::time::Duration::from_micros(200));
    }
}
