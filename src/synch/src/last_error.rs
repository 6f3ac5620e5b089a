//! Per-thread last-error slot.

use core::cell::Cell;

use kwait_common::error::code::NO_ERROR;

thread_local! {
    static LAST_ERROR: Cell<u32> = const { Cell::new(NO_ERROR) };
}

/// Error code recorded by the last failing call on this thread.
pub fn get_last_error() -> u32 {
    LAST_ERROR.with(|e| e.get())
}

/// Overwrite the calling thread's last error.
pub fn set_last_error(code: u32) {
    LAST_ERROR.with(|e| e.set(code));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_per_thread() {
        set_last_error(87);
        assert_eq!(get_last_error(), 87);

        let other = std::thread::spawn(get_last_error).join().unwrap();
        assert_eq!(other, NO_ERROR);
        assert_eq!(get_last_error(), 87);
    }
}
