use std::{
    fmt,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

/// An asynchronous counterpart of a wait group.  Tasks are accounted for with
/// `add` and `done`; `wait` suspends until the count reaches zero.
#[derive(Clone)]
pub(crate) struct WaitGroup(Arc<WaitGroupImpl>);

struct WaitGroupImpl {
    notify: Notify,
    count: Mutex<usize>,
}

pub(crate) fn new() -> WaitGroup {
    WaitGroup(Arc::new(WaitGroupImpl {
        notify: Notify::new(),
        count: Mutex::new(0),
    }))
}

impl WaitGroup {
    pub fn add(&self, delta: usize) {
        let mut count = self.0.count.lock().unwrap();
        *count += delta;
    }

    pub fn done(&self) {
        let mut count = self.0.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
        }

        if *count == 0 {
            self.0.notify.notify_waiters();
        }
    }

    pub async fn wait(&self) {
        loop {
            // The waiter must be registered before the count is checked,
            // otherwise a done between the check and the await is missed.
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if *self.0.count.lock().unwrap() == 0 {
                return;
            }

            notified.await;
        }
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let count = self.0.count.lock().unwrap();
        write!(f, "WaitGroup {{ count {:?} }}", *count)
    }
}
