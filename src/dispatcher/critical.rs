use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One report delivered to the process-wide critical-error collector.
#[derive(Debug, Clone)]
pub struct CriticalError {
    /// Where the error happened, e.g. a sink name.
    pub context: String,
    pub message: String,
}

type Subscriber = Box<dyn Fn(&CriticalError) + Send + Sync>;

static SUBSCRIBERS: Mutex<Vec<(u64, Subscriber)>> = Mutex::new(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Report a critical error to every live subscriber.
///
/// Sink faults and sink-factory failures are reported here by the worker;
/// applications may report their own. Never blocks on anything but the
/// subscriber list's short mutex.
pub fn report(context: impl Into<String>, message: impl Into<String>) {
    let error = CriticalError {
        context: context.into(),
        message: message.into(),
    };
    let subscribers = SUBSCRIBERS.lock().unwrap();
    for (_, subscriber) in subscribers.iter() {
        subscriber(&error);
    }
}

/// Subscribe to critical-error reports. Dropping the returned subscription
/// unsubscribes.
pub fn subscribe(
    f: impl Fn(&CriticalError) + Send + Sync + 'static,
) -> CriticalErrorSubscription {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    SUBSCRIBERS.lock().unwrap().push((id, Box::new(f)));
    CriticalErrorSubscription { id }
}

/// RAII handle of one collector subscription.
#[derive(Debug)]
pub struct CriticalErrorSubscription {
    id: u64,
}

impl Drop for CriticalErrorSubscription {
    fn drop(&mut self) {
        SUBSCRIBERS
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn subscribers_receive_reports_until_dropped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = subscribe(move |e| {
            sink.lock().unwrap().push(format!("{}: {}", e.context, e.message));
        });

        report("test-sink", "it broke");
        assert_eq!(seen.lock().unwrap().as_slice(), ["test-sink: it broke"]);

        drop(subscription);
        report("test-sink", "again");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
