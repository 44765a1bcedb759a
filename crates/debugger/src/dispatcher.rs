//! Event dispatching
//!
//! The dispatcher is the single serialisation point for every event crossing a component
//! boundary. Producers on any thread enqueue events with [`EventDispatcher::add_event`],
//! which never blocks on event handling. One background worker drains the queue in FIFO
//! order and hands each event to every registered [`EventProcessor`] in registration order.
//!
//! The worker stops after delivering [`crate::DebuggerEvent::Terminated`] or when
//! [`EventDispatcher::stop`] is called. Anything still queued at that point, and anything
//! added later, is discarded.

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use eyre::WrapErr;

use crate::events::Event;

pub type ProcessorId = u64;

/// Receives every event drained from the dispatcher queue.
///
/// Processors are called on the dispatcher worker thread, one event at a time. An error is
/// logged and does not stop delivery to the remaining processors.
pub trait EventProcessor: Send + Sync {
    fn handle_event(&self, event: &Event) -> eyre::Result<()>;
}

/// Forward every event to a channel, for consumers that want to pull events
impl EventProcessor for crossbeam_channel::Sender<Event> {
    fn handle_event(&self, event: &Event) -> eyre::Result<()> {
        self.send(event.clone())
            .wrap_err("forwarding event to subscriber")
    }
}

/// Items travelling through the dispatcher queue
enum Envelope {
    Event(Event),
    /// Acknowledged once every item queued before it has been handled
    Flush(crossbeam_channel::Sender<()>),
    /// Wake up the worker after a stop request
    Stop,
}

struct Shared {
    processors: RwLock<Vec<(ProcessorId, Arc<dyn EventProcessor>)>>,
    next_processor_id: AtomicU64,
    stopped: AtomicBool,
    receiver: Mutex<Option<crossbeam_channel::Receiver<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the dispatcher queue and its worker.
///
/// Cloning the handle is cheap; all clones feed the same queue.
#[derive(Clone)]
pub struct EventDispatcher {
    shared: Arc<Shared>,
    sender: crossbeam_channel::Sender<Envelope>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a dispatcher without starting its worker.
    ///
    /// Events added before [`EventDispatcher::start`] are queued and delivered once the worker
    /// runs.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                processors: RwLock::new(Vec::new()),
                next_processor_id: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
                receiver: Mutex::new(Some(receiver)),
                worker: Mutex::new(None),
            }),
            sender,
        }
    }

    /// Create a dispatcher and start its worker
    pub fn spawn() -> eyre::Result<Self> {
        let dispatcher = Self::new();
        dispatcher.start()?;
        Ok(dispatcher)
    }

    /// Start the background worker
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> eyre::Result<()> {
        let receiver = self
            .shared
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| eyre::eyre!("event dispatcher already started"))?;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || Self::worker_loop(shared, receiver))
            .wrap_err("spawning event dispatcher thread")?;

        *self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::debug!("event dispatcher started");
        Ok(())
    }

    /// Register a processor; it receives events from the next event boundary on
    pub fn add_processor(&self, processor: Arc<dyn EventProcessor>) -> ProcessorId {
        let id = self.shared.next_processor_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, processor));
        tracing::debug!(processor = id, "processor registered");
        id
    }

    /// Unregister a processor, returning whether it was registered
    pub fn remove_processor(&self, id: ProcessorId) -> bool {
        let mut processors = self
            .shared
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = processors.len();
        processors.retain(|(processor_id, _)| *processor_id != id);
        before != processors.len()
    }

    /// Queue an event for asynchronous delivery
    pub fn add_event(&self, event: impl Into<Event>) {
        let event = event.into();
        if self.is_stopped() {
            tracing::trace!(?event, "dispatcher stopped, dropping event");
            return;
        }
        if self.sender.send(Envelope::Event(event)).is_err() {
            tracing::trace!("dispatcher queue closed, dropping event");
        }
    }

    /// Ask the worker to stop; queued events are discarded
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!("stopping event dispatcher");
        }
        let _ = self.sender.send(Envelope::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Block until everything queued before this call has been handled.
    ///
    /// Must not be called from a processor: the worker would wait for itself.
    pub fn flush(&self, timeout: Duration) -> eyre::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        eyre::ensure!(!self.is_stopped(), "event dispatcher stopped");
        self.sender
            .send(Envelope::Flush(tx))
            .map_err(|_| eyre::eyre!("event dispatcher queue closed"))?;

        match rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                eyre::bail!("timed out after {timeout:?} flushing event dispatcher")
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eyre::bail!("event dispatcher stopped before flushing")
            }
        }
    }

    /// Wait for the worker to exit
    pub fn join(&self) -> eyre::Result<()> {
        let handle = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        eyre::ensure!(
            handle.thread().id() != thread::current().id(),
            "event dispatcher cannot join itself"
        );
        handle
            .join()
            .map_err(|_| eyre::eyre!("event dispatcher thread panicked"))
    }

    fn worker_loop(shared: Arc<Shared>, receiver: crossbeam_channel::Receiver<Envelope>) {
        for envelope in receiver.iter() {
            if shared.stopped.load(Ordering::Acquire) {
                break;
            }

            match envelope {
                Envelope::Event(event) => {
                    shared.deliver(&event);
                    if event.is_terminated() {
                        tracing::debug!("session terminated");
                        shared.stopped.store(true, Ordering::Release);
                        break;
                    }
                }
                Envelope::Flush(done) => {
                    let _ = done.send(());
                }
                Envelope::Stop => break,
            }
        }

        let discarded = receiver
            .try_iter()
            .filter(|envelope| matches!(envelope, Envelope::Event(_)))
            .count();
        if discarded > 0 {
            tracing::debug!(%discarded, "discarding events queued after stop");
        }

        // processors commonly hold a dispatcher handle themselves
        shared
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!("event dispatcher terminated");
    }
}

impl Shared {
    #[tracing::instrument(skip(self), level = "trace")]
    fn deliver(&self, event: &Event) {
        // snapshot so registration changes apply from the next event on
        let processors: Vec<_> = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, processor)| (*id, Arc::clone(processor)))
            .collect();

        for (id, processor) in processors {
            if let Err(e) = processor.handle_event(event) {
                tracing::error!(processor = id, error = %e, ?event, "event processor failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use super::*;
    use crate::events::{DebuggerEvent, Request, ResumeType};

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl EventProcessor for Recorder {
        fn handle_event(&self, event: &Event) -> eyre::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{:?}", self.name, event));
            Ok(())
        }
    }

    struct Failing;

    impl EventProcessor for Failing {
        fn handle_event(&self, _event: &Event) -> eyre::Result<()> {
            eyre::bail!("processor failure")
        }
    }

    fn suspended(line: usize) -> Event {
        DebuggerEvent::Suspended { line }.into()
    }

    #[test]
    fn delivers_in_fifo_order() {
        let dispatcher = EventDispatcher::spawn().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.add_processor(Arc::new(tx));

        for line in 1..=50 {
            dispatcher.add_event(suspended(line));
        }

        for line in 1..=50 {
            let event = rx.recv_timeout(TIMEOUT).unwrap();
            assert!(matches!(event, Event::Debugger(DebuggerEvent::Suspended { line: l }) if l == line));
        }
        dispatcher.stop();
        dispatcher.join().unwrap();
    }

    #[test]
    fn delivers_to_processors_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.add_processor(Arc::new(Recorder {
            name: "first",
            log: Arc::clone(&log),
        }));
        dispatcher.add_processor(Arc::new(Recorder {
            name: "second",
            log: Arc::clone(&log),
        }));
        dispatcher.start().unwrap();

        dispatcher.add_event(DebuggerEvent::DebuggerStarted);
        dispatcher.flush(TIMEOUT).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("first:"));
        assert!(log[1].starts_with("second:"));
        drop(log);
        dispatcher.stop();
    }

    #[test]
    fn failing_processor_does_not_stop_delivery() {
        let dispatcher = EventDispatcher::new();
        dispatcher.add_processor(Arc::new(Failing));
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.add_processor(Arc::new(tx));
        dispatcher.start().unwrap();

        dispatcher.add_event(suspended(1));
        dispatcher.add_event(suspended(2));

        assert!(rx.recv_timeout(TIMEOUT).is_ok());
        assert!(rx.recv_timeout(TIMEOUT).is_ok());
        dispatcher.stop();
    }

    #[test]
    fn stops_after_terminated() {
        let dispatcher = EventDispatcher::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.add_processor(Arc::new(tx));

        dispatcher.add_event(DebuggerEvent::DebuggerStarted);
        dispatcher.add_event(DebuggerEvent::Terminated);
        dispatcher.add_event(suspended(3));
        dispatcher.start().unwrap();
        dispatcher.join().unwrap();

        assert!(dispatcher.is_stopped());
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(received[1].is_terminated());

        // processors were released, so the channel is closed
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn events_after_stop_are_discarded() {
        let dispatcher = EventDispatcher::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.add_processor(Arc::new(tx));
        dispatcher.add_event(Request::Resume(ResumeType::Continue));
        dispatcher.stop();
        dispatcher.add_event(Request::Terminate);
        dispatcher.start().unwrap();
        dispatcher.join().unwrap();

        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn removed_processor_receives_nothing() {
        let dispatcher = EventDispatcher::spawn().unwrap();
        let (removed_tx, removed_rx) = crossbeam_channel::unbounded();
        let (kept_tx, kept_rx) = crossbeam_channel::unbounded();
        let removed = dispatcher.add_processor(Arc::new(removed_tx));
        dispatcher.add_processor(Arc::new(kept_tx));

        assert!(dispatcher.remove_processor(removed));
        assert!(!dispatcher.remove_processor(removed));

        dispatcher.add_event(suspended(4));
        dispatcher.flush(TIMEOUT).unwrap();

        assert_eq!(kept_rx.try_iter().count(), 1);
        assert_eq!(removed_rx.try_iter().count(), 0);
        dispatcher.stop();
    }

    #[test]
    fn cannot_start_twice() {
        let dispatcher = EventDispatcher::spawn().unwrap();
        assert!(dispatcher.start().is_err());
        dispatcher.stop();
        dispatcher.join().unwrap();
    }

    #[test]
    fn flush_after_stop_fails() {
        let dispatcher = EventDispatcher::spawn().unwrap();
        dispatcher.stop();
        assert!(dispatcher.flush(TIMEOUT).is_err());
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        let dispatcher = EventDispatcher::spawn().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.add_processor(Arc::new(tx));

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        dispatcher.add_event(suspended(producer * 1000 + n));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        dispatcher.flush(TIMEOUT).unwrap();

        let mut last_seen = [None; 4];
        let mut total = 0;
        for event in rx.try_iter() {
            let Event::Debugger(DebuggerEvent::Suspended { line }) = event else {
                panic!("unexpected event {event:?}");
            };
            let (producer, n) = (line / 1000, line % 1000);
            if let Some(previous) = last_seen[producer] {
                assert!(n > previous, "out of order for producer {producer}");
            }
            last_seen[producer] = Some(n);
            total += 1;
        }
        assert_eq!(total, 400);
        dispatcher.stop();
    }
}
