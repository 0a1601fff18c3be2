use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum Completion {
    Waiting(oneshot::Sender<()>),
    Granted,
    Abandoned,
}

/// One outstanding quota request, shared between the caller and the scheduler.
///
/// The scheduler grants through [`mark_done`](Self::mark_done) while the caller
/// may concurrently give up through [`is_done`](Self::is_done). Both go through
/// the same lock, so exactly one of them decides the outcome.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    size: usize,
    cancel: CancellationToken,
    completion: Mutex<Completion>,
}

impl PendingRequest {
    /// Creates a request and the receiver its caller waits on.
    pub(crate) fn new(size: usize, cancel: CancellationToken) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let req = Self {
            size,
            cancel,
            completion: Mutex::new(Completion::Waiting(tx)),
        };
        (req, rx)
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fires the completion unless the caller has already gone away.
    ///
    /// Returns the number of units actually granted, which is zero when the
    /// request was canceled or already settled.
    pub(crate) fn mark_done(&self) -> usize {
        let mut completion = self.completion.lock();
        if self.cancel.is_cancelled() {
            return 0;
        }
        match std::mem::replace(&mut *completion, Completion::Granted) {
            Completion::Waiting(tx) => {
                // The receiver may already be gone if the caller's future was
                // dropped; the grant still counts.
                let _ = tx.send(());
                self.size
            }
            settled => {
                *completion = settled;
                0
            }
        }
    }

    /// Called by the caller once its cancellation fired.
    ///
    /// Returns `true` if the grant won the race. Otherwise the request is
    /// abandoned, so a later [`mark_done`](Self::mark_done) grants nothing.
    pub(crate) fn is_done(&self) -> bool {
        let mut completion = self.completion.lock();
        match *completion {
            Completion::Granted => true,
            Completion::Waiting(_) => {
                *completion = Completion::Abandoned;
                false
            }
            Completion::Abandoned => false,
        }
    }
}
