//! Background executor: one dedicated thread hosting cooperative tasks.
//!
//! The foreground turn loop never waits on this executor for correctness.
//! Tasks start in submission order on a single thread and interleave only
//! at await points — the long-lived embedding worker coexists with
//! one-shot refreshes. Once started, a task is not cancellable; it runs to
//! completion or failure and logs. Ordering within one task is strict.

use std::future::Future;
use std::pin::Pin;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Message {
    Run(Task),
    Close,
}

/// Handle for submitting work to the background thread. Cheap to clone.
#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl BackgroundHandle {
    /// Enqueue a task. Never blocks; if the executor has shut down the task
    /// is dropped.
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let _ = self.tx.send(Message::Run(Box::pin(task)));
    }
}

/// Owns the background thread. Dropping (or calling [`shutdown`]) closes
/// the queue, lets the backlog drain, and joins the thread.
///
/// [`shutdown`]: BackgroundExecutor::shutdown
pub struct BackgroundExecutor {
    handle: BackgroundHandle,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundExecutor {
    /// Start the executor thread with its own current-thread runtime.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let thread = std::thread::Builder::new()
            .name("engram-background".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("background runtime");
                let local = tokio::task::LocalSet::new();
                rt.block_on(async {
                    local
                        .run_until(async {
                            while let Some(message) = rx.recv().await {
                                match message {
                                    Message::Run(task) => {
                                        tokio::task::spawn_local(task);
                                    }
                                    Message::Close => break,
                                }
                            }
                        })
                        .await;
                    // Queue closed: run the remaining spawned tasks down.
                    // Long-lived workers must have had their input channels
                    // closed by now — drop the executor last.
                    local.await;
                });
            })
            .expect("background thread");

        Self {
            handle: BackgroundHandle { tx },
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> BackgroundHandle {
        self.handle.clone()
    }

    /// Close the queue, drain outstanding tasks, and join the thread.
    /// Tasks submitted afterwards are dropped.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        let _ = self.handle.tx.send(Message::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.close_and_join();
    }
}
