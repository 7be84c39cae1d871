use crate::dispatcher::Shared;
use crate::{
    CallbackId, Command, Driver, Error, OpenOptions, Response, Statement, StatementResult, Storage,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Runner serializes all work against one database.
///
/// It owns the database's Driver and the sending half of its Command queue.
/// A dedicated worker thread owns the receiving half and applies Commands
/// in order until it dequeues a Stop or Close.
pub struct Runner<D> {
    name: String,
    queue: mpsc::UnboundedSender<Command>,
    // Driver is None until opened, and again once closed.
    // It's locked by the worker for each Command, and otherwise only by teardown.
    driver: Mutex<Option<D>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl<D: Driver> Runner<D> {
    pub(crate) fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let runner = Self {
            name: name.to_string(),
            queue: tx,
            driver: Mutex::new(None),
            worker: Mutex::new(None),
        };
        (Arc::new(runner), rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `command` to the tail of the queue. Never blocks.
    /// Fails if the worker has already terminated.
    pub fn enqueue(&self, command: Command) -> Result<(), Error> {
        self.queue.send(command).map_err(|_| Error::Queue {
            name: self.name.clone(),
        })
    }

    /// Close the Driver immediately, without waiting on the queue.
    /// Commands which are applied afterwards fail with Error::Closed.
    pub fn close_now(&self) -> Result<(), Error> {
        let driver = self.driver.lock().unwrap().take();

        if let Some(mut driver) = driver {
            driver.close_now().map_err(|err| Error::Close {
                name: self.name.clone(),
                source: Box::new(err),
            })?;
        }
        Ok(())
    }

    /// Wait for the worker thread to exit.
    pub(crate) fn join(&self) {
        let handle = self.worker.lock().unwrap().take();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(name = %self.name, "runner worker panicked");
            }
        }
    }

    fn execute(
        &self,
        statements: &[Statement],
        bug_workaround: bool,
    ) -> Result<Vec<StatementResult>, Error> {
        let mut driver = self.driver.lock().unwrap();
        let Some(driver) = driver.as_mut() else {
            return Err(Error::Closed {
                name: self.name.clone(),
            });
        };

        let results = driver.execute_batch(statements)?;

        if bug_workaround {
            driver.bug_workaround()?;
        }
        Ok(results)
    }
}

/// Start the worker thread of a newly created `runner`, which opens the
/// database and then drains `queue`. The outcome of the open is delivered
/// to `callback`.
pub(crate) fn spawn<S: Storage>(
    runner: Arc<Runner<S::Driver>>,
    queue: mpsc::UnboundedReceiver<Command>,
    options: OpenOptions,
    callback: CallbackId,
    shared: Arc<Shared<S>>,
) -> Result<(), Error> {
    let span = tracing::info_span!("runner", name = %runner.name);
    let worker = Worker {
        runner: runner.clone(),
        queue,
        shared,
    };

    let handle = std::thread::Builder::new()
        .name("sqlite-runner".to_string())
        .spawn(move || {
            let _guard = span.enter();
            worker.run(options, callback)
        })
        .map_err(|source| Error::Spawn {
            name: runner.name.clone(),
            source,
        })?;

    *runner.worker.lock().unwrap() = Some(handle);
    Ok(())
}

struct Worker<S: Storage> {
    runner: Arc<Runner<S::Driver>>,
    queue: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared<S>>,
}

impl<S: Storage> Worker<S> {
    fn run(mut self, options: OpenOptions, callback: CallbackId) {
        match self.open(&options) {
            Ok(()) if !self.shared.registry.is_live(&self.runner) => {
                // Torn down while opening. Teardown's close found no driver.
                tracing::debug!("runner was torn down during open");
                let err = match self.runner.close_now() {
                    Ok(()) => Error::Closed {
                        name: self.runner.name.clone(),
                    },
                    Err(err) => err,
                };
                self.shared.respond(Response::failure(callback, &err));
                return self.abandon();
            }
            Ok(()) => {
                tracing::debug!(
                    legacy = options.legacy,
                    location = ?options.location,
                    "opened database"
                );
                self.shared.respond(Response::ok(callback));
            }
            Err(err) => {
                tracing::error!(error = %err.render(), "failed to open database, stopping runner");
                self.shared.registry.remove_runner(&self.runner);
                self.shared.respond(Response::failure(callback, &err));
                return self.abandon();
            }
        }
        let bug_workaround = options.bug_workaround_enabled();

        // The Runner holds a sender, so the queue yields until a terminal Command.
        while let Some(command) = self.queue.blocking_recv() {
            let lone_commit = command.is_lone_commit();

            match command {
                Command::Batch {
                    statements,
                    callback,
                } => {
                    let response = match self
                        .runner
                        .execute(&statements, bug_workaround && lone_commit)
                    {
                        Ok(results) => Response::results(callback, results),
                        Err(err) => {
                            tracing::debug!(?callback, error = %err.render(), "batch failed");
                            Response::failure(callback, &err)
                        }
                    };
                    self.shared.respond(response);
                }
                Command::Stop => {
                    // Usually already closed by teardown, unless the driver
                    // was installed after teardown's close.
                    if let Err(err) = self.runner.close_now() {
                        tracing::warn!(error = %err.render(), "failed to close database on stop");
                    }
                    tracing::debug!("stopping runner");
                    break;
                }
                Command::Close { delete, callback } => {
                    self.close(delete, callback);
                    break;
                }
            }
        }
        self.abandon();
    }

    fn open(&self, options: &OpenOptions) -> Result<(), Error> {
        let storage = &self.shared.storage;

        let driver = storage
            .locate(&self.runner.name)
            .and_then(|locator| storage.open(&locator, options))
            .map_err(|err| Error::Open {
                name: self.runner.name.clone(),
                source: Box::new(err),
            })?;

        *self.runner.driver.lock().unwrap() = Some(driver);
        Ok(())
    }

    fn close(&self, delete: bool, callback: CallbackId) {
        let closed = self.runner.close_now();
        self.shared.registry.remove_runner(&self.runner);

        let result = closed.and_then(|()| {
            if delete {
                self.shared.delete(&self.runner.name)
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => {
                tracing::debug!(delete, "closed database");
                self.shared.respond(Response::ok(callback));
            }
            Err(err) => {
                tracing::warn!(delete, error = %err.render(), "failed to close database");
                self.shared.respond(Response::failure(callback, &err));
            }
        }
    }

    // Refuse further Commands and settle any which were queued behind the terminal one.
    // Once closed, blocking_recv yields None only after every in-flight send has landed.
    fn abandon(mut self) {
        self.queue.close();
        let mut abandoned = 0;

        while let Some(command) = self.queue.blocking_recv() {
            abandoned += 1;

            match command {
                Command::Batch { callback, .. } => {
                    let err = Error::Closed {
                        name: self.runner.name.clone(),
                    };
                    self.shared.respond(Response::failure(callback, &err));
                }
                Command::Close {
                    delete: false,
                    callback,
                } => self.shared.respond(Response::ok(callback)),
                Command::Close {
                    delete: true,
                    callback,
                } => match self.shared.delete(&self.runner.name) {
                    Ok(()) => self.shared.respond(Response::ok(callback)),
                    Err(err) => self.shared.respond(Response::failure(callback, &err)),
                },
                Command::Stop => (),
            }
        }

        if abandoned != 0 {
            tracing::warn!(abandoned, "settled commands queued behind a terminal command");
        }
    }
}
