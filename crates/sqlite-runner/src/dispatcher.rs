use crate::registry::Lookup;
use crate::{
    runner, CallbackId, Command, Envelope, Error, OpenOptions, Registry, Request, Responder,
    Response, Statement, Storage,
};
use std::sync::Arc;

/// State shared by a Dispatcher and the workers of its Runners.
pub(crate) struct Shared<S: Storage> {
    pub storage: S,
    pub registry: Registry<S::Driver>,
    pub responder: Box<dyn Responder>,
}

impl<S: Storage> Shared<S> {
    pub fn respond(&self, response: Response) {
        self.responder.respond(response)
    }

    /// Delete the storage of `name`, which must not be open.
    pub fn delete(&self, name: &str) -> Result<(), Error> {
        let deleted = self
            .storage
            .locate(name)
            .and_then(|locator| self.storage.delete(&locator));

        match deleted {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Delete {
                name: name.to_string(),
                source: None,
            }),
            Err(err) => Err(Error::Delete {
                name: name.to_string(),
                source: Some(Box::new(err)),
            }),
        }
    }
}

/// Dispatcher is the entry point for requests against named databases.
///
/// Each request results in exactly one Response delivered to the Responder,
/// carrying the CallbackId of the request. Requests against one database are
/// applied in the order they're dispatched. Dropping the Dispatcher tears
/// down all open databases.
pub struct Dispatcher<S: Storage> {
    shared: Arc<Shared<S>>,
}

impl<S: Storage> Dispatcher<S> {
    pub fn new<R: Responder>(storage: S, responder: R) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                registry: Registry::new(),
                responder: Box::new(responder),
            }),
        }
    }

    pub fn storage(&self) -> &S {
        &self.shared.storage
    }

    pub fn registry(&self) -> &Registry<S::Driver> {
        &self.shared.registry
    }

    /// Route a decoded external request.
    pub fn handle(&self, envelope: Envelope) {
        let Envelope { callback, request } = envelope;

        match request {
            Request::Echo { value } => self.echo(value, callback),
            Request::Open { options } => self.open(options, callback),
            Request::Close { path } => self.close(&path, callback),
            Request::Delete { path } => self.delete(&path, callback),
            Request::ExecuteSqlBatch { dbargs, executes } => {
                self.execute(&dbargs.dbname, executes, callback)
            }
        }
    }

    /// Deliver a failure for a request which couldn't be handled.
    pub fn reject(&self, callback: CallbackId, err: &Error) {
        tracing::warn!(?callback, error = %err.render(), "rejecting request");
        self.shared.respond(Response::failure(callback, err));
    }

    pub fn echo(&self, value: String, callback: CallbackId) {
        self.shared
            .respond(Response::ok_with_message(callback, value));
    }

    /// Open the database of `options.name`, starting its Runner.
    /// Opening an already-open database succeeds without reopening it.
    #[tracing::instrument(skip_all, fields(name = %options.name, callback = ?callback))]
    pub fn open(&self, options: OpenOptions, callback: CallbackId) {
        match self.shared.registry.get_or_create(&options.name) {
            Lookup::Existing(_) => {
                tracing::debug!("database is already open");
                self.shared.respond(Response::ok_with_message(
                    callback,
                    "database is already open",
                ));
            }
            Lookup::Created(runner, queue) => {
                tracing::debug!("starting runner");

                if let Err(err) =
                    runner::spawn(runner.clone(), queue, options, callback, self.shared.clone())
                {
                    self.shared.registry.remove_runner(&runner);
                    self.reject(callback, &err);
                }
            }
        }
    }

    /// Enqueue a batch of `statements` against the open database `name`.
    #[tracing::instrument(skip(self, statements), fields(statements = statements.len()))]
    pub fn execute(&self, name: &str, statements: Vec<Statement>, callback: CallbackId) {
        if statements.is_empty() {
            return self.reject(callback, &Error::MissingExecutes);
        }
        let Some(runner) = self.shared.registry.get(name) else {
            return self.reject(
                callback,
                &Error::NotOpen {
                    name: name.to_string(),
                },
            );
        };

        if let Err(err) = runner.enqueue(Command::Batch {
            statements,
            callback,
        }) {
            self.reject(callback, &err);
        }
    }

    /// Close the database `name` once all previously enqueued work completes.
    /// Closing a database which isn't open succeeds.
    #[tracing::instrument(skip(self))]
    pub fn close(&self, name: &str, callback: CallbackId) {
        let enqueued = self.shared.registry.get(name).map(|runner| {
            runner.enqueue(Command::Close {
                delete: false,
                callback,
            })
        });

        match enqueued {
            Some(Ok(())) => (),
            // The worker has already exited, and its database is closed.
            Some(Err(_)) | None => self
                .shared
                .respond(Response::ok_with_message(callback, "database is not open")),
        }
    }

    /// Close and then delete the database `name` once all previously
    /// enqueued work completes. A database which isn't open is deleted now.
    #[tracing::instrument(skip(self))]
    pub fn delete(&self, name: &str, callback: CallbackId) {
        let enqueued = self.shared.registry.get(name).map(|runner| {
            runner.enqueue(Command::Close {
                delete: true,
                callback,
            })
        });

        if let Some(Ok(())) = enqueued {
            return;
        }
        match self.shared.delete(name) {
            Ok(()) => self.shared.respond(Response::ok(callback)),
            Err(err) => self.reject(callback, &err),
        }
    }

    /// Close every open database immediately, stop its worker and forget it.
    /// Work still queued for a database is settled with Error::Closed.
    pub fn teardown_all(&self) {
        let mut stopped = Vec::new();

        for name in self.shared.registry.names() {
            let Some(runner) = self.shared.registry.get(&name) else {
                continue;
            };
            if let Err(err) = runner.close_now() {
                tracing::warn!(
                    %name,
                    error = %err.render(),
                    "failed to close database during teardown"
                );
            }
            if runner.enqueue(Command::Stop).is_err() {
                tracing::debug!(%name, "runner worker has already exited");
            }
            self.shared.registry.remove_runner(&runner);
            stopped.push(runner);
        }

        for runner in &stopped {
            runner.join();
        }
        if !stopped.is_empty() {
            tracing::info!(count = stopped.len(), "tore down open databases");
        }
    }
}

impl<S: Storage> Drop for Dispatcher<S> {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
